//! Typed feature values and rows.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance used when deciding whether two continuous values differ.
pub const CONTINUOUS_EPSILON: f64 = 1e-9;

/// Kind of a feature in the tabular schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Continuous,
    Categorical,
}

/// A single raw (un-encoded) feature value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Continuous(f64),
    Categorical(String),
}

impl FeatureValue {
    pub fn categorical(label: impl Into<String>) -> Self {
        Self::Categorical(label.into())
    }

    pub fn kind(&self) -> FeatureKind {
        match self {
            Self::Continuous(_) => FeatureKind::Continuous,
            Self::Categorical(_) => FeatureKind::Categorical,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Continuous(v) => Some(*v),
            Self::Categorical(_) => None,
        }
    }

    pub fn as_label(&self) -> Option<&str> {
        match self {
            Self::Categorical(label) => Some(label),
            Self::Continuous(_) => None,
        }
    }

    /// Value equality: numeric within [`CONTINUOUS_EPSILON`], exact label match otherwise.
    pub fn same_as(&self, other: &FeatureValue) -> bool {
        match (self, other) {
            (Self::Continuous(a), Self::Continuous(b)) => (a - b).abs() <= CONTINUOUS_EPSILON,
            (Self::Categorical(a), Self::Categorical(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continuous(v) => write!(f, "{v}"),
            Self::Categorical(label) => f.write_str(label),
        }
    }
}

/// One feature row aligned with [`FeatureSpace::features`](super::FeatureSpace::features).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instance {
    values: Vec<FeatureValue>,
}

impl Instance {
    pub fn new(values: Vec<FeatureValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[FeatureValue] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&FeatureValue> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Row-wise equality under [`FeatureValue::same_as`].
    pub fn same_as(&self, other: &Instance) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| a.same_as(b))
    }

    /// Number of positions where the two rows differ.
    pub fn changed_count(&self, other: &Instance) -> usize {
        self.values
            .iter()
            .zip(&other.values)
            .filter(|(a, b)| !a.same_as(b))
            .count()
    }
}

impl From<Vec<FeatureValue>> for Instance {
    fn from(values: Vec<FeatureValue>) -> Self {
        Self::new(values)
    }
}

/// A name-keyed row as emitted by an explainer backend, in the backend's own column order.
pub type RawRow = Vec<(String, FeatureValue)>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_as_is_typed() {
        assert!(FeatureValue::Continuous(1.0).same_as(&FeatureValue::Continuous(1.0 + 1e-12)));
        assert!(!FeatureValue::Continuous(1.0).same_as(&FeatureValue::categorical("1")));
        assert!(FeatureValue::categorical("a").same_as(&FeatureValue::categorical("a")));
    }

    #[test]
    fn test_changed_count() {
        let a = Instance::new(vec![
            FeatureValue::Continuous(3.0),
            FeatureValue::categorical("x"),
        ]);
        let b = Instance::new(vec![
            FeatureValue::Continuous(4.0),
            FeatureValue::categorical("x"),
        ]);
        assert_eq!(a.changed_count(&b), 1);
        assert!(a.same_as(&a.clone()));
    }

    #[test]
    fn test_display() {
        assert_eq!(FeatureValue::Continuous(2.5).to_string(), "2.5");
        assert_eq!(FeatureValue::categorical("Private").to_string(), "Private");
    }
}
