//! Feature schema, constraints file and actionability rules.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use super::value::{FeatureKind, FeatureValue, Instance, RawRow};
use crate::error::{CfError, Result};

/// The JSON constraints file describing a dataset.
///
/// Field names follow the dataset constraint files shipped with the
/// experiments; the shorter names are accepted as aliases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintsConfig {
    #[serde(rename = "features_order_nonsplit", alias = "features_order")]
    pub features_order: Vec<String>,
    #[serde(
        rename = "continuous_features_nonsplit",
        alias = "continuous_features"
    )]
    pub continuous_features: Vec<String>,
    #[serde(
        rename = "categorical_features_nonsplit",
        alias = "categorical_features"
    )]
    pub categorical_features: Vec<String>,
    pub target_feature: String,
    /// Encoded (one-hot) column order expected by the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features_order_after_split: Option<Vec<String>>,
    /// Features that must keep the query's value.
    #[serde(default)]
    pub non_actionable_features: Vec<String>,
    /// Monotonic change directions for continuous features.
    #[serde(default)]
    pub feature_directions: BTreeMap<String, ChangeDirection>,
}

impl ConstraintsConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CfError::config(format!(
                "Failed to read constraints file {}: {e}",
                path.display()
            ))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Allowed direction of change for a monotonic feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDirection {
    Increasing,
    Decreasing,
}

/// How a single feature may be altered by a counterfactual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutability {
    #[default]
    Free,
    Immutable,
    Increasing,
    Decreasing,
}

impl Mutability {
    pub fn is_mutable(self) -> bool {
        self != Self::Immutable
    }

    /// Whether moving from `from` to `to` is allowed.
    pub fn permits(self, from: &FeatureValue, to: &FeatureValue) -> bool {
        match self {
            Self::Free => true,
            Self::Immutable => from.same_as(to),
            Self::Increasing => match (from.as_f64(), to.as_f64()) {
                (Some(a), Some(b)) => b >= a - super::value::CONTINUOUS_EPSILON,
                _ => false,
            },
            Self::Decreasing => match (from.as_f64(), to.as_f64()) {
                (Some(a), Some(b)) => b <= a + super::value::CONTINUOUS_EPSILON,
                _ => false,
            },
        }
    }
}

impl From<ChangeDirection> for Mutability {
    fn from(direction: ChangeDirection) -> Self {
        match direction {
            ChangeDirection::Increasing => Self::Increasing,
            ChangeDirection::Decreasing => Self::Decreasing,
        }
    }
}

/// Per-feature actionability rules, aligned with the feature order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actionability {
    rules: Vec<Mutability>,
}

impl Actionability {
    pub fn unrestricted(len: usize) -> Self {
        Self {
            rules: vec![Mutability::Free; len],
        }
    }

    pub fn rule(&self, index: usize) -> Mutability {
        self.rules.get(index).copied().unwrap_or_default()
    }

    pub fn rules(&self) -> &[Mutability] {
        &self.rules
    }

    /// Indices of features a backend may change.
    pub fn mutable_indices(&self) -> Vec<usize> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_mutable())
            .map(|(i, _)| i)
            .collect()
    }

    /// Indices of features whose rule is broken by `candidate`.
    pub fn violations(&self, query: &Instance, candidate: &Instance) -> Vec<usize> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(i, rule)| match (query.get(*i), candidate.get(*i)) {
                (Some(q), Some(c)) => !rule.permits(q, c),
                _ => true,
            })
            .map(|(i, _)| i)
            .collect()
    }

    pub fn permits(&self, query: &Instance, candidate: &Instance) -> bool {
        self.violations(query, candidate).is_empty()
    }
}

/// Static description of the tabular schema shared by every component.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSpace {
    features: Vec<String>,
    kinds: Vec<FeatureKind>,
    target: String,
    index: HashMap<String, usize>,
    actionability: Actionability,
    encoded_order: Option<Vec<String>>,
}

impl FeatureSpace {
    /// Build a space from `(name, kind)` pairs in column order.
    pub fn new(features: Vec<(String, FeatureKind)>, target: impl Into<String>) -> Result<Self> {
        let target = target.into();
        let mut index = HashMap::with_capacity(features.len());
        let mut names = Vec::with_capacity(features.len());
        let mut kinds = Vec::with_capacity(features.len());
        for (i, (name, kind)) in features.into_iter().enumerate() {
            if name == target {
                return Err(CfError::config(format!(
                    "Target feature '{target}' cannot also be an input feature"
                )));
            }
            if index.insert(name.clone(), i).is_some() {
                return Err(CfError::config(format!("Duplicate feature '{name}'")));
            }
            names.push(name);
            kinds.push(kind);
        }
        if names.is_empty() {
            return Err(CfError::config("Feature space has no input features"));
        }
        let actionability = Actionability::unrestricted(names.len());
        Ok(Self {
            features: names,
            kinds,
            target,
            index,
            actionability,
            encoded_order: None,
        })
    }

    /// Build and validate a space from a constraints file.
    ///
    /// The continuous and categorical sets must be disjoint, must not contain
    /// the target, and together with the target must cover exactly the
    /// feature order.
    pub fn from_constraints(constraints: &ConstraintsConfig) -> Result<Self> {
        let target = constraints.target_feature.as_str();
        let continuous: HashSet<&str> = constraints
            .continuous_features
            .iter()
            .map(String::as_str)
            .collect();
        let categorical: HashSet<&str> = constraints
            .categorical_features
            .iter()
            .map(String::as_str)
            .collect();

        if let Some(both) = continuous.intersection(&categorical).next() {
            return Err(CfError::config(format!(
                "Feature '{both}' is declared both continuous and categorical"
            )));
        }
        if continuous.contains(target) || categorical.contains(target) {
            return Err(CfError::config(format!(
                "Target feature '{target}' is listed as an input feature"
            )));
        }

        let order: Vec<&str> = constraints
            .features_order
            .iter()
            .map(String::as_str)
            .filter(|name| *name != target)
            .collect();
        let order_set: HashSet<&str> = order.iter().copied().collect();
        for name in continuous.iter().chain(categorical.iter()) {
            if !order_set.contains(name) {
                return Err(CfError::config(format!(
                    "Feature '{name}' is classified but missing from the feature order"
                )));
            }
        }

        let mut features = Vec::with_capacity(order.len());
        for name in order {
            let kind = if continuous.contains(name) {
                FeatureKind::Continuous
            } else if categorical.contains(name) {
                FeatureKind::Categorical
            } else {
                return Err(CfError::config(format!(
                    "Feature '{name}' is neither continuous nor categorical"
                )));
            };
            features.push((name.to_string(), kind));
        }

        let mut space = Self::new(features, target)?;
        for name in &constraints.non_actionable_features {
            space = space.with_mutability(name, Mutability::Immutable)?;
        }
        for (name, direction) in &constraints.feature_directions {
            space = space.with_mutability(name, (*direction).into())?;
        }
        space.encoded_order = constraints.features_order_after_split.clone();
        Ok(space)
    }

    /// Set the actionability rule of one feature.
    pub fn with_mutability(mut self, name: &str, rule: Mutability) -> Result<Self> {
        let idx = self
            .index_of(name)
            .ok_or_else(|| CfError::config(format!("Unknown feature '{name}' in actionability rules")))?;
        if matches!(rule, Mutability::Increasing | Mutability::Decreasing)
            && self.kinds[idx] != FeatureKind::Continuous
        {
            return Err(CfError::config(format!(
                "Monotonic direction set on categorical feature '{name}'"
            )));
        }
        self.actionability.rules[idx] = rule;
        Ok(self)
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn kinds(&self) -> &[FeatureKind] {
        &self.kinds
    }

    pub fn kind(&self, index: usize) -> FeatureKind {
        self.kinds[index]
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn continuous_indices(&self) -> Vec<usize> {
        self.indices_of(FeatureKind::Continuous)
    }

    pub fn categorical_indices(&self) -> Vec<usize> {
        self.indices_of(FeatureKind::Categorical)
    }

    fn indices_of(&self, kind: FeatureKind) -> Vec<usize> {
        self.kinds
            .iter()
            .enumerate()
            .filter(|(_, k)| **k == kind)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn actionability(&self) -> &Actionability {
        &self.actionability
    }

    pub fn encoded_order(&self) -> Option<&[String]> {
        self.encoded_order.as_deref()
    }

    /// Check that an instance has one value of the right kind per feature.
    pub fn validate(&self, instance: &Instance) -> Result<()> {
        if instance.len() != self.len() {
            return Err(CfError::schema(format!(
                "Expected {} features, got {}",
                self.len(),
                instance.len()
            )));
        }
        for (i, value) in instance.values().iter().enumerate() {
            if value.kind() != self.kinds[i] {
                return Err(CfError::schema(format!(
                    "Feature '{}' expects a {:?} value",
                    self.features[i], self.kinds[i]
                )));
            }
            if let FeatureValue::Continuous(v) = value {
                if !v.is_finite() {
                    return Err(CfError::schema(format!(
                        "Feature '{}' has non-finite value {v}",
                        self.features[i]
                    )));
                }
            }
        }
        Ok(())
    }

    /// Reorder a name-keyed row into feature order.
    pub fn align(&self, row: &RawRow) -> Result<Instance> {
        let mut slots: Vec<Option<FeatureValue>> = vec![None; self.len()];
        for (name, value) in row {
            let idx = self
                .index_of(name)
                .ok_or_else(|| CfError::schema(format!("Unknown column '{name}'")))?;
            if slots[idx].replace(value.clone()).is_some() {
                return Err(CfError::schema(format!("Duplicate column '{name}'")));
            }
        }
        let mut values = Vec::with_capacity(self.len());
        for (i, slot) in slots.into_iter().enumerate() {
            let value =
                slot.ok_or_else(|| CfError::schema(format!("Missing column '{}'", self.features[i])))?;
            values.push(value);
        }
        let instance = Instance::new(values);
        self.validate(&instance)?;
        Ok(instance)
    }

    /// Name-keyed view of an instance, in feature order.
    pub fn to_raw(&self, instance: &Instance) -> RawRow {
        self.features
            .iter()
            .cloned()
            .zip(instance.values().iter().cloned())
            .collect()
    }
}
