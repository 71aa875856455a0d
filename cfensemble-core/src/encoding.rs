//! One-hot + min-max encoding of raw instances into the model's input space.
//!
//! The encoder is fit once against the training set. Continuous features map
//! to a single column scaled by the training min/max; categorical features
//! expand into one indicator column per category seen during fitting.

use ndarray::{Array1, Array2, ArrayView1};
use std::collections::{BTreeSet, HashMap};

use crate::data::{Dataset, FeatureKind, FeatureSpace, FeatureValue, Instance};
use crate::error::{CfError, Result};

#[derive(Debug, Clone, PartialEq)]
enum Block {
    Continuous { min: f64, max: f64 },
    Categorical { vocabulary: Vec<String> },
}

/// Deterministic encoder fit against a reference (training) dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Encoder {
    blocks: Vec<Block>,
    /// Encoded column indices of each feature, in block order.
    spans: Vec<Vec<usize>>,
    columns: Vec<String>,
}

impl Encoder {
    pub fn fit(space: &FeatureSpace, training: &Dataset) -> Result<Self> {
        if training.is_empty() {
            return Err(CfError::dataset("Cannot fit encoder on an empty training set"));
        }

        let mut blocks = Vec::with_capacity(space.len());
        let mut natural = Vec::new();
        for (i, name) in space.features().iter().enumerate() {
            match space.kind(i) {
                FeatureKind::Continuous => {
                    let (min, max) = training
                        .rows()
                        .iter()
                        .filter_map(|r| r.get(i).and_then(FeatureValue::as_f64))
                        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                            (lo.min(v), hi.max(v))
                        });
                    natural.push(name.clone());
                    blocks.push(Block::Continuous { min, max });
                }
                FeatureKind::Categorical => {
                    let vocabulary: Vec<String> = training
                        .rows()
                        .iter()
                        .filter_map(|r| r.get(i).and_then(FeatureValue::as_label))
                        .map(str::to_string)
                        .collect::<BTreeSet<_>>()
                        .into_iter()
                        .collect();
                    natural.extend(vocabulary.iter().map(|c| format!("{name}_{c}")));
                    blocks.push(Block::Categorical { vocabulary });
                }
            }
        }

        // natural column index -> output column index
        let position: Vec<usize> = match space.encoded_order() {
            None => (0..natural.len()).collect(),
            Some(order) => {
                let lookup: HashMap<&str, usize> = order
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (c.as_str(), i))
                    .collect();
                if order.len() != natural.len() || lookup.len() != order.len() {
                    return Err(CfError::config(format!(
                        "Encoded column order lists {} columns, training data yields {}",
                        order.len(),
                        natural.len()
                    )));
                }
                natural
                    .iter()
                    .map(|c| {
                        lookup.get(c.as_str()).copied().ok_or_else(|| {
                            CfError::config(format!("Encoded column '{c}' missing from column order"))
                        })
                    })
                    .collect::<Result<_>>()?
            }
        };

        let mut columns = vec![String::new(); natural.len()];
        for (nat, name) in natural.into_iter().enumerate() {
            columns[position[nat]] = name;
        }

        let mut spans = Vec::with_capacity(blocks.len());
        let mut next = 0;
        for block in &blocks {
            let width = match block {
                Block::Continuous { .. } => 1,
                Block::Categorical { vocabulary } => vocabulary.len(),
            };
            spans.push((next..next + width).map(|n| position[n]).collect());
            next += width;
        }

        Ok(Self {
            blocks,
            spans,
            columns,
        })
    }

    /// Number of encoded columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Encoded column indices occupied by a feature.
    pub fn span(&self, feature: usize) -> &[usize] {
        &self.spans[feature]
    }

    pub fn continuous_range(&self, feature: usize) -> Option<(f64, f64)> {
        match self.blocks.get(feature)? {
            Block::Continuous { min, max } => Some((*min, *max)),
            Block::Categorical { .. } => None,
        }
    }

    pub fn vocabulary(&self, feature: usize) -> Option<&[String]> {
        match self.blocks.get(feature)? {
            Block::Categorical { vocabulary } => Some(vocabulary),
            Block::Continuous { .. } => None,
        }
    }

    /// Scale a raw continuous value into encoded units.
    pub fn scale(&self, feature: usize, value: f64) -> f64 {
        match self.continuous_range(feature) {
            Some((min, max)) if max > min => (value - min) / (max - min),
            _ => 0.0,
        }
    }

    /// Inverse of [`Encoder::scale`].
    pub fn unscale(&self, feature: usize, value: f64) -> f64 {
        match self.continuous_range(feature) {
            Some((min, max)) => min + value * (max - min),
            None => value,
        }
    }

    pub fn encode_one(&self, instance: &Instance) -> Result<Array1<f64>> {
        let mut buf = vec![0.0; self.width()];
        self.write_row(instance, &mut buf)?;
        Ok(Array1::from(buf))
    }

    pub fn encode(&self, instances: &[Instance]) -> Result<Array2<f64>> {
        let width = self.width();
        let mut buf = vec![0.0; instances.len() * width];
        for (instance, chunk) in instances.iter().zip(buf.chunks_mut(width.max(1))) {
            self.write_row(instance, chunk)?;
        }
        Array2::from_shape_vec((instances.len(), width), buf)
            .map_err(|e| CfError::schema(format!("Encoded matrix shape: {e}")))
    }

    fn write_row(&self, instance: &Instance, out: &mut [f64]) -> Result<()> {
        if instance.len() != self.blocks.len() {
            return Err(CfError::schema(format!(
                "Encoder expects {} features, got {}",
                self.blocks.len(),
                instance.len()
            )));
        }
        for (i, (block, value)) in self.blocks.iter().zip(instance.values()).enumerate() {
            let span = &self.spans[i];
            match (block, value) {
                (Block::Continuous { .. }, FeatureValue::Continuous(v)) => {
                    out[span[0]] = self.scale(i, *v);
                }
                (Block::Categorical { vocabulary }, FeatureValue::Categorical(label)) => {
                    // unseen categories leave the whole block at zero
                    if let Ok(pos) = vocabulary.binary_search(label) {
                        out[span[pos]] = 1.0;
                    }
                }
                _ => {
                    return Err(CfError::schema(format!(
                        "Feature {i} has a value of the wrong kind"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Map an encoded row back to raw values.
    ///
    /// Continuous columns are un-scaled; each categorical block decodes to its
    /// highest-valued indicator (first one on ties).
    pub fn decode(&self, row: ArrayView1<f64>) -> Result<Instance> {
        if row.len() != self.width() {
            return Err(CfError::schema(format!(
                "Decoder expects {} columns, got {}",
                self.width(),
                row.len()
            )));
        }
        let mut values = Vec::with_capacity(self.blocks.len());
        for (i, block) in self.blocks.iter().enumerate() {
            let span = &self.spans[i];
            let value = match block {
                Block::Continuous { .. } => FeatureValue::Continuous(self.unscale(i, row[span[0]])),
                Block::Categorical { vocabulary } => {
                    let mut best = 0;
                    for (pos, &col) in span.iter().enumerate() {
                        if row[col] > row[span[best]] {
                            best = pos;
                        }
                    }
                    let label = vocabulary.get(best).ok_or_else(|| {
                        CfError::schema(format!("Feature {i} has an empty category vocabulary"))
                    })?;
                    FeatureValue::categorical(label.clone())
                }
            };
            values.push(value);
        }
        Ok(Instance::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ConstraintsConfig;

    fn space_and_data(order: Option<Vec<&str>>) -> (FeatureSpace, Dataset) {
        let constraints: ConstraintsConfig = serde_json::from_value(serde_json::json!({
            "features_order": ["age", "job", "y"],
            "continuous_features": ["age"],
            "categorical_features": ["job"],
            "target_feature": "y",
            "features_order_after_split": order,
        }))
        .unwrap();
        let space = FeatureSpace::from_constraints(&constraints).unwrap();
        let data = Dataset::parse_csv("age,job\n20,clerk\n60,chef\n40,clerk\n", &space).unwrap();
        (space, data)
    }

    #[test]
    fn test_encode_layout() {
        let (space, data) = space_and_data(None);
        let enc = Encoder::fit(&space, &data).unwrap();
        assert_eq!(enc.columns(), &["age", "job_chef", "job_clerk"]);
        let m = enc.encode(data.rows()).unwrap();
        assert_eq!(m.row(0).to_vec(), vec![0.0, 0.0, 1.0]);
        assert_eq!(m.row(1).to_vec(), vec![1.0, 1.0, 0.0]);
        assert_eq!(m.row(2).to_vec(), vec![0.5, 0.0, 1.0]);
    }

    #[test]
    fn test_encoded_order_permutes_columns() {
        let (space, data) = space_and_data(Some(vec!["job_clerk", "age", "job_chef"]));
        let enc = Encoder::fit(&space, &data).unwrap();
        assert_eq!(enc.columns(), &["job_clerk", "age", "job_chef"]);
        assert_eq!(enc.span(0), &[1]);
        assert_eq!(enc.span(1), &[2, 0]);
        let row = enc.encode_one(&data.rows()[1]).unwrap();
        assert_eq!(row.to_vec(), vec![0.0, 1.0, 1.0]);
        let back = enc.decode(row.view()).unwrap();
        assert!(back.same_as(&data.rows()[1]));
    }

    #[test]
    fn test_bad_encoded_order_rejected() {
        let (space, data) = space_and_data(Some(vec!["age", "job_chef"]));
        assert!(Encoder::fit(&space, &data).is_err());
    }

    #[test]
    fn test_unseen_category_is_zero_block() {
        let (space, data) = space_and_data(None);
        let enc = Encoder::fit(&space, &data).unwrap();
        let unseen = Instance::new(vec![
            FeatureValue::Continuous(20.0),
            FeatureValue::categorical("pilot"),
        ]);
        assert_eq!(enc.encode_one(&unseen).unwrap().to_vec(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_decode_roundtrip_of_training_rows() {
        let (space, data) = space_and_data(None);
        let enc = Encoder::fit(&space, &data).unwrap();
        let m = enc.encode(data.rows()).unwrap();
        for (row, original) in m.rows().into_iter().zip(data.rows()) {
            assert!(enc.decode(row).unwrap().same_as(original));
        }
    }
}
