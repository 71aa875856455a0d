//! Classifier contract and the bundled JSON-serialised models.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::data::Instance;
use crate::encoding::Encoder;
use crate::error::{CfError, Result};

/// A trained classifier operating on encoded rows.
///
/// Implementations must be read-only: every backend shares one instance.
pub trait Classifier: Send + Sync {
    /// Number of classes the model distinguishes.
    fn n_classes(&self) -> usize;

    /// Class probabilities, one row per input row.
    fn predict_proba(&self, encoded: ArrayView2<f64>) -> Result<Array2<f64>>;

    /// Most probable class per row.
    fn predict(&self, encoded: ArrayView2<f64>) -> Result<Vec<usize>> {
        let proba = self.predict_proba(encoded)?;
        Ok(proba.rows().into_iter().map(|r| argmax(r.iter().copied())).collect())
    }
}

/// Index of the largest value; the first one wins ties.
pub fn argmax(values: impl IntoIterator<Item = f64>) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, v) in values.into_iter().enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

/// Encode raw instances and classify them in one call.
pub fn predict_instances(
    classifier: &dyn Classifier,
    encoder: &Encoder,
    instances: &[Instance],
) -> Result<Vec<usize>> {
    if instances.is_empty() {
        return Ok(Vec::new());
    }
    let encoded = encoder.encode(instances)?;
    let labels = classifier.predict(encoded.view())?;
    if labels.len() != instances.len() {
        return Err(CfError::model(format!(
            "Classifier returned {} labels for {} rows",
            labels.len(),
            instances.len()
        )));
    }
    Ok(labels)
}

/// A model stored as JSON, tagged by `"type"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SavedModel {
    /// Softmax regression.
    Linear {
        weights: Vec<Vec<f64>>,
        bias: Vec<f64>,
    },
    /// One ReLU hidden layer followed by a softmax output layer.
    Mlp {
        hidden_weights: Vec<Vec<f64>>,
        hidden_bias: Vec<f64>,
        output_weights: Vec<Vec<f64>>,
        output_bias: Vec<f64>,
    },
}

impl SavedModel {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CfError::model(format!("Failed to read model {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| CfError::model(format!("Invalid model file {}: {e}", path.display())))
    }

    /// Convert into a classifier checked against the encoded input width.
    pub fn into_classifier(self, input_width: usize) -> Result<Box<dyn Classifier>> {
        match self {
            Self::Linear { weights, bias } => {
                let layer = DenseLayer::new("linear", weights, bias, input_width)?;
                Ok(Box::new(LinearClassifier { layer }))
            }
            Self::Mlp {
                hidden_weights,
                hidden_bias,
                output_weights,
                output_bias,
            } => {
                let hidden = DenseLayer::new("hidden", hidden_weights, hidden_bias, input_width)?;
                let output =
                    DenseLayer::new("output", output_weights, output_bias, hidden.outputs())?;
                Ok(Box::new(MlpClassifier { hidden, output }))
            }
        }
    }
}

#[derive(Debug, Clone)]
struct DenseLayer {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl DenseLayer {
    /// `weights` is `[inputs][outputs]`.
    fn new(name: &str, weights: Vec<Vec<f64>>, bias: Vec<f64>, inputs: usize) -> Result<Self> {
        if weights.len() != inputs {
            return Err(CfError::model(format!(
                "{name} layer expects {} inputs, encoder produces {inputs}",
                weights.len()
            )));
        }
        let outputs = bias.len();
        if outputs == 0 || weights.iter().any(|w| w.len() != outputs) {
            return Err(CfError::model(format!(
                "{name} layer weights do not match its {outputs} biases"
            )));
        }
        let flat: Vec<f64> = weights.into_iter().flatten().collect();
        let weights = Array2::from_shape_vec((inputs, outputs), flat)
            .map_err(|e| CfError::model(format!("{name} layer: {e}")))?;
        Ok(Self {
            weights,
            bias: Array1::from(bias),
        })
    }

    fn outputs(&self) -> usize {
        self.bias.len()
    }

    fn forward(&self, input: ArrayView2<f64>) -> Result<Array2<f64>> {
        if input.ncols() != self.weights.nrows() {
            return Err(CfError::model(format!(
                "Input has {} columns, layer expects {}",
                input.ncols(),
                self.weights.nrows()
            )));
        }
        Ok(input.dot(&self.weights) + &self.bias)
    }
}

fn softmax_rows(mut logits: Array2<f64>) -> Array2<f64> {
    for mut row in logits.axis_iter_mut(Axis(0)) {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    logits
}

/// Softmax regression over encoded inputs.
#[derive(Debug, Clone)]
pub struct LinearClassifier {
    layer: DenseLayer,
}

impl Classifier for LinearClassifier {
    fn n_classes(&self) -> usize {
        self.layer.outputs()
    }

    fn predict_proba(&self, encoded: ArrayView2<f64>) -> Result<Array2<f64>> {
        Ok(softmax_rows(self.layer.forward(encoded)?))
    }
}

/// Single-hidden-layer perceptron.
#[derive(Debug, Clone)]
pub struct MlpClassifier {
    hidden: DenseLayer,
    output: DenseLayer,
}

impl Classifier for MlpClassifier {
    fn n_classes(&self) -> usize {
        self.output.outputs()
    }

    fn predict_proba(&self, encoded: ArrayView2<f64>) -> Result<Array2<f64>> {
        let hidden = self.hidden.forward(encoded)?.mapv(|v| v.max(0.0));
        Ok(softmax_rows(self.output.forward(hidden.view())?))
    }
}
