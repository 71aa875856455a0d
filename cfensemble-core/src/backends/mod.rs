//! Counterfactual generation backends.
//!
//! Every backend implements [`ExplainerBackend`] and receives the same
//! read-only [`BackendContext`]. Backends only ever see the classifier
//! through its probability interface, so any model honouring
//! [`Classifier`] works with all of them.

pub mod carla;
pub mod cem;
pub mod cfec;
pub mod cfproto;
pub mod dice;
pub mod search;
pub mod wachter;

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::data::{Dataset, FeatureSpace, Instance, RawRow};
use crate::encoding::Encoder;
use crate::error::{BackendError, CfError, Result};
use crate::model::{Classifier, argmax};

pub use carla::{GrowingSpheres, GrowingSpheresConfig};
pub use cem::{Cem, CemConfig};
pub use cfec::{GreedySparse, GreedySparseConfig};
pub use cfproto::{PrototypeGuided, PrototypeGuidedConfig};
pub use dice::{DiceConfig, DiceRandom};
pub use wachter::{Wachter, WachterConfig};

/// The closed set of generation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Dice,
    Cem,
    Cfec,
    Wachter,
    Carla,
    Cfproto,
}

impl BackendKind {
    pub const ALL: [BackendKind; 6] = [
        Self::Dice,
        Self::Cem,
        Self::Cfec,
        Self::Wachter,
        Self::Carla,
        Self::Cfproto,
    ];

    /// Identifier written to the `explainer` output column.
    pub fn id(self) -> &'static str {
        match self {
            Self::Dice => "dice",
            Self::Cem => "cem",
            Self::Cfec => "cfec",
            Self::Wachter => "wachter",
            Self::Carla => "carla",
            Self::Cfproto => "cfproto",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for BackendKind {
    type Err = CfError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.id() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| CfError::config(format!("Unknown explainer backend '{s}'")))
    }
}

/// The instance being explained, with its encoding and predicted class.
#[derive(Debug, Clone)]
pub struct Query {
    pub instance: Instance,
    pub encoded: Array1<f64>,
    pub class: usize,
    pub proba: Array1<f64>,
}

impl Query {
    /// Most probable class other than the query's own.
    pub fn target_class(&self) -> usize {
        let masked = self
            .proba
            .iter()
            .enumerate()
            .map(|(i, &p)| if i == self.class { f64::NEG_INFINITY } else { p });
        argmax(masked)
    }
}

/// Read-only state shared by all backends of one ensemble.
#[derive(Clone)]
pub struct BackendContext {
    pub space: Arc<FeatureSpace>,
    pub encoder: Arc<Encoder>,
    pub classifier: Arc<dyn Classifier>,
    pub training: Arc<Dataset>,
    pub training_encoded: Arc<Array2<f64>>,
    pub training_labels: Arc<Vec<usize>>,
}

impl fmt::Debug for BackendContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendContext")
            .field("features", &self.space.features())
            .field("training_rows", &self.training.len())
            .field("encoded_width", &self.encoder.width())
            .finish()
    }
}

impl BackendContext {
    /// Encode the training set and label it with the classifier.
    pub fn new(
        space: Arc<FeatureSpace>,
        encoder: Arc<Encoder>,
        classifier: Arc<dyn Classifier>,
        training: Arc<Dataset>,
    ) -> Result<Self> {
        let training_encoded = encoder.encode(training.rows())?;
        let training_labels = classifier.predict(training_encoded.view())?;
        Ok(Self {
            space,
            encoder,
            classifier,
            training,
            training_encoded: Arc::new(training_encoded),
            training_labels: Arc::new(training_labels),
        })
    }

    /// Encode and classify the query.
    pub fn query(&self, instance: &Instance) -> Result<Query> {
        self.space.validate(instance)?;
        let encoded = self.encoder.encode_one(instance)?;
        let proba = self
            .classifier
            .predict_proba(encoded.view().insert_axis(ndarray::Axis(0)))?;
        if proba.nrows() != 1 || proba.ncols() < 2 {
            return Err(CfError::model(format!(
                "Classifier returned a {}x{} probability matrix for one query",
                proba.nrows(),
                proba.ncols()
            )));
        }
        let proba = proba.row(0).to_owned();
        let class = argmax(proba.iter().copied());
        Ok(Query {
            instance: instance.clone(),
            encoded,
            class,
            proba,
        })
    }

    pub fn proba(&self, kind: BackendKind, encoded: ArrayView2<f64>) -> Result<Array2<f64>, BackendError> {
        self.classifier
            .predict_proba(encoded)
            .map_err(|e| BackendError::classifier(kind, &e))
    }

    pub fn predict(&self, kind: BackendKind, encoded: ArrayView2<f64>) -> Result<Vec<usize>, BackendError> {
        self.classifier
            .predict(encoded)
            .map_err(|e| BackendError::classifier(kind, &e))
    }

    /// Classify raw instances.
    pub fn predict_instances(
        &self,
        kind: BackendKind,
        instances: &[Instance],
    ) -> Result<Vec<usize>, BackendError> {
        crate::model::predict_instances(self.classifier.as_ref(), &self.encoder, instances)
            .map_err(|e| BackendError::classifier(kind, &e))
    }

    pub fn to_raw(&self, instance: &Instance) -> RawRow {
        self.space.to_raw(instance)
    }
}

/// One counterfactual generation strategy.
pub trait ExplainerBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Produce zero or more candidate rows for `query`.
    ///
    /// Rows may be in any column order; the ensemble aligns them to the
    /// feature space and checks validity itself.
    fn generate(&self, query: &Query, ctx: &BackendContext) -> Result<Vec<RawRow>, BackendError>;
}

/// Typed settings for every backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default)]
    pub dice: DiceConfig,
    #[serde(default)]
    pub cem: CemConfig,
    #[serde(default)]
    pub cfec: GreedySparseConfig,
    #[serde(default)]
    pub wachter: WachterConfig,
    #[serde(default)]
    pub carla: GrowingSpheresConfig,
    #[serde(default)]
    pub cfproto: PrototypeGuidedConfig,
}

/// Construct the backend for `kind` from its settings.
pub fn build_backend(kind: BackendKind, config: &BackendsConfig) -> Arc<dyn ExplainerBackend> {
    match kind {
        BackendKind::Dice => Arc::new(DiceRandom::new(config.dice.clone())),
        BackendKind::Cem => Arc::new(Cem::new(config.cem.clone())),
        BackendKind::Cfec => Arc::new(GreedySparse::new(config.cfec.clone())),
        BackendKind::Wachter => Arc::new(Wachter::new(config.wachter.clone())),
        BackendKind::Carla => Arc::new(GrowingSpheres::new(config.carla.clone())),
        BackendKind::Cfproto => Arc::new(PrototypeGuided::new(config.cfproto.clone())),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_ids_roundtrip() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.id().parse::<BackendKind>().unwrap(), kind);
        }
        assert!("lime".parse::<BackendKind>().is_err());
        assert_eq!(
            serde_json::to_string(&BackendKind::Cfproto).unwrap(),
            "\"cfproto\""
        );
    }

    #[test]
    fn test_query_target_class() {
        let ctx = testing::context();
        let query = testing::low_query(&ctx);
        assert_eq!(query.class, 0);
        assert_eq!(query.target_class(), 1);
        assert_eq!(ctx.training_labels.len(), ctx.training.len());
    }

    #[test]
    fn test_build_backend_kinds() {
        let config = BackendsConfig::default();
        for kind in BackendKind::ALL {
            assert_eq!(build_backend(kind, &config).kind(), kind);
        }
    }
}
