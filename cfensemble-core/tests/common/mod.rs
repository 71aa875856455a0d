//! Shared fixture for the integration tests: a toy dataset on disk.
//!
//! Two continuous features `x`, `y` in `[0, 10]` and a `color` category. The
//! saved linear model predicts class 1 exactly when `x + y > 10`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cfensemble_core::{
    BackendContext, Classifier, ConstraintsConfig, Dataset, Encoder, ExperimentConfig, FeatureSpace,
    SavedModel,
};
use tempfile::TempDir;

pub const DATASET: &str = "toy";
pub const DATE: &str = "2024-05-01";

const CONSTRAINTS: &str = r#"{
  "features_order_nonsplit": ["x", "y", "color", "label"],
  "continuous_features_nonsplit": ["x", "y"],
  "categorical_features_nonsplit": ["color"],
  "target_feature": "label"
}"#;

const MODEL: &str = r#"{
  "type": "linear",
  "weights": [[-5.0, 5.0], [-5.0, 5.0], [0.0, 0.0], [0.0, 0.0]],
  "bias": [5.0, -5.0]
}"#;

const TEST_CSV: &str = "x,y,color,label\n2,3,red,0\n9,8,blue,1\n";

fn train_csv() -> String {
    let mut out = String::from("x,y,color,label\n");
    for x in 0..=10 {
        for y in [0, 5, 10] {
            let color = if x % 2 == 0 { "red" } else { "blue" };
            let label = u8::from(x + y > 10);
            out.push_str(&format!("{x},{y},{color},{label}\n"));
        }
    }
    out
}

/// Data and model files laid out the way a run expects them.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let models = dir.path().join("models");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::create_dir_all(&models).unwrap();
        std::fs::write(data.join(format!("{DATASET}_constraints.json")), CONSTRAINTS).unwrap();
        std::fs::write(data.join(format!("{DATASET}_train.csv")), train_csv()).unwrap();
        std::fs::write(data.join(format!("{DATASET}_test.csv")), TEST_CSV).unwrap();
        std::fs::write(models.join(format!("{DATASET}_linear.json")), MODEL).unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path().join("out")
    }

    /// A run over this workspace with a fixed date and small backend budgets.
    pub fn config(&self, index: usize) -> ExperimentConfig {
        let mut config = ExperimentConfig::for_dataset(DATASET, index);
        config.data_dir = self.path().join("data");
        config.models_dir = self.path().join("models");
        config.model_backend = "linear".into();
        config.output_dir = self.output_dir();
        config.date = Some(DATE.into());
        config
    }

    /// Build the backend context straight from the files on disk.
    pub fn context(&self) -> BackendContext {
        let config = self.config(0);
        let constraints = ConstraintsConfig::from_json_file(&config.constraints_path()).unwrap();
        let space = FeatureSpace::from_constraints(&constraints).unwrap();
        let training = Dataset::from_csv(&config.train_path(), &space).unwrap();
        let encoder = Encoder::fit(&space, &training).unwrap();
        let classifier: Arc<dyn Classifier> = Arc::from(
            SavedModel::from_json_file(&config.model_path())
                .unwrap()
                .into_classifier(encoder.width())
                .unwrap(),
        );
        BackendContext::new(
            Arc::new(space),
            Arc::new(encoder),
            classifier,
            Arc::new(training),
        )
        .unwrap()
    }

    pub fn test_set(&self) -> Dataset {
        let config = self.config(0);
        let constraints = ConstraintsConfig::from_json_file(&config.constraints_path()).unwrap();
        let space = FeatureSpace::from_constraints(&constraints).unwrap();
        Dataset::from_csv(&config.test_path(), &space).unwrap()
    }
}
