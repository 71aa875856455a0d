//! Typed run configuration.
//!
//! Every hyper-parameter of a run lives in [`ExperimentConfig`], which is
//! passed by reference into the pipeline. Nothing is read from global state.

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::backends::{BackendKind, BackendsConfig};
use crate::error::{CfError, Result};
use crate::pareto::Direction;
use crate::scoring::{Metric, ScoringConfig};

/// Metric subspace and directions used for Pareto selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParetoConfig {
    #[serde(default = "default_pareto_metrics")]
    pub metrics: Vec<Metric>,
    #[serde(default = "default_pareto_directions")]
    pub directions: Vec<Direction>,
}

impl Default for ParetoConfig {
    fn default() -> Self {
        Self {
            metrics: default_pareto_metrics(),
            directions: default_pareto_directions(),
        }
    }
}

fn default_pareto_metrics() -> Vec<Metric> {
    vec![Metric::Proximity, Metric::KFeasibility, Metric::DiscriminativePower]
}

fn default_pareto_directions() -> Vec<Direction> {
    vec![Direction::Min, Direction::Min, Direction::Max]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "default_dataset_name")]
    pub dataset_name: String,
    /// Row of the test set to explain.
    #[serde(default)]
    pub index_to_explain: usize,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
    #[serde(default)]
    pub train_path: Option<PathBuf>,
    #[serde(default)]
    pub test_path: Option<PathBuf>,
    #[serde(default)]
    pub constraints_path: Option<PathBuf>,
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    /// Label of the explained model, used in artifact names.
    #[serde(default = "default_model_backend")]
    pub model_backend: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Date stamp of the output directory; today when unset.
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default = "default_explainers")]
    pub explainers: Vec<BackendKind>,
    /// Run backends concurrently.
    #[serde(default = "default_true")]
    pub parallel: bool,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub pareto: ParetoConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
}

fn default_dataset_name() -> String {
    "adult".into()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_model_backend() -> String {
    "mlp".into()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("experiments").join("data")
}

fn default_explainers() -> Vec<BackendKind> {
    BackendKind::ALL.to_vec()
}

fn default_true() -> bool {
    true
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            dataset_name: default_dataset_name(),
            index_to_explain: 0,
            data_dir: default_data_dir(),
            models_dir: default_models_dir(),
            train_path: None,
            test_path: None,
            constraints_path: None,
            model_path: None,
            model_backend: default_model_backend(),
            output_dir: default_output_dir(),
            date: None,
            explainers: default_explainers(),
            parallel: true,
            scoring: ScoringConfig::default(),
            pareto: ParetoConfig::default(),
            backends: BackendsConfig::default(),
        }
    }
}

impl ExperimentConfig {
    pub fn for_dataset(dataset_name: impl Into<String>, index_to_explain: usize) -> Self {
        Self {
            dataset_name: dataset_name.into(),
            index_to_explain,
            ..Self::default()
        }
    }

    pub fn train_path(&self) -> PathBuf {
        self.train_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(format!("{}_train.csv", self.dataset_name)))
    }

    pub fn test_path(&self) -> PathBuf {
        self.test_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(format!("{}_test.csv", self.dataset_name)))
    }

    pub fn constraints_path(&self) -> PathBuf {
        self.constraints_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(format!("{}_constraints.json", self.dataset_name)))
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_path.clone().unwrap_or_else(|| {
            self.models_dir
                .join(format!("{}_{}.json", self.dataset_name, self.model_backend))
        })
    }

    /// Reject settings no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.dataset_name.trim().is_empty() {
            return Err(CfError::config("dataset_name must not be empty"));
        }
        self.scoring.validate()?;
        let mut seen = HashSet::new();
        for kind in &self.explainers {
            if !seen.insert(kind) {
                return Err(CfError::config(format!("Explainer '{kind}' is listed twice")));
            }
        }
        if self.pareto.metrics.is_empty() {
            return Err(CfError::config("pareto.metrics must name at least one metric"));
        }
        if self.pareto.metrics.len() != self.pareto.directions.len() {
            return Err(CfError::config(format!(
                "pareto.metrics has {} entries but pareto.directions has {}",
                self.pareto.metrics.len(),
                self.pareto.directions.len()
            )));
        }
        Ok(())
    }
}

/// Values supplied on the command line. Unset fields leave the layered
/// configuration untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_to_explain: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,
}

/// Load configuration with layered sources.
///
/// Priority (highest first):
/// 1. Command-line overrides
/// 2. Environment variables (`CFENSEMBLE_` prefix, `__` for nesting)
/// 3. An explicit config file
/// 4. Workspace config (`.cfensemble/config.toml`)
/// 5. User config (`config.toml` in the platform config dir)
/// 6. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
    overrides: &ConfigOverrides,
) -> std::result::Result<ExperimentConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(ExperimentConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "cfensemble", "cfensemble") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".cfensemble").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = config_file {
        if !path.exists() {
            return Err(Box::new(figment::Error::from(format!(
                "Config file {} does not exist",
                path.display()
            ))));
        }
        figment = figment.merge(Toml::file(path));
    }

    // CFENSEMBLE_SCORING__K_FEASIBILITY, CFENSEMBLE_BACKENDS__DICE__SEED, ...
    figment = figment.merge(Env::prefixed("CFENSEMBLE_").split("__"));
    figment = figment.merge(Serialized::defaults(overrides));

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_paths() {
        let config = ExperimentConfig::for_dataset("german", 4);
        assert_eq!(config.train_path(), PathBuf::from("data/german_train.csv"));
        assert_eq!(config.test_path(), PathBuf::from("data/german_test.csv"));
        assert_eq!(
            config.constraints_path(),
            PathBuf::from("data/german_constraints.json")
        );
        assert_eq!(config.model_path(), PathBuf::from("models/german_mlp.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ExperimentConfig = from_json(
            r#"{"dataset_name": "fico", "scoring": {"k_feasibility": 5}, "explainers": ["dice", "cfproto"]}"#,
        );
        assert_eq!(config.dataset_name, "fico");
        assert_eq!(config.scoring.k_feasibility, 5);
        assert_eq!(config.scoring.k_discriminative, 9);
        assert_eq!(config.explainers, vec![BackendKind::Dice, BackendKind::Cfproto]);
        assert_eq!(config.pareto, ParetoConfig::default());
        assert!(config.parallel);
    }

    fn from_json(json: &str) -> ExperimentConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ExperimentConfig::default();
        config.explainers = vec![BackendKind::Cem, BackendKind::Cem];
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.pareto.directions.pop();
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.scoring.preference_ranking = vec![0, 1, 2, 3, 4, 9];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_layers_workspace_file_and_overrides() {
        let ws = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(ws.path().join(".cfensemble")).unwrap();
        std::fs::write(
            ws.path().join(".cfensemble").join("config.toml"),
            "dataset_name = \"compas\"\nmodel_backend = \"linear\"\n\n[scoring]\nk_discriminative = 4\n",
        )
        .unwrap();
        let explicit = ws.path().join("run.toml");
        std::fs::write(&explicit, "model_backend = \"mlp\"\n").unwrap();

        let overrides = ConfigOverrides {
            index_to_explain: Some(7),
            ..ConfigOverrides::default()
        };
        let config = load_config(Some(ws.path()), Some(&explicit), &overrides).unwrap();
        assert_eq!(config.dataset_name, "compas");
        assert_eq!(config.model_backend, "mlp");
        assert_eq!(config.scoring.k_discriminative, 4);
        assert_eq!(config.index_to_explain, 7);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let ws = tempfile::tempdir().unwrap();
        let missing = ws.path().join("nope.toml");
        assert!(load_config(None, Some(&missing), &ConfigOverrides::default()).is_err());
    }
}
