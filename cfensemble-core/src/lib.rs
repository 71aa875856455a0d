//! # cfensemble-core
//!
//! Counterfactual ensemble and multi-criteria evaluation.
//!
//! Runs several counterfactual generation backends against one query,
//! scores every candidate against the training manifold and selects the
//! Pareto-optimal subset.
//!
//! ## Pipeline
//!
//! 1. **Ensemble** generates candidates from every configured backend in isolation
//! 2. **ScoreEngine** computes the metric vector of each candidate
//! 3. **Pareto selection** keeps the non-dominated candidates
//! 4. **Stats and report** aggregate per backend and persist the artifacts

// Foundation
pub mod config;
pub mod error;

// Data model
pub mod data;
pub mod encoding;
pub mod model;

// Generation
pub mod backends;
pub mod ensemble;

// Evaluation
pub mod pareto;
pub mod scoring;
pub mod stats;

// Output
pub mod experiment;
pub mod report;

// Re-exports
pub use backends::{BackendContext, BackendKind, BackendsConfig, ExplainerBackend, Query};
pub use config::{ConfigOverrides, ExperimentConfig, ParetoConfig, load_config};
pub use data::{ConstraintsConfig, Dataset, FeatureKind, FeatureSpace, FeatureValue, Instance, RawRow};
pub use encoding::Encoder;
pub use ensemble::{BackendReport, Candidate, Ensemble, GenerationResult};
pub use error::{BackendError, CfError, ParetoError, Result};
pub use experiment::{ExperimentSummary, run};
pub use model::{Classifier, SavedModel};
pub use pareto::{Direction, pareto_mask};
pub use report::{Report, ReportPaths};
pub use scoring::{Metric, ScoreEngine, ScoreTable, ScoreVector, ScoringConfig};
pub use stats::{EnsembleStats, ExplainerStats};
