//! Error types for the cfensemble-core crate.
//!
//! Uses `thiserror` for every public error. Backend and Pareto failures have
//! their own structured enums so callers can tell which stage failed and why.

use thiserror::Error;

use crate::backends::BackendKind;

/// Top-level error type for counterfactual ensemble operations.
#[derive(Debug, Error)]
pub enum CfError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Scoring error: {0}")]
    Scoring(String),

    #[error("Selection error: {0}")]
    Pareto(#[from] ParetoError),

    #[error("Report error: {0}")]
    Report(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

impl CfError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    pub fn scoring(msg: impl Into<String>) -> Self {
        Self::Scoring(msg.into())
    }

    pub fn report(msg: impl Into<String>) -> Self {
        Self::Report(msg.into())
    }

    /// Pipeline stage this error belongs to, used in user-facing messages.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::Figment(_) => "config",
            Self::Schema(_) | Self::Dataset(_) | Self::Model(_) => "load",
            Self::Generation(_) | Self::Backend(_) => "generation",
            Self::Scoring(_) => "scoring",
            Self::Pareto(_) => "selection",
            Self::Report(_) | Self::Io(_) | Self::Serde(_) => "report",
        }
    }
}

/// Errors raised by a single explainer backend.
///
/// These never abort an ensemble run; the ensemble records them in the
/// backend's report instead.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("{backend} failed: {message}")]
    Failed { backend: BackendKind, message: String },

    #[error("{backend} panicked: {message}")]
    Panicked { backend: BackendKind, message: String },

    #[error("{backend} classifier call failed: {message}")]
    Classifier { backend: BackendKind, message: String },

    #[error("{backend} misconfigured: {reason}")]
    InvalidConfig { backend: BackendKind, reason: String },
}

impl BackendError {
    pub fn failed(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::Failed {
            backend,
            message: message.into(),
        }
    }

    pub fn classifier(backend: BackendKind, err: &CfError) -> Self {
        Self::Classifier {
            backend,
            message: err.to_string(),
        }
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            Self::Failed { backend, .. }
            | Self::Panicked { backend, .. }
            | Self::Classifier { backend, .. }
            | Self::InvalidConfig { backend, .. } => *backend,
        }
    }
}

/// Errors from Pareto-front selection.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParetoError {
    #[error("expected {expected} optimization directions, got {actual}")]
    DirectionCount { expected: usize, actual: usize },

    #[error("metric '{name}' is not part of the score schema")]
    UnknownMetric { name: String },

    #[error("mask covers {actual} rows but there are {expected} candidates")]
    MaskLength { expected: usize, actual: usize },
}

pub type Result<T, E = CfError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_labels() {
        assert_eq!(CfError::dataset("x").stage(), "load");
        assert_eq!(CfError::scoring("x").stage(), "scoring");
        let pareto = CfError::from(ParetoError::DirectionCount {
            expected: 3,
            actual: 2,
        });
        assert_eq!(pareto.stage(), "selection");
        assert!(pareto.to_string().contains("expected 3"));
    }

    #[test]
    fn test_backend_error_carries_kind() {
        let err = BackendError::failed(BackendKind::Cem, "no gradient");
        assert_eq!(err.backend(), BackendKind::Cem);
        assert_eq!(err.to_string(), "cem failed: no gradient");
    }
}
