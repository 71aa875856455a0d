//! Tabular data model: typed values, the feature schema and datasets.

pub mod dataset;
pub mod schema;
pub mod value;

pub use dataset::{Dataset, TrainingRanges};
pub use schema::{Actionability, ChangeDirection, ConstraintsConfig, FeatureSpace, Mutability};
pub use value::{FeatureKind, FeatureValue, Instance, RawRow};
