//! Greedy sparse counterfactual search.
//!
//! Each round tries every single-feature edit on the current point and keeps
//! the one that raises the target-class probability the most, so the result
//! changes as few features as the model allows.

use serde::{Deserialize, Serialize};

use super::{BackendContext, BackendKind, ExplainerBackend, Query};
use crate::data::{FeatureKind, FeatureValue, Instance, Mutability, RawRow};
use crate::error::BackendError;
use crate::model::argmax;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GreedySparseConfig {
    /// Evenly spaced values tried per continuous feature.
    pub grid_size: usize,
    /// Maximum number of features changed.
    pub max_changes: usize,
}

impl Default for GreedySparseConfig {
    fn default() -> Self {
        Self {
            grid_size: 10,
            max_changes: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GreedySparse {
    config: GreedySparseConfig,
}

impl GreedySparse {
    pub fn new(config: GreedySparseConfig) -> Self {
        Self { config }
    }

    fn proposals(&self, ctx: &BackendContext, query: &Query, feature: usize) -> Vec<FeatureValue> {
        match ctx.space.kind(feature) {
            FeatureKind::Continuous => {
                let Some((min, max)) = ctx.encoder.continuous_range(feature) else {
                    return Vec::new();
                };
                let q = query.instance.get(feature).and_then(FeatureValue::as_f64).unwrap_or(min);
                let (lo, hi) = match ctx.space.actionability().rule(feature) {
                    Mutability::Increasing => (q, max.max(q)),
                    Mutability::Decreasing => (min.min(q), q),
                    _ => (min, max),
                };
                let steps = self.config.grid_size.max(2) - 1;
                (0..=steps)
                    .map(|s| FeatureValue::Continuous(lo + (hi - lo) * s as f64 / steps as f64))
                    .collect()
            }
            FeatureKind::Categorical => ctx
                .encoder
                .vocabulary(feature)
                .unwrap_or_default()
                .iter()
                .map(|label| FeatureValue::categorical(label.clone()))
                .collect(),
        }
    }
}

impl ExplainerBackend for GreedySparse {
    fn kind(&self) -> BackendKind {
        BackendKind::Cfec
    }

    fn generate(&self, query: &Query, ctx: &BackendContext) -> Result<Vec<RawRow>, BackendError> {
        let kind = self.kind();
        let target = query.target_class();
        let mut free = ctx.space.actionability().mutable_indices();
        let mut current = query.instance.clone();

        for round in 0..self.config.max_changes {
            let mut trials: Vec<(usize, Instance)> = Vec::new();
            for &feature in &free {
                for value in self.proposals(ctx, query, feature) {
                    if current.get(feature).is_some_and(|v| v.same_as(&value)) {
                        continue;
                    }
                    let mut values = current.values().to_vec();
                    values[feature] = value;
                    trials.push((feature, Instance::new(values)));
                }
            }
            if trials.is_empty() {
                break;
            }

            let instances: Vec<Instance> = trials.iter().map(|(_, t)| t.clone()).collect();
            let encoded = ctx
                .encoder
                .encode(&instances)
                .map_err(|e| BackendError::failed(kind, e.to_string()))?;
            let proba = ctx.proba(kind, encoded.view())?;
            let best = argmax(proba.column(target).iter().copied());
            let (feature, chosen) = trials.swap_remove(best);
            let flipped = argmax(proba.row(best).iter().copied()) != query.class;

            current = chosen;
            free.retain(|&f| f != feature);
            if flipped {
                tracing::debug!(backend = %kind, changes = round + 1, "Greedy search flipped class");
                return Ok(vec![ctx.to_raw(&current)]);
            }
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::testing;
    use crate::data::FeatureSpace;

    #[test]
    fn test_greedy_changes_single_feature() {
        let ctx = testing::context();
        let query = testing::low_query(&ctx);
        let rows = GreedySparse::new(GreedySparseConfig::default())
            .generate(&query, &ctx)
            .unwrap();
        assert_eq!(rows.len(), 1);
        let (instance, label) = testing::classify(&ctx, &rows).remove(0);
        assert_eq!(label, 1);
        assert_eq!(instance.changed_count(&query.instance), 1);
    }

    #[test]
    fn test_greedy_respects_immutable_features() {
        let space = FeatureSpace::new(
            vec![
                ("x".into(), FeatureKind::Continuous),
                ("y".into(), FeatureKind::Continuous),
                ("color".into(), FeatureKind::Categorical),
            ],
            "label",
        )
        .unwrap()
        .with_mutability("x", Mutability::Immutable)
        .unwrap()
        .with_mutability("y", Mutability::Immutable)
        .unwrap();
        let ctx = testing::context_for(space);
        let query = testing::low_query(&ctx);
        let rows = GreedySparse::new(GreedySparseConfig::default())
            .generate(&query, &ctx)
            .unwrap();
        assert!(rows.is_empty());
    }
}
