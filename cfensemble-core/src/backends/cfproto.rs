//! Prototype-guided counterfactuals.
//!
//! The prototype of the target class is the mean encoding of the `k`
//! training rows labelled with that class that lie closest to the query.
//! The search bisects the segment from the query to the prototype for the
//! nearest point that still flips, then drops changes the flip does not need.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use super::search::{self, EncodedBounds};
use super::{BackendContext, BackendKind, ExplainerBackend, Query};
use crate::data::{Instance, RawRow};
use crate::error::BackendError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrototypeGuidedConfig {
    /// Neighbours averaged into the class prototype.
    pub k_prototype: usize,
    pub bisection_steps: usize,
}

impl Default for PrototypeGuidedConfig {
    fn default() -> Self {
        Self {
            k_prototype: 5,
            bisection_steps: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrototypeGuided {
    config: PrototypeGuidedConfig,
}

impl PrototypeGuided {
    pub fn new(config: PrototypeGuidedConfig) -> Self {
        Self { config }
    }

    fn prototype(&self, ctx: &BackendContext, query: &Query, target: usize) -> Option<Array1<f64>> {
        let mut members: Vec<(f64, usize)> = ctx
            .training_labels
            .iter()
            .enumerate()
            .filter(|&(_, &label)| label == target)
            .map(|(i, _)| (search::l1(ctx.training_encoded.row(i), query.encoded.view()), i))
            .collect();
        if members.is_empty() {
            return None;
        }
        members.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        members.truncate(self.config.k_prototype.max(1));

        let mut sum: Array1<f64> = Array1::zeros(query.encoded.len());
        for &(_, i) in &members {
            sum += &ctx.training_encoded.row(i);
        }
        Some(sum / members.len() as f64)
    }
}

impl ExplainerBackend for PrototypeGuided {
    fn kind(&self) -> BackendKind {
        BackendKind::Cfproto
    }

    fn generate(&self, query: &Query, ctx: &BackendContext) -> Result<Vec<RawRow>, BackendError> {
        let kind = self.kind();
        let target = query.target_class();
        let Some(prototype) = self.prototype(ctx, query, target) else {
            tracing::debug!(backend = %kind, target, "No training rows of the target class");
            return Ok(Vec::new());
        };
        let bounds = EncodedBounds::new(ctx, query);
        let point_at = |t: f64| -> Result<Instance, BackendError> {
            let mut x = &query.encoded + &((&prototype - &query.encoded) * t);
            bounds.project(&mut x);
            search::decode_candidate(ctx, kind, query, x.view())
        };

        let far = point_at(1.0)?;
        if !search::flips(ctx, kind, query, std::slice::from_ref(&far))?[0] {
            return Ok(Vec::new());
        }

        let (mut lo, mut hi) = (0.0, 1.0);
        let mut best = far;
        for _ in 0..self.config.bisection_steps {
            let mid = (lo + hi) / 2.0;
            let candidate = point_at(mid)?;
            if search::flips(ctx, kind, query, std::slice::from_ref(&candidate))?[0] {
                hi = mid;
                best = candidate;
            } else {
                lo = mid;
            }
        }
        let best = search::revert_unneeded(ctx, kind, query, best)?;
        Ok(vec![ctx.to_raw(&best)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::testing;
    use crate::data::FeatureValue;

    #[test]
    fn test_prototype_counterfactual_flips() {
        let ctx = testing::context();
        let query = testing::low_query(&ctx);
        let rows = PrototypeGuided::new(PrototypeGuidedConfig::default())
            .generate(&query, &ctx)
            .unwrap();
        assert_eq!(rows.len(), 1);
        let (instance, label) = testing::classify(&ctx, &rows).remove(0);
        assert_eq!(label, 1);
        // colour carries no weight, so it is reverted to the query's value
        assert_eq!(instance.get(2), Some(&FeatureValue::categorical("red")));
    }

    #[test]
    fn test_prototype_is_mean_of_nearest_target_rows() {
        let ctx = testing::context();
        let query = testing::low_query(&ctx);
        let backend = PrototypeGuided::new(PrototypeGuidedConfig {
            k_prototype: 1,
            ..PrototypeGuidedConfig::default()
        });
        let proto = backend.prototype(&ctx, &query, 1).unwrap();
        let x = proto[0];
        let y = proto[1];
        assert!(x + y > 1.0);
    }
}
