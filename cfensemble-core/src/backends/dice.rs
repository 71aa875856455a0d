//! Random diverse counterfactual sampling.
//!
//! Draws perturbations of a few mutable features at a time, uniformly over
//! the values seen in training, and keeps distinct draws that change the
//! predicted class.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{BackendContext, BackendKind, ExplainerBackend, Query, search};
use crate::data::{FeatureKind, FeatureValue, Instance, Mutability, RawRow};
use crate::error::BackendError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiceConfig {
    /// Number of counterfactuals to return.
    pub total_cfs: usize,
    /// Upper bound on features changed per draw.
    pub max_features_varied: usize,
    pub max_draws: usize,
    pub batch_size: usize,
    pub seed: u64,
}

impl Default for DiceConfig {
    fn default() -> Self {
        Self {
            total_cfs: 5,
            max_features_varied: 3,
            max_draws: 2000,
            batch_size: 100,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiceRandom {
    config: DiceConfig,
}

impl DiceRandom {
    pub fn new(config: DiceConfig) -> Self {
        Self { config }
    }

    fn draw(
        &self,
        ctx: &BackendContext,
        query: &Query,
        mutable: &[usize],
        rng: &mut StdRng,
    ) -> Instance {
        let max_vary = self.config.max_features_varied.clamp(1, mutable.len());
        let n_vary = rng.gen_range(1..=max_vary);
        let mut values = query.instance.values().to_vec();
        for &feature in mutable.choose_multiple(rng, n_vary) {
            let drawn = match ctx.space.kind(feature) {
                FeatureKind::Continuous => {
                    let (min, max) = ctx.encoder.continuous_range(feature).unwrap_or((0.0, 0.0));
                    let q = values[feature].as_f64().unwrap_or(min);
                    let (lo, hi) = match ctx.space.actionability().rule(feature) {
                        Mutability::Increasing => (q, max.max(q)),
                        Mutability::Decreasing => (min.min(q), q),
                        _ => (min, max),
                    };
                    if hi > lo {
                        FeatureValue::Continuous(rng.gen_range(lo..=hi))
                    } else {
                        FeatureValue::Continuous(lo)
                    }
                }
                FeatureKind::Categorical => ctx
                    .encoder
                    .vocabulary(feature)
                    .and_then(|vocab| vocab.choose(rng))
                    .map(|label| FeatureValue::categorical(label.clone()))
                    .unwrap_or_else(|| values[feature].clone()),
            };
            values[feature] = drawn;
        }
        Instance::new(values)
    }
}

impl ExplainerBackend for DiceRandom {
    fn kind(&self) -> BackendKind {
        BackendKind::Dice
    }

    fn generate(&self, query: &Query, ctx: &BackendContext) -> Result<Vec<RawRow>, BackendError> {
        let kind = self.kind();
        if self.config.batch_size == 0 {
            return Err(BackendError::InvalidConfig {
                backend: kind,
                reason: "batch_size must be positive".into(),
            });
        }
        let mutable = ctx.space.actionability().mutable_indices();
        if mutable.is_empty() || self.config.total_cfs == 0 {
            return Ok(Vec::new());
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut found: Vec<Instance> = Vec::new();
        let mut draws = 0;
        while found.len() < self.config.total_cfs && draws < self.config.max_draws {
            let n = self.config.batch_size.min(self.config.max_draws - draws);
            let batch: Vec<Instance> = (0..n)
                .map(|_| self.draw(ctx, query, &mutable, &mut rng))
                .collect();
            draws += n;
            let flipped = search::flips(ctx, kind, query, &batch)?;
            for (candidate, flip) in batch.into_iter().zip(flipped) {
                if flip && !found.iter().any(|f| f.same_as(&candidate)) {
                    found.push(candidate);
                    if found.len() == self.config.total_cfs {
                        break;
                    }
                }
            }
        }
        tracing::debug!(backend = %kind, draws, found = found.len(), "Random sampling finished");
        Ok(found.iter().map(|c| ctx.to_raw(c)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::testing;

    #[test]
    fn test_dice_finds_flips() {
        let ctx = testing::context();
        let query = testing::low_query(&ctx);
        let dice = DiceRandom::new(DiceConfig::default());
        let rows = dice.generate(&query, &ctx).unwrap();
        assert!(!rows.is_empty());
        assert!(rows.len() <= 5);
        for (_, label) in testing::classify(&ctx, &rows) {
            assert_eq!(label, 1);
        }
    }

    #[test]
    fn test_dice_is_deterministic_for_seed() {
        let ctx = testing::context();
        let query = testing::low_query(&ctx);
        let dice = DiceRandom::new(DiceConfig::default());
        assert_eq!(
            dice.generate(&query, &ctx).unwrap(),
            dice.generate(&query, &ctx).unwrap()
        );
    }

    #[test]
    fn test_dice_zero_batch_is_config_error() {
        let ctx = testing::context();
        let query = testing::low_query(&ctx);
        let dice = DiceRandom::new(DiceConfig {
            batch_size: 0,
            ..DiceConfig::default()
        });
        assert!(matches!(
            dice.generate(&query, &ctx),
            Err(BackendError::InvalidConfig { .. })
        ));
    }
}
