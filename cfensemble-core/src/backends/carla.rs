//! Growing-spheres counterfactual search.
//!
//! Samples the encoded space in concentric layers around the query, first
//! shrinking the initial sphere until it holds no flips, then growing outward
//! one layer at a time until some sample changes the predicted class. The
//! closest flips are sparsified before being returned.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::search::{self, EncodedBounds};
use super::{BackendContext, BackendKind, ExplainerBackend, Query};
use crate::data::{Instance, RawRow};
use crate::error::BackendError;

const MAX_HALVINGS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowingSpheresConfig {
    /// Samples drawn per layer.
    pub n_samples: usize,
    /// Layer thickness in encoded L2 units.
    pub eta: f64,
    pub n_results: usize,
    pub max_layers: usize,
    pub seed: u64,
}

impl Default for GrowingSpheresConfig {
    fn default() -> Self {
        Self {
            n_samples: 200,
            eta: 0.1,
            n_results: 3,
            max_layers: 50,
            seed: 7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GrowingSpheres {
    config: GrowingSpheresConfig,
}

struct Layer<'a> {
    ctx: &'a BackendContext,
    query: &'a Query,
    bounds: &'a EncodedBounds,
    cols: &'a [usize],
}

impl GrowingSpheres {
    pub fn new(config: GrowingSpheresConfig) -> Self {
        Self { config }
    }

    /// Draw points with L2 distance in `[low, high]` from the query and keep the flips.
    fn flips_in_layer(
        &self,
        layer: &Layer<'_>,
        low: f64,
        high: f64,
        rng: &mut StdRng,
    ) -> Result<Vec<Instance>, BackendError> {
        let kind = BackendKind::Carla;
        let mut samples = Vec::with_capacity(self.config.n_samples);
        for _ in 0..self.config.n_samples {
            let direction: Vec<f64> = layer.cols.iter().map(|_| rng.gen_range(-1.0..=1.0)).collect();
            let norm = direction.iter().map(|d| d * d).sum::<f64>().sqrt();
            if norm == 0.0 {
                continue;
            }
            let radius = if high > low { rng.gen_range(low..=high) } else { high };
            let mut x: Array1<f64> = layer.query.encoded.clone();
            for (&col, d) in layer.cols.iter().zip(&direction) {
                x[col] += d / norm * radius;
            }
            layer.bounds.project(&mut x);
            samples.push(search::decode_candidate(layer.ctx, kind, layer.query, x.view())?);
        }
        let flipped = search::flips(layer.ctx, kind, layer.query, &samples)?;
        Ok(samples
            .into_iter()
            .zip(flipped)
            .filter_map(|(s, f)| f.then_some(s))
            .collect())
    }
}

impl ExplainerBackend for GrowingSpheres {
    fn kind(&self) -> BackendKind {
        BackendKind::Carla
    }

    fn generate(&self, query: &Query, ctx: &BackendContext) -> Result<Vec<RawRow>, BackendError> {
        let kind = self.kind();
        if self.config.eta <= 0.0 || self.config.n_samples == 0 {
            return Err(BackendError::InvalidConfig {
                backend: kind,
                reason: "eta and n_samples must be positive".into(),
            });
        }
        let bounds = EncodedBounds::new(ctx, query);
        let cols = bounds.free_columns();
        if cols.is_empty() || self.config.n_results == 0 {
            return Ok(Vec::new());
        }
        let layer = Layer {
            ctx,
            query,
            bounds: &bounds,
            cols: &cols,
        };
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let mut radius = self.config.eta;
        for _ in 0..MAX_HALVINGS {
            if self.flips_in_layer(&layer, 0.0, radius, &mut rng)?.is_empty() {
                break;
            }
            radius /= 2.0;
        }

        let mut found = Vec::new();
        let mut low = radius;
        for layer_index in 0..self.config.max_layers {
            let high = low + self.config.eta;
            found = self.flips_in_layer(&layer, low, high, &mut rng)?;
            if !found.is_empty() {
                tracing::debug!(backend = %kind, layer = layer_index, radius = high, flips = found.len(), "Layer reached decision boundary");
                break;
            }
            low = high;
        }
        if found.is_empty() {
            return Ok(Vec::new());
        }

        let mut sparse = Vec::with_capacity(found.len());
        for candidate in found {
            sparse.push(search::revert_unneeded(ctx, kind, query, candidate)?);
        }
        let sparse = search::dedup(sparse);
        let encoded = ctx
            .encoder
            .encode(&sparse)
            .map_err(|e| BackendError::failed(kind, e.to_string()))?;
        let mut ranked: Vec<(f64, Instance)> = encoded
            .rows()
            .into_iter()
            .map(|row| search::l1(row, query.encoded.view()))
            .zip(sparse)
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(ranked
            .into_iter()
            .take(self.config.n_results)
            .map(|(_, c)| ctx.to_raw(&c))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::testing;

    #[test]
    fn test_growing_spheres_flips_class() {
        let ctx = testing::context();
        let query = testing::low_query(&ctx);
        let rows = GrowingSpheres::new(GrowingSpheresConfig::default())
            .generate(&query, &ctx)
            .unwrap();
        assert!(!rows.is_empty());
        assert!(rows.len() <= 3);
        for (_, label) in testing::classify(&ctx, &rows) {
            assert_eq!(label, 1);
        }
    }

    #[test]
    fn test_growing_spheres_rejects_zero_eta() {
        let ctx = testing::context();
        let query = testing::low_query(&ctx);
        let backend = GrowingSpheres::new(GrowingSpheresConfig {
            eta: 0.0,
            ..GrowingSpheresConfig::default()
        });
        assert!(backend.generate(&query, &ctx).is_err());
    }
}
