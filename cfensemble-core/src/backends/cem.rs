//! Contrastive explanations via pertinent negatives.
//!
//! Searches for a perturbation `δ` minimising
//! `c·max(p_query − max_{j≠query} p_j + κ, 0) + ‖δ‖₂² + β‖δ‖₁`
//! with iterative shrinkage-thresholding, bisecting the trade-off constant
//! `c` across search steps. Every step that reaches a flip contributes its
//! sparsest flipping point.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use super::search::{self, EncodedBounds};
use super::{BackendContext, BackendKind, ExplainerBackend, Query};
use crate::data::{Instance, RawRow};
use crate::error::BackendError;
use crate::model::argmax;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CemConfig {
    pub c_init: f64,
    pub c_steps: usize,
    pub max_iter: usize,
    pub learning_rate: f64,
    /// L1 weight.
    pub beta: f64,
    /// Required margin between the best other class and the query class.
    pub kappa: f64,
    pub fd_step: f64,
}

impl Default for CemConfig {
    fn default() -> Self {
        Self {
            c_init: 1.0,
            c_steps: 5,
            max_iter: 200,
            learning_rate: 0.05,
            beta: 0.01,
            kappa: 0.0,
            fd_step: 1e-4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cem {
    config: CemConfig,
}

impl Cem {
    pub fn new(config: CemConfig) -> Self {
        Self { config }
    }

    fn elastic_net(&self, delta: &Array1<f64>) -> f64 {
        self.config.beta * delta.iter().map(|d| d.abs()).sum::<f64>()
            + delta.iter().map(|d| d * d).sum::<f64>()
    }

    /// One ISTA run for a fixed `c`; returns the sparsest flip seen.
    fn search(
        &self,
        ctx: &BackendContext,
        query: &Query,
        bounds: &EncodedBounds,
        cols: &[usize],
        c: f64,
    ) -> Result<Option<Instance>, BackendError> {
        let kind = BackendKind::Cem;
        let threshold = self.config.learning_rate * self.config.beta;
        let mut x = query.encoded.clone();
        let mut best: Option<(f64, Instance)> = None;

        for _ in 0..self.config.max_iter {
            let (p, jac) = search::probability_jacobian(ctx, kind, &x, cols, self.config.fd_step)?;
            let rival = argmax(
                p.iter()
                    .enumerate()
                    .map(|(i, &v)| if i == query.class { f64::NEG_INFINITY } else { v }),
            );
            let margin = p[query.class] - p[rival] + self.config.kappa;

            for (k, &col) in cols.iter().enumerate() {
                let delta = x[col] - query.encoded[col];
                let margin_grad = if margin > 0.0 {
                    jac[[k, query.class]] - jac[[k, rival]]
                } else {
                    0.0
                };
                let grad = c * margin_grad + 2.0 * delta;
                let shifted = delta - self.config.learning_rate * grad;
                // soft-thresholding for the L1 term
                let shrunk = shifted.signum() * (shifted.abs() - threshold).max(0.0);
                x[col] = query.encoded[col] + shrunk;
            }
            bounds.project(&mut x);

            let candidate = search::decode_candidate(ctx, kind, query, x.view())?;
            if search::flips(ctx, kind, query, std::slice::from_ref(&candidate))?[0] {
                let cost = self.elastic_net(&(&x - &query.encoded));
                if best.as_ref().is_none_or(|(b, _)| cost < *b) {
                    best = Some((cost, candidate));
                }
            }
        }
        Ok(best.map(|(_, c)| c))
    }
}

impl ExplainerBackend for Cem {
    fn kind(&self) -> BackendKind {
        BackendKind::Cem
    }

    fn generate(&self, query: &Query, ctx: &BackendContext) -> Result<Vec<RawRow>, BackendError> {
        let kind = self.kind();
        if self.config.c_init <= 0.0 || self.config.learning_rate <= 0.0 {
            return Err(BackendError::InvalidConfig {
                backend: kind,
                reason: "c_init and learning_rate must be positive".into(),
            });
        }
        let bounds = EncodedBounds::new(ctx, query);
        let cols = bounds.free_columns();
        if cols.is_empty() {
            return Ok(Vec::new());
        }

        let mut c = self.config.c_init;
        let mut c_low = 0.0_f64;
        let mut c_high = f64::INFINITY;
        let mut found = Vec::new();
        for step in 0..self.config.c_steps {
            match self.search(ctx, query, &bounds, &cols, c)? {
                Some(candidate) => {
                    tracing::debug!(backend = %kind, step, c, "Pertinent negative found");
                    found.push(candidate);
                    c_high = c_high.min(c);
                }
                None => c_low = c_low.max(c),
            }
            c = if c_high.is_finite() {
                (c_low + c_high) / 2.0
            } else {
                c * 10.0
            };
        }
        Ok(search::dedup(found).iter().map(|c| ctx.to_raw(c)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::testing;

    #[test]
    fn test_cem_candidates_flip() {
        let ctx = testing::context();
        let query = testing::low_query(&ctx);
        let rows = Cem::new(CemConfig::default()).generate(&query, &ctx).unwrap();
        assert!(!rows.is_empty());
        for (_, label) in testing::classify(&ctx, &rows) {
            assert_eq!(label, 1);
        }
    }

    #[test]
    fn test_cem_rejects_bad_config() {
        let ctx = testing::context();
        let query = testing::low_query(&ctx);
        let cem = Cem::new(CemConfig {
            c_init: 0.0,
            ..CemConfig::default()
        });
        assert!(cem.generate(&query, &ctx).is_err());
    }
}
