//! Gradient-based counterfactuals with an L1 proximity penalty.
//!
//! Minimises `λ·(1 − p_target(x'))² + ‖x' − x‖₁` in encoded space. While no
//! flip has been found the prediction weight `λ` is doubled at a fixed
//! cadence, trading proximity for validity.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use super::search::{self, EncodedBounds};
use super::{BackendContext, BackendKind, ExplainerBackend, Query};
use crate::data::RawRow;
use crate::error::BackendError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WachterConfig {
    pub max_iter: usize,
    pub learning_rate: f64,
    pub lambda_init: f64,
    pub lambda_growth_every: usize,
    /// Finite-difference step in encoded units.
    pub fd_step: f64,
}

impl Default for WachterConfig {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            learning_rate: 0.05,
            lambda_init: 0.1,
            lambda_growth_every: 20,
            fd_step: 1e-4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Wachter {
    config: WachterConfig,
}

impl Wachter {
    pub fn new(config: WachterConfig) -> Self {
        Self { config }
    }
}

impl ExplainerBackend for Wachter {
    fn kind(&self) -> BackendKind {
        BackendKind::Wachter
    }

    fn generate(&self, query: &Query, ctx: &BackendContext) -> Result<Vec<RawRow>, BackendError> {
        let kind = self.kind();
        if self.config.learning_rate <= 0.0 || self.config.fd_step <= 0.0 {
            return Err(BackendError::InvalidConfig {
                backend: kind,
                reason: "learning_rate and fd_step must be positive".into(),
            });
        }
        let bounds = EncodedBounds::new(ctx, query);
        let cols = bounds.free_columns();
        if cols.is_empty() {
            return Ok(Vec::new());
        }
        let target = query.target_class();
        let mut lambda = self.config.lambda_init;
        let mut x: Array1<f64> = query.encoded.clone();

        for iter in 0..self.config.max_iter {
            let (p, jac) = search::probability_jacobian(ctx, kind, &x, &cols, self.config.fd_step)?;
            let gap = 1.0 - p[target];
            for (k, &col) in cols.iter().enumerate() {
                let delta = x[col] - query.encoded[col];
                let l1_grad = if delta.abs() < f64::EPSILON {
                    0.0
                } else {
                    delta.signum()
                };
                let grad = -2.0 * lambda * gap * jac[[k, target]] + l1_grad;
                x[col] -= self.config.learning_rate * grad;
            }
            bounds.project(&mut x);

            let candidate = search::decode_candidate(ctx, kind, query, x.view())?;
            if search::flips(ctx, kind, query, std::slice::from_ref(&candidate))?[0] {
                tracing::debug!(backend = %kind, iter, lambda, "Found counterfactual");
                return Ok(vec![ctx.to_raw(&candidate)]);
            }
            if self.config.lambda_growth_every > 0 && (iter + 1) % self.config.lambda_growth_every == 0 {
                lambda *= 2.0;
            }
        }
        tracing::debug!(backend = %kind, lambda, "No counterfactual within iteration budget");
        Ok(Vec::new())
    }
}
