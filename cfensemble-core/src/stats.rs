//! Per-backend aggregates over a completed run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ensemble::GenerationResult;
use crate::error::{ParetoError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExplainerStats {
    pub all_count: usize,
    pub valid_count: usize,
    pub rejected_count: usize,
    pub pareto_frontier_count: usize,
    pub elapsed_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnsembleStats {
    /// Keyed by backend id.
    pub explainers: BTreeMap<String, ExplainerStats>,
    pub all_count: usize,
    pub valid_count: usize,
    pub pareto_frontier_count: usize,
}

impl EnsembleStats {
    /// `pareto_mask` is positional over `result.all`.
    pub fn from_run(result: &GenerationResult, pareto_mask: &[bool]) -> Result<Self> {
        if pareto_mask.len() != result.all.len() {
            return Err(ParetoError::MaskLength {
                expected: result.all.len(),
                actual: pareto_mask.len(),
            }
            .into());
        }

        let mut explainers = BTreeMap::new();
        for report in &result.reports {
            let on_front = result
                .all
                .iter()
                .zip(pareto_mask)
                .filter(|(c, keep)| **keep && c.source == report.backend)
                .count();
            explainers.insert(
                report.backend.id().to_string(),
                ExplainerStats {
                    all_count: report.generated,
                    valid_count: report.valid,
                    rejected_count: report.rejected,
                    pareto_frontier_count: on_front,
                    elapsed_secs: report.elapsed_secs,
                    error: report.error.clone(),
                },
            );
        }

        Ok(Self {
            explainers,
            all_count: result.all.len(),
            valid_count: result.valid.len(),
            pareto_frontier_count: pareto_mask.iter().filter(|k| **k).count(),
        })
    }

    pub fn get(&self, backend: &str) -> Option<&ExplainerStats> {
        self.explainers.get(backend)
    }
}
