//! Ensemble orchestration: run every configured backend against one query,
//! then unify, label and validity-filter their output.
//!
//! Backends run in isolation. A backend that returns an error or panics is
//! recorded in its [`BackendReport`] and contributes no candidates; the others
//! are unaffected. Merged output is ordered by configured backend order, then
//! by generation order, regardless of which backend finished first.

use serde::Serialize;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backends::{
    BackendContext, BackendKind, BackendsConfig, ExplainerBackend, Query, build_backend, search,
};
use crate::data::{Instance, RawRow};
use crate::error::{BackendError, CfError, Result};

/// A counterfactual candidate labelled with the backend that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub values: Instance,
    pub predicted_class: usize,
    pub source: BackendKind,
}

/// Diagnostic record for one backend in one generation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendReport {
    pub backend: BackendKind,
    /// Distinct, schema-conforming candidates kept from this backend.
    pub generated: usize,
    /// Rows dropped because they did not match the feature space.
    pub rejected: usize,
    pub valid: usize,
    pub elapsed_secs: f64,
    pub error: Option<String>,
}

impl BackendReport {
    fn new(backend: BackendKind, elapsed_secs: f64) -> Self {
        Self {
            backend,
            generated: 0,
            rejected: 0,
            valid: 0,
            elapsed_secs,
            error: None,
        }
    }
}

/// Output of [`Ensemble::generate`].
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub query: Query,
    pub query_class: usize,
    pub all: Vec<Candidate>,
    /// Subsequence of `all` that flips the class and respects actionability.
    pub valid: Vec<Candidate>,
    /// One entry per configured backend, in configured order.
    pub reports: Vec<BackendReport>,
}

type Outcome = (std::result::Result<Vec<RawRow>, BackendError>, f64);

pub struct Ensemble {
    ctx: Arc<BackendContext>,
    backends: Vec<Arc<dyn ExplainerBackend>>,
    parallel: bool,
}

impl Ensemble {
    pub fn new(ctx: BackendContext, backends: Vec<Arc<dyn ExplainerBackend>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for backend in &backends {
            if !seen.insert(backend.kind()) {
                return Err(CfError::config(format!(
                    "Backend '{}' is configured more than once",
                    backend.kind()
                )));
            }
        }
        Ok(Self {
            ctx: Arc::new(ctx),
            backends,
            parallel: true,
        })
    }

    pub fn from_config(
        ctx: BackendContext,
        kinds: &[BackendKind],
        config: &BackendsConfig,
    ) -> Result<Self> {
        let backends = kinds.iter().map(|&k| build_backend(k, config)).collect();
        Self::new(ctx, backends)
    }

    /// Run backends on blocking worker tasks (default) or one after another.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn context(&self) -> &BackendContext {
        &self.ctx
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    /// Generate, align and classify candidates for `instance`.
    pub async fn generate(&self, instance: &Instance) -> Result<GenerationResult> {
        let query = self
            .ctx
            .query(instance)
            .map_err(|e| CfError::generation(format!("Query instance: {e}")))?;
        let query = Arc::new(query);
        info!(
            backends = self.backends.len(),
            query_class = query.class,
            parallel = self.parallel,
            "Generating counterfactuals"
        );

        let outcomes = if self.parallel {
            self.run_parallel(&query).await
        } else {
            self.run_sequential(&query)
        };

        let mut all = Vec::new();
        let mut reports = Vec::with_capacity(self.backends.len());
        for (backend, (outcome, elapsed)) in self.backends.iter().zip(outcomes) {
            let kind = backend.kind();
            let mut report = BackendReport::new(kind, elapsed);
            match outcome {
                Ok(rows) => match self.label(kind, &query, rows, &mut report) {
                    Ok(candidates) => all.extend(candidates),
                    Err(e) => {
                        error!(backend = %kind, error = %e, "Classifying candidates failed");
                        report.error = Some(e.to_string());
                    }
                },
                Err(e) => {
                    error!(backend = %kind, error = %e, "Backend failed");
                    report.error = Some(e.to_string());
                }
            }
            reports.push(report);
        }

        let rules = self.ctx.space.actionability();
        let valid: Vec<Candidate> = all
            .iter()
            .filter(|c| c.predicted_class != query.class && rules.permits(&query.instance, &c.values))
            .cloned()
            .collect();
        for report in &mut reports {
            report.valid = valid.iter().filter(|c| c.source == report.backend).count();
        }

        info!(all = all.len(), valid = valid.len(), "Generation finished");
        let query_class = query.class;
        Ok(GenerationResult {
            query: Arc::unwrap_or_clone(query),
            query_class,
            all,
            valid,
            reports,
        })
    }

    async fn run_parallel(&self, query: &Arc<Query>) -> Vec<Outcome> {
        let handles: Vec<_> = self
            .backends
            .iter()
            .map(|backend| {
                let backend = Arc::clone(backend);
                let ctx = Arc::clone(&self.ctx);
                let query = Arc::clone(query);
                tokio::task::spawn_blocking(move || {
                    let start = Instant::now();
                    let rows = backend.generate(&query, &ctx);
                    (rows, start.elapsed().as_secs_f64())
                })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (backend, handle) in self.backends.iter().zip(handles) {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join) => {
                    let message = if join.is_panic() {
                        panic_message(join.into_panic().as_ref())
                    } else {
                        join.to_string()
                    };
                    (
                        Err(BackendError::Panicked {
                            backend: backend.kind(),
                            message,
                        }),
                        0.0,
                    )
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    fn run_sequential(&self, query: &Query) -> Vec<Outcome> {
        self.backends
            .iter()
            .map(|backend| {
                let start = Instant::now();
                let rows = catch_unwind(AssertUnwindSafe(|| backend.generate(query, &self.ctx)))
                    .unwrap_or_else(|payload| {
                        Err(BackendError::Panicked {
                            backend: backend.kind(),
                            message: panic_message(payload.as_ref()),
                        })
                    });
                (rows, start.elapsed().as_secs_f64())
            })
            .collect()
    }

    /// Align, deduplicate and classify one backend's rows.
    fn label(
        &self,
        kind: BackendKind,
        query: &Query,
        rows: Vec<RawRow>,
        report: &mut BackendReport,
    ) -> std::result::Result<Vec<Candidate>, BackendError> {
        let mut aligned = Vec::with_capacity(rows.len());
        for row in &rows {
            match self.ctx.space.align(row) {
                Ok(instance) => aligned.push(instance),
                Err(e) => {
                    report.rejected += 1;
                    warn!(backend = %kind, error = %e, "Rejected candidate row");
                }
            }
        }
        let unique = search::dedup(aligned);
        let labels = self.ctx.predict_instances(kind, &unique)?;
        report.generated = unique.len();
        debug!(
            backend = %kind,
            raw = rows.len(),
            kept = unique.len(),
            flips = labels.iter().filter(|&&l| l != query.class).count(),
            "Backend output labelled"
        );
        Ok(unique
            .into_iter()
            .zip(labels)
            .map(|(values, predicted_class)| Candidate {
                values,
                predicted_class,
                source: kind,
            })
            .collect())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
