//! End-to-end run: load, generate, score, select, report.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::backends::{BackendContext, BackendKind};
use crate::config::ExperimentConfig;
use crate::data::{ConstraintsConfig, Dataset, FeatureSpace, FeatureValue};
use crate::encoding::Encoder;
use crate::ensemble::Ensemble;
use crate::error::Result;
use crate::model::{Classifier, SavedModel};
use crate::pareto::{Direction, pareto_mask};
use crate::report::{Report, ReportPaths};
use crate::scoring::{Metric, ScoreEngine};
use crate::stats::EnsembleStats;

/// Stats of a run merged with the settings that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentSummary {
    #[serde(flatten)]
    pub stats: EnsembleStats,
    pub run_id: Uuid,
    pub date: String,
    pub dataset_name: String,
    pub index_to_explain: usize,
    pub model_backend: String,
    /// Configured backends in run order.
    pub ensemble_explainers: Vec<BackendKind>,
    pub k_feasibility: usize,
    pub k_discriminative: usize,
    pub preference_ranking: Vec<usize>,
    pub metric_preference: Vec<Metric>,
    pub pareto_metrics: Vec<String>,
    pub pareto_directions: Vec<Direction>,
    pub pareto_frontiers_all: usize,
    pub query_instance: BTreeMap<String, FeatureValue>,
    /// Ground-truth label of the query row, as written in the test file.
    pub original_x_class: String,
    pub query_predicted_class: usize,
    pub ensemble_init_elapsed_secs: f64,
    pub ensemble_generation_elapsed_secs: f64,
    pub artifacts: ReportPaths,
}

struct Inputs {
    space: Arc<FeatureSpace>,
    training: Arc<Dataset>,
    test: Dataset,
}

fn load_inputs(config: &ExperimentConfig) -> Result<Inputs> {
    let constraints = ConstraintsConfig::from_json_file(&config.constraints_path())?;
    let space = FeatureSpace::from_constraints(&constraints)?;
    let training = Dataset::from_csv(&config.train_path(), &space)?;
    let test = Dataset::from_csv(&config.test_path(), &space)?;
    info!(
        features = space.len(),
        training_rows = training.len(),
        test_rows = test.len(),
        "Loaded data"
    );
    Ok(Inputs {
        space: Arc::new(space),
        training: Arc::new(training),
        test,
    })
}

/// Run one experiment and write its report.
pub async fn run(config: &ExperimentConfig) -> Result<ExperimentSummary> {
    config.validate()?;
    let run_id = Uuid::new_v4();
    let date = config
        .date
        .clone()
        .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());
    info!(%run_id, dataset = %config.dataset_name, index = config.index_to_explain, "Starting experiment");

    let inputs = load_inputs(config)?;
    let query = inputs.test.instance(config.index_to_explain)?.clone();
    let original_x_class = inputs
        .test
        .target(config.index_to_explain)
        .unwrap_or_default()
        .to_string();

    let init_start = Instant::now();
    let encoder = Encoder::fit(&inputs.space, &inputs.training)?;
    let classifier: Arc<dyn Classifier> =
        Arc::from(SavedModel::from_json_file(&config.model_path())?.into_classifier(encoder.width())?);
    let ctx = BackendContext::new(
        Arc::clone(&inputs.space),
        Arc::new(encoder),
        classifier,
        Arc::clone(&inputs.training),
    )?;
    let training_labels = Arc::clone(&ctx.training_labels);
    let ensemble = Ensemble::from_config(ctx, &config.explainers, &config.backends)?.with_parallel(config.parallel);
    let ensemble_init_elapsed_secs = init_start.elapsed().as_secs_f64();

    let generation_start = Instant::now();
    let result = ensemble.generate(&query).await?;
    let ensemble_generation_elapsed_secs = generation_start.elapsed().as_secs_f64();

    let engine = ScoreEngine::new(
        Arc::clone(&inputs.space),
        Arc::clone(&inputs.training),
        training_labels,
        config.scoring.clone(),
    )?;
    let scores = engine.score(&result.all, &query, result.query_class)?;
    let valid_scores = engine.score(&result.valid, &query, result.query_class)?;
    info!(all = scores.len(), valid = valid_scores.len(), "Scored candidates");

    let matrix = scores.matrix(&config.pareto.metrics);
    let mask = pareto_mask(matrix.view(), &config.pareto.directions)?;
    let stats = EnsembleStats::from_run(&result, &mask)?;
    info!(pareto = stats.pareto_frontier_count, "Selected Pareto front");

    let artifacts = ReportPaths::dated(
        &config.output_dir,
        &config.dataset_name,
        &config.model_backend,
        config.index_to_explain,
        &date,
    );
    let summary = ExperimentSummary {
        pareto_frontiers_all: stats.pareto_frontier_count,
        stats,
        run_id,
        date,
        dataset_name: config.dataset_name.clone(),
        index_to_explain: config.index_to_explain,
        model_backend: config.model_backend.clone(),
        ensemble_explainers: config.explainers.clone(),
        k_feasibility: config.scoring.k_feasibility,
        k_discriminative: config.scoring.k_discriminative,
        preference_ranking: config.scoring.preference_ranking.clone(),
        metric_preference: config.scoring.ranked_metrics(),
        pareto_metrics: config
            .pareto
            .metrics
            .iter()
            .map(|m| m.column_name(&config.scoring))
            .collect(),
        pareto_directions: config.pareto.directions.clone(),
        query_instance: inputs.space.to_raw(&query).into_iter().collect(),
        original_x_class,
        query_predicted_class: result.query_class,
        ensemble_init_elapsed_secs,
        ensemble_generation_elapsed_secs,
        artifacts: artifacts.clone(),
    };

    Report::render(
        &inputs.space,
        &result.all,
        &result.valid,
        &scores,
        &valid_scores,
        &summary,
    )?
    .write(&artifacts)?;
    info!(%run_id, "Experiment finished");
    Ok(summary)
}
