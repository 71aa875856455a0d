//! End-to-end runs over a dataset written to a temporary directory.

mod common;

use cfensemble_core::{BackendKind, ReportPaths, run};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_run_writes_every_artifact() {
    let ws = common::Workspace::new();
    let config = ws.config(0);

    let summary = run(&config).await.unwrap();

    let expected = ReportPaths::dated(&ws.output_dir(), common::DATASET, "linear", 0, common::DATE);
    assert_eq!(summary.artifacts, expected);
    for path in [
        &expected.counterfactuals,
        &expected.valid_counterfactuals,
        &expected.scores,
        &expected.valid_scores,
        &expected.stats,
    ] {
        assert!(path.exists(), "{} missing", path.display());
    }

    let all_csv = std::fs::read_to_string(&expected.counterfactuals).unwrap();
    assert_eq!(all_csv.lines().next(), Some("x,y,color,label,explainer"));
    assert_eq!(all_csv.lines().count(), summary.stats.all_count + 1);

    let scores_csv = std::fs::read_to_string(&expected.scores).unwrap();
    assert_eq!(
        scores_csv.lines().next(),
        Some("Proximity,K_Feasibility(3),DiscriminativePower(9),Validity,Sparsity,Actionability,explainer")
    );

    assert_eq!(summary.query_predicted_class, 0);
    assert_eq!(summary.original_x_class, "0");
    assert!(summary.stats.valid_count >= 1);
    assert!(summary.pareto_frontiers_all >= 1);
    assert!(summary.pareto_frontiers_all <= summary.stats.all_count);
}

#[tokio::test]
async fn test_stats_json_shape() {
    let ws = common::Workspace::new();
    let summary = run(&ws.config(0)).await.unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&summary.artifacts.stats).unwrap()).unwrap();
    let explainers = json["explainers"].as_object().unwrap();
    assert_eq!(explainers.len(), BackendKind::ALL.len());
    for kind in BackendKind::ALL {
        assert!(explainers.contains_key(kind.id()), "{kind} missing from stats");
    }

    let per_backend: u64 = explainers
        .values()
        .map(|s| s["pareto_frontier_count"].as_u64().unwrap())
        .sum();
    assert_eq!(per_backend, json["pareto_frontier_count"].as_u64().unwrap());
    assert_eq!(json["pareto_frontiers_all"], json["pareto_frontier_count"]);
    assert_eq!(json["dataset_name"], common::DATASET);
    assert_eq!(json["k_feasibility"], 3);
    assert_eq!(
        json["pareto_metrics"],
        serde_json::json!(["Proximity", "K_Feasibility(3)", "DiscriminativePower(9)"])
    );
    assert_eq!(json["query_instance"]["color"], "red");
}

#[tokio::test]
async fn test_sequential_run_matches_counts() {
    let ws = common::Workspace::new();
    let mut config = ws.config(0);
    config.parallel = false;
    config.explainers = vec![BackendKind::Cfec, BackendKind::Cfproto];

    let summary = run(&config).await.unwrap();
    assert_eq!(summary.stats.explainers.len(), 2);
    let valid: usize = summary.stats.explainers.values().map(|s| s.valid_count).sum();
    assert_eq!(valid, summary.stats.valid_count);
}

#[tokio::test]
async fn test_out_of_range_index_fails_before_writing() {
    let ws = common::Workspace::new();
    let config = ws.config(5);

    let err = run(&config).await.unwrap_err();
    assert_eq!(err.stage(), "load");
    assert!(err.to_string().contains("out of range"));
    assert!(!ws.output_dir().exists());
}

#[tokio::test]
async fn test_missing_model_is_a_load_error() {
    let ws = common::Workspace::new();
    let mut config = ws.config(0);
    config.model_backend = "mlp".into();

    let err = run(&config).await.unwrap_err();
    assert_eq!(err.stage(), "load");
    assert!(!ws.output_dir().exists());
}
