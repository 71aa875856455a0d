//! cfensemble CLI: explain one test-set prediction with the counterfactual ensemble.

use anyhow::Context;
use cfensemble_core::{ConfigOverrides, ExperimentSummary, load_config};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Generate, score and Pareto-select counterfactuals for one test instance.
#[derive(Parser, Debug)]
#[command(name = "cfensemble", version, about, long_about = None)]
struct Cli {
    /// Dataset name (e.g. adult, german, fico, compas)
    dataset: String,

    /// Index of the test row to explain
    index: usize,

    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root directory for the dated report
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Run backends one after another
    #[arg(long)]
    sequential: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            dataset_name: Some(self.dataset.clone()),
            index_to_explain: Some(self.index),
            output_dir: self.output.clone(),
            parallel: self.sequential.then_some(false),
        }
    }

    fn filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

fn print_summary(summary: &ExperimentSummary) {
    println!(
        "{} #{}: query class {} (ground truth {})",
        summary.dataset_name,
        summary.index_to_explain,
        summary.query_predicted_class,
        if summary.original_x_class.is_empty() {
            "n/a"
        } else {
            summary.original_x_class.as_str()
        }
    );
    println!(
        "{:<10} {:>6} {:>6} {:>7} {:>8}",
        "explainer", "all", "valid", "pareto", "secs"
    );
    for kind in &summary.ensemble_explainers {
        let Some(stats) = summary.stats.get(kind.id()) else {
            continue;
        };
        println!(
            "{:<10} {:>6} {:>6} {:>7} {:>8.2}{}",
            kind.id(),
            stats.all_count,
            stats.valid_count,
            stats.pareto_frontier_count,
            stats.elapsed_secs,
            stats
                .error
                .as_deref()
                .map(|e| format!("  error: {e}"))
                .unwrap_or_default()
        );
    }
    println!(
        "{:<10} {:>6} {:>6} {:>7}",
        "total",
        summary.stats.all_count,
        summary.stats.valid_count,
        summary.stats.pareto_frontier_count
    );
    println!("stats: {}", summary.artifacts.stats.display());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(cli.filter()));

    let log_dir = directories::ProjectDirs::from("dev", "cfensemble", "cfensemble")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "cfensemble.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| cli.workspace.clone());

    let config = load_config(Some(&workspace), cli.config.as_deref(), &cli.overrides())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let summary = cfensemble_core::run(&config).await.map_err(|e| {
        tracing::error!(stage = e.stage(), error = %e, "Experiment failed");
        anyhow::anyhow!("{} stage failed: {}", e.stage(), e)
    })?;

    if cli.json {
        let json = serde_json::to_string_pretty(&summary).context("Serializing summary")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&summary);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_positional_arguments() {
        let cli = Cli::try_parse_from(["cfensemble", "adult", "12"]).unwrap();
        assert_eq!(cli.dataset, "adult");
        assert_eq!(cli.index, 12);
        assert_eq!(cli.filter(), "info");
        let overrides = cli.overrides();
        assert_eq!(overrides.index_to_explain, Some(12));
        assert_eq!(overrides.parallel, None);
    }

    #[test]
    fn test_flags_map_to_overrides() {
        let cli = Cli::try_parse_from([
            "cfensemble",
            "german",
            "3",
            "--sequential",
            "-o",
            "out",
            "-vv",
        ])
        .unwrap();
        let overrides = cli.overrides();
        assert_eq!(overrides.parallel, Some(false));
        assert_eq!(overrides.output_dir, Some(PathBuf::from("out")));
        assert_eq!(cli.filter(), "trace");
    }

    #[test]
    fn test_index_must_be_a_number() {
        assert!(Cli::try_parse_from(["cfensemble", "adult", "first"]).is_err());
        assert!(Cli::try_parse_from(["cfensemble", "adult"]).is_err());
    }

    #[test]
    fn test_quiet_filter() {
        let cli = Cli::try_parse_from(["cfensemble", "fico", "0", "-q"]).unwrap();
        assert_eq!(cli.filter(), "error");
    }
}
