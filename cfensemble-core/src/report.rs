//! Persisted run artifacts: candidate CSVs, score CSVs and the stats JSON.
//!
//! Everything is rendered in memory before touching the disk. Files are then
//! written to `.tmp` siblings and renamed only once every write succeeded, so
//! a failed run leaves no partial artifacts behind.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::data::FeatureSpace;
use crate::ensemble::Candidate;
use crate::error::{CfError, Result};
use crate::scoring::ScoreTable;

/// Output locations of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportPaths {
    pub counterfactuals: PathBuf,
    pub valid_counterfactuals: PathBuf,
    pub scores: PathBuf,
    pub valid_scores: PathBuf,
    pub stats: PathBuf,
}

impl ReportPaths {
    /// `<root>/<date>/<kind>/<dataset>_<model>_i<index>_<date>.<ext>`
    pub fn dated(root: &Path, dataset: &str, model_backend: &str, index: usize, date: &str) -> Self {
        let stem = format!("{dataset}_{model_backend}_i{index}_{date}");
        let day = root.join(date);
        let file = |kind: &str, ext: &str| day.join(kind).join(format!("{stem}.{ext}"));
        Self {
            counterfactuals: file("counterfactuals", "csv"),
            valid_counterfactuals: file("valid_counterfactuals", "csv"),
            scores: file("scores", "csv"),
            valid_scores: file("valid_scores", "csv"),
            stats: file("stats", "json"),
        }
    }

    fn all(&self) -> [&Path; 5] {
        [
            self.counterfactuals.as_path(),
            self.valid_counterfactuals.as_path(),
            self.scores.as_path(),
            self.valid_scores.as_path(),
            self.stats.as_path(),
        ]
    }
}

/// Quote a CSV field when it contains a delimiter, quote or line break.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn csv_line<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = fields
        .into_iter()
        .map(|f| escape(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// Candidates in feature order, then the predicted class under the target
/// name, then the producing backend.
pub fn counterfactuals_csv(space: &FeatureSpace, candidates: &[Candidate]) -> String {
    let header = space
        .features()
        .iter()
        .map(String::as_str)
        .chain([space.target(), "explainer"]);
    let mut out = csv_line(header);
    for candidate in candidates {
        let fields = candidate
            .values
            .values()
            .iter()
            .map(ToString::to_string)
            .chain([candidate.predicted_class.to_string(), candidate.source.id().to_string()]);
        out.push_str(&csv_line(fields));
    }
    out
}

/// Metric columns in schema order plus `explainer`. NaN is written as an
/// empty field.
pub fn scores_csv(table: &ScoreTable) -> String {
    let header = table.columns().iter().map(String::as_str).chain(["explainer"]);
    let mut out = csv_line(header);
    for (row, source) in table.rows().iter().zip(table.sources()) {
        let fields = row
            .values()
            .iter()
            .map(|v| if v.is_nan() { String::new() } else { v.to_string() })
            .chain([source.id().to_string()]);
        out.push_str(&csv_line(fields));
    }
    out
}

/// Fully rendered artifacts of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub counterfactuals: String,
    pub valid_counterfactuals: String,
    pub scores: String,
    pub valid_scores: String,
    pub stats: String,
}

impl Report {
    pub fn render(
        space: &FeatureSpace,
        all: &[Candidate],
        valid: &[Candidate],
        scores: &ScoreTable,
        valid_scores: &ScoreTable,
        summary: &impl Serialize,
    ) -> Result<Self> {
        if scores.len() != all.len() || valid_scores.len() != valid.len() {
            return Err(CfError::report(format!(
                "Score tables ({} / {}) do not match candidates ({} / {})",
                scores.len(),
                valid_scores.len(),
                all.len(),
                valid.len()
            )));
        }
        Ok(Self {
            counterfactuals: counterfactuals_csv(space, all),
            valid_counterfactuals: counterfactuals_csv(space, valid),
            scores: scores_csv(scores),
            valid_scores: scores_csv(valid_scores),
            stats: serde_json::to_string_pretty(summary)?,
        })
    }

    /// Write every artifact, or none of them.
    pub fn write(&self, paths: &ReportPaths) -> Result<()> {
        let contents = [
            &self.counterfactuals,
            &self.valid_counterfactuals,
            &self.scores,
            &self.valid_scores,
            &self.stats,
        ];
        let targets = paths.all();
        let mut staged = Vec::with_capacity(targets.len());
        for (path, content) in targets.iter().zip(contents) {
            match stage(path, content) {
                Ok(tmp) => staged.push(tmp),
                Err(e) => {
                    for tmp in &staged {
                        let _ = std::fs::remove_file(tmp);
                    }
                    return Err(CfError::report(format!("Failed to write {}: {e}", path.display())));
                }
            }
        }
        for (done, (tmp, path)) in staged.iter().zip(targets).enumerate() {
            if let Err(e) = std::fs::rename(tmp, path) {
                for moved in &targets[..done] {
                    let _ = std::fs::remove_file(moved);
                }
                for tmp in &staged[done..] {
                    let _ = std::fs::remove_file(tmp);
                }
                return Err(CfError::report(format!("Failed to move {}: {e}", path.display())));
            }
        }
        tracing::info!(stats = %paths.stats.display(), "Report written");
        Ok(())
    }
}

fn stage(path: &Path, content: &str) -> std::io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    let tmp = PathBuf::from(name);
    std::fs::write(&tmp, content)?;
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::BackendKind;
    use crate::data::{FeatureKind, FeatureValue, Instance};
    use pretty_assertions::assert_eq;

    fn space() -> FeatureSpace {
        FeatureSpace::new(
            vec![
                ("age".into(), FeatureKind::Continuous),
                ("job".into(), FeatureKind::Categorical),
            ],
            "income",
        )
        .unwrap()
    }

    #[test]
    fn test_dated_paths() {
        let paths = ReportPaths::dated(Path::new("out"), "adult", "mlp", 3, "2024-05-01");
        assert_eq!(
            paths.scores,
            PathBuf::from("out/2024-05-01/scores/adult_mlp_i3_2024-05-01.csv")
        );
        assert_eq!(
            paths.stats,
            PathBuf::from("out/2024-05-01/stats/adult_mlp_i3_2024-05-01.json")
        );
    }

    #[test]
    fn test_counterfactuals_csv_quotes_fields() {
        let candidates = vec![Candidate {
            values: Instance::new(vec![
                FeatureValue::Continuous(42.5),
                FeatureValue::categorical("sales, \"senior\""),
            ]),
            predicted_class: 1,
            source: BackendKind::Cfproto,
        }];
        assert_eq!(
            counterfactuals_csv(&space(), &candidates),
            "age,job,income,explainer\n42.5,\"sales, \"\"senior\"\"\",1,cfproto\n"
        );
    }

    #[test]
    fn test_empty_candidates_still_get_header() {
        assert_eq!(counterfactuals_csv(&space(), &[]), "age,job,income,explainer\n");
    }

    #[test]
    fn test_write_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ReportPaths::dated(dir.path(), "adult", "mlp", 0, "2024-05-01");
        let report = Report {
            counterfactuals: "a\n".into(),
            valid_counterfactuals: "b\n".into(),
            scores: "c\n".into(),
            valid_scores: "d\n".into(),
            stats: "{}".into(),
        };
        report.write(&paths).unwrap();
        assert_eq!(std::fs::read_to_string(&paths.valid_scores).unwrap(), "d\n");
        assert_eq!(std::fs::read_to_string(&paths.stats).unwrap(), "{}");

        // a directory squatting on the stats path makes the last write fail
        let blocked = ReportPaths::dated(dir.path(), "adult", "mlp", 1, "2024-05-01");
        std::fs::create_dir_all(blocked.stats.with_extension("json.tmp")).unwrap();
        assert!(report.write(&blocked).is_err());
        assert!(!blocked.counterfactuals.exists());
        assert!(!blocked.scores.exists());
    }

    #[test]
    fn test_failed_rename_rolls_back_moved_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ReportPaths::dated(dir.path(), "adult", "mlp", 2, "2024-05-01");
        // staging succeeds but renaming onto a non-empty directory does not
        std::fs::create_dir_all(paths.stats.join("occupied")).unwrap();
        let report = Report {
            counterfactuals: "a\n".into(),
            valid_counterfactuals: "b\n".into(),
            scores: "c\n".into(),
            valid_scores: "d\n".into(),
            stats: "{}".into(),
        };
        let err = report.write(&paths).unwrap_err();
        assert!(err.to_string().contains("Failed to move"), "{err}");
        for path in &paths.all()[..4] {
            assert!(!path.exists(), "{} left behind", path.display());
        }
        let leftovers: Vec<_> = walk(dir.path())
            .into_iter()
            .filter(|p| p.extension().is_some_and(|e| e == "tmp"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    fn walk(root: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(root).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                out.extend(walk(&path));
            }
            out.push(path);
        }
        out
    }
}
