//! Per-candidate quality metrics against the training manifold.
//!
//! Distances mix both feature kinds: a continuous feature contributes its
//! absolute difference divided by the training range, a categorical feature
//! contributes 1 on mismatch. Training ranges are fixed when the engine is
//! built, so scores stay comparable across queries.
//!
//! Neighbours are ranked by ascending distance, then by training row index.
//! A candidate equal to a training row counts that row as a neighbour at
//! distance 0. `k` larger than the available rows is clamped.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::backends::BackendKind;
use crate::data::{Dataset, FeatureKind, FeatureSpace, FeatureValue, Instance, TrainingRanges};
use crate::ensemble::Candidate;
use crate::error::{CfError, ParetoError, Result};
use crate::pareto::Direction;

/// The fixed metric schema. Discriminants are the indices used by
/// preference rankings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    Proximity,
    #[serde(rename = "K_Feasibility")]
    KFeasibility,
    DiscriminativePower,
    Validity,
    Sparsity,
    Actionability,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Proximity,
        Metric::KFeasibility,
        Metric::DiscriminativePower,
        Metric::Validity,
        Metric::Sparsity,
        Metric::Actionability,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Metric::Proximity => "Proximity",
            Metric::KFeasibility => "K_Feasibility",
            Metric::DiscriminativePower => "DiscriminativePower",
            Metric::Validity => "Validity",
            Metric::Sparsity => "Sparsity",
            Metric::Actionability => "Actionability",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Metric::Proximity | Metric::KFeasibility | Metric::Sparsity => Direction::Min,
            Metric::DiscriminativePower | Metric::Validity | Metric::Actionability => Direction::Max,
        }
    }

    /// Output column header, e.g. `K_Feasibility(3)`.
    pub fn column_name(self, config: &ScoringConfig) -> String {
        match self {
            Metric::KFeasibility => format!("{}({})", self.name(), config.k_feasibility),
            Metric::DiscriminativePower => format!("{}({})", self.name(), config.k_discriminative),
            _ => self.name().to_string(),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = ParetoError;

    /// Accepts the bare name or a column header with its `(k)` suffix.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let base = s.trim().split('(').next().unwrap_or_default().trim();
        Metric::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(base))
            .ok_or_else(|| ParetoError::UnknownMetric { name: s.to_string() })
    }
}

fn default_k_feasibility() -> usize {
    3
}

fn default_k_discriminative() -> usize {
    9
}

fn default_preference_ranking() -> Vec<usize> {
    vec![0, 4, 2, 3, 5, 1]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_k_feasibility")]
    pub k_feasibility: usize,
    #[serde(default = "default_k_discriminative")]
    pub k_discriminative: usize,
    /// Metric indices, most preferred first.
    #[serde(default = "default_preference_ranking")]
    pub preference_ranking: Vec<usize>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            k_feasibility: default_k_feasibility(),
            k_discriminative: default_k_discriminative(),
            preference_ranking: default_preference_ranking(),
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        if self.k_feasibility == 0 || self.k_discriminative == 0 {
            return Err(CfError::config("Neighbour counts must be at least 1"));
        }
        let mut seen = [false; Metric::ALL.len()];
        for &i in &self.preference_ranking {
            match seen.get_mut(i) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(CfError::config(format!(
                        "preference_ranking {:?} is not a permutation of 0..{}",
                        self.preference_ranking,
                        Metric::ALL.len()
                    )));
                }
            }
        }
        if self.preference_ranking.len() != Metric::ALL.len() {
            return Err(CfError::config(format!(
                "preference_ranking needs {} entries, got {}",
                Metric::ALL.len(),
                self.preference_ranking.len()
            )));
        }
        Ok(())
    }

    /// Metrics in preference order.
    pub fn ranked_metrics(&self) -> Vec<Metric> {
        self.preference_ranking
            .iter()
            .filter_map(|&i| Metric::ALL.get(i).copied())
            .collect()
    }
}

/// Metric values of one candidate, in schema order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ScoreVector([f64; 6]);

impl ScoreVector {
    pub fn get(&self, metric: Metric) -> f64 {
        self.0[metric.index()]
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }
}

/// Scores of a candidate collection, row-aligned with it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreTable {
    columns: Vec<String>,
    rows: Vec<ScoreVector>,
    sources: Vec<BackendKind>,
    preference: Vec<Metric>,
}

impl ScoreTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[ScoreVector] {
        &self.rows
    }

    pub fn sources(&self) -> &[BackendKind] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, metric: Metric) -> Vec<f64> {
        self.rows.iter().map(|r| r.get(metric)).collect()
    }

    /// Candidate × metric matrix restricted to `metrics`, in the given order.
    pub fn matrix(&self, metrics: &[Metric]) -> Array2<f64> {
        Array2::from_shape_fn((self.rows.len(), metrics.len()), |(i, j)| self.rows[i].get(metrics[j]))
    }

    pub fn ranked_metrics(&self) -> &[Metric] {
        &self.preference
    }

    /// Candidate indices sorted lexicographically by the ranked metrics,
    /// best first. NaN sorts last; equal rows keep their original order.
    pub fn preference_order(&self) -> Vec<usize> {
        let key = |row: &ScoreVector, metric: Metric| -> f64 {
            let v = row.get(metric);
            if v.is_nan() {
                f64::INFINITY
            } else if metric.direction() == Direction::Max {
                -v
            } else {
                v
            }
        };
        let mut order: Vec<usize> = (0..self.rows.len()).collect();
        order.sort_by(|&a, &b| {
            self.preference
                .iter()
                .map(|&m| key(&self.rows[a], m).total_cmp(&key(&self.rows[b], m)))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        order
    }
}

/// Computes [`ScoreVector`]s against a fixed training manifold.
#[derive(Debug, Clone)]
pub struct ScoreEngine {
    space: Arc<FeatureSpace>,
    training: Arc<Dataset>,
    labels: Arc<Vec<usize>>,
    ranges: TrainingRanges,
    config: ScoringConfig,
}

impl ScoreEngine {
    /// `labels` are the classifier's predictions for the training rows.
    pub fn new(
        space: Arc<FeatureSpace>,
        training: Arc<Dataset>,
        labels: Arc<Vec<usize>>,
        config: ScoringConfig,
    ) -> Result<Self> {
        config.validate()?;
        if labels.len() != training.len() {
            return Err(CfError::scoring(format!(
                "Got {} training labels for {} training rows",
                labels.len(),
                training.len()
            )));
        }
        let ranges = TrainingRanges::fit(&space, &training);
        Ok(Self {
            space,
            training,
            labels,
            ranges,
            config,
        })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Mixed continuous/categorical distance between two instances.
    pub fn distance(&self, a: &Instance, b: &Instance) -> f64 {
        a.values()
            .iter()
            .zip(b.values())
            .enumerate()
            .map(|(i, (x, y))| self.feature_distance(i, x, y))
            .sum()
    }

    fn feature_distance(&self, feature: usize, a: &FeatureValue, b: &FeatureValue) -> f64 {
        match (self.space.kind(feature), a, b) {
            (FeatureKind::Continuous, FeatureValue::Continuous(x), FeatureValue::Continuous(y)) => {
                let span = self.ranges.span(feature);
                if span > 0.0 {
                    (x - y).abs() / span
                } else if a.same_as(b) {
                    0.0
                } else {
                    1.0
                }
            }
            _ => {
                if a.same_as(b) {
                    0.0
                } else {
                    1.0
                }
            }
        }
    }

    /// Training rows ranked by distance to `instance`, ties by row index.
    fn neighbours(&self, instance: &Instance) -> Vec<(f64, usize)> {
        let mut ranked: Vec<(f64, usize)> = self
            .training
            .rows()
            .iter()
            .enumerate()
            .map(|(i, row)| (self.distance(instance, row), i))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        ranked
    }

    pub fn score_one(&self, candidate: &Candidate, query: &Instance, query_label: usize) -> ScoreVector {
        let class = candidate.predicted_class;
        let neighbours = self.neighbours(&candidate.values);

        let same_class: Vec<f64> = neighbours
            .iter()
            .filter(|(_, i)| self.labels[*i] == class)
            .take(self.config.k_feasibility)
            .map(|(d, _)| *d)
            .collect();
        let feasibility = if same_class.is_empty() {
            f64::NAN
        } else {
            same_class.iter().sum::<f64>() / same_class.len() as f64
        };

        let nearest = &neighbours[..self.config.k_discriminative.min(neighbours.len())];
        let discriminative = if nearest.is_empty() {
            f64::NAN
        } else {
            nearest.iter().filter(|(_, i)| self.labels[*i] == class).count() as f64 / nearest.len() as f64
        };

        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        ScoreVector([
            self.distance(&candidate.values, query),
            feasibility,
            discriminative,
            flag(class != query_label),
            candidate.values.changed_count(query) as f64,
            flag(self.space.actionability().permits(query, &candidate.values)),
        ])
    }

    /// Score every candidate, preserving order.
    pub fn score(&self, candidates: &[Candidate], query: &Instance, query_label: usize) -> Result<ScoreTable> {
        self.space
            .validate(query)
            .map_err(|e| CfError::scoring(format!("Query: {e}")))?;
        for (i, c) in candidates.iter().enumerate() {
            self.space
                .validate(&c.values)
                .map_err(|e| CfError::scoring(format!("Candidate {i} from {}: {e}", c.source)))?;
        }
        let rows: Vec<ScoreVector> = candidates
            .iter()
            .map(|c| self.score_one(c, query, query_label))
            .collect();
        let undefined = rows
            .iter()
            .filter(|r| r.values().iter().any(|v| v.is_nan()))
            .count();
        debug!(candidates = rows.len(), undefined, "Scored candidates");
        Ok(ScoreTable {
            columns: Metric::ALL.iter().map(|m| m.column_name(&self.config)).collect(),
            rows,
            sources: candidates.iter().map(|c| c.source).collect(),
            preference: self.config.ranked_metrics(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn space() -> FeatureSpace {
        FeatureSpace::new(
            vec![
                ("age".into(), FeatureKind::Continuous),
                ("job".into(), FeatureKind::Categorical),
            ],
            "y",
        )
        .unwrap()
    }

    fn inst(age: f64, job: &str) -> Instance {
        Instance::new(vec![FeatureValue::Continuous(age), FeatureValue::categorical(job)])
    }

    fn engine(config: ScoringConfig) -> ScoreEngine {
        let space = space();
        let training = Dataset::new(
            &space,
            vec![inst(0.0, "a"), inst(10.0, "a"), inst(20.0, "b"), inst(30.0, "b")],
        )
        .unwrap();
        ScoreEngine::new(
            Arc::new(space),
            Arc::new(training),
            Arc::new(vec![0, 0, 1, 1]),
            config,
        )
        .unwrap()
    }

    fn cand(age: f64, job: &str, class: usize) -> Candidate {
        Candidate {
            values: inst(age, job),
            predicted_class: class,
            source: BackendKind::Dice,
        }
    }

    #[test]
    fn test_proximity_is_zero_for_query() {
        let e = engine(ScoringConfig::default());
        let q = inst(10.0, "a");
        let s = e.score_one(&cand(10.0, "a", 0), &q, 0);
        assert_eq!(s.get(Metric::Proximity), 0.0);
        assert_eq!(s.get(Metric::Sparsity), 0.0);
        assert_eq!(s.get(Metric::Validity), 0.0);
    }

    #[test]
    fn test_mixed_distance() {
        let e = engine(ScoringConfig::default());
        // 15 / 30 for age plus one categorical mismatch
        assert!((e.distance(&inst(0.0, "a"), &inst(15.0, "b")) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_feasibility_uses_same_class_neighbours() {
        let e = engine(ScoringConfig {
            k_feasibility: 1,
            ..ScoringConfig::default()
        });
        let q = inst(0.0, "a");
        // nearest class-1 row is (20, b), an age gap of 5 over a range of 30
        let s = e.score_one(&cand(25.0, "b", 1), &q, 0);
        assert!((s.get(Metric::KFeasibility) - 5.0 / 30.0).abs() < 1e-12);
        assert_eq!(s.get(Metric::Validity), 1.0);
        assert_eq!(s.get(Metric::Sparsity), 2.0);
    }

    #[test]
    fn test_candidate_on_training_row_is_own_neighbour() {
        let e = engine(ScoringConfig {
            k_feasibility: 1,
            k_discriminative: 1,
            ..ScoringConfig::default()
        });
        let s = e.score_one(&cand(20.0, "b", 1), &inst(0.0, "a"), 0);
        assert_eq!(s.get(Metric::KFeasibility), 0.0);
        assert_eq!(s.get(Metric::DiscriminativePower), 1.0);
    }

    #[test]
    fn test_large_k_uses_whole_training_set() {
        let e = engine(ScoringConfig {
            k_feasibility: 100,
            k_discriminative: 100,
            ..ScoringConfig::default()
        });
        let q = inst(0.0, "a");
        let table = e
            .score(&[cand(5.0, "a", 1), cand(28.0, "b", 1), cand(12.0, "b", 0)], &q, 0)
            .unwrap();
        let power = table.column(Metric::DiscriminativePower);
        assert_eq!(power[0], 0.5);
        assert_eq!(power[0], power[1]);
        assert_eq!(power[2], 0.5);
    }

    #[test]
    fn test_missing_class_is_nan() {
        let e = engine(ScoringConfig::default());
        let s = e.score_one(&cand(5.0, "a", 2), &inst(0.0, "a"), 0);
        assert!(s.get(Metric::KFeasibility).is_nan());
        assert_eq!(s.get(Metric::DiscriminativePower), 0.0);
    }

    #[test]
    fn test_empty_candidates_score_to_empty_table() {
        let e = engine(ScoringConfig::default());
        let table = e.score(&[], &inst(0.0, "a"), 0).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.matrix(&[Metric::Proximity]).dim(), (0, 1));
        assert_eq!(table.columns()[1], "K_Feasibility(3)");
        assert_eq!(table.columns()[2], "DiscriminativePower(9)");
    }

    #[test]
    fn test_malformed_candidate_is_rejected() {
        let e = engine(ScoringConfig::default());
        let q = inst(10.0, "a");
        let short = Candidate {
            values: Instance::new(vec![FeatureValue::Continuous(10.0)]),
            predicted_class: 0,
            source: BackendKind::Cem,
        };
        let err = e.score(&[cand(5.0, "a", 1), short], &q, 0).unwrap_err();
        assert_eq!(err.stage(), "scoring");
        assert!(err.to_string().contains("Candidate 1"));

        let wrong_kind = Candidate {
            values: Instance::new(vec![FeatureValue::categorical("10"), FeatureValue::categorical("a")]),
            predicted_class: 1,
            source: BackendKind::Dice,
        };
        assert!(e.score(&[wrong_kind], &q, 0).is_err());
    }

    #[test]
    fn test_config_validation() {
        let zero_k = ScoringConfig {
            k_feasibility: 0,
            ..ScoringConfig::default()
        };
        assert!(zero_k.validate().is_err());
        let repeated = ScoringConfig {
            preference_ranking: vec![0, 0, 1, 2, 3, 4],
            ..ScoringConfig::default()
        };
        assert!(repeated.validate().is_err());
        let short = ScoringConfig {
            preference_ranking: vec![0, 1, 2],
            ..ScoringConfig::default()
        };
        assert!(short.validate().is_err());
    }

    #[test]
    fn test_preference_order_is_lexicographic() {
        let e = engine(ScoringConfig {
            preference_ranking: vec![4, 0, 1, 2, 3, 5],
            ..ScoringConfig::default()
        });
        let q = inst(0.0, "a");
        let table = e
            .score(&[cand(20.0, "b", 1), cand(9.0, "a", 0), cand(3.0, "a", 0)], &q, 0)
            .unwrap();
        assert_eq!(table.ranked_metrics()[0], Metric::Sparsity);
        // one change beats two; among single changes the closer one wins
        assert_eq!(table.preference_order(), vec![2, 1, 0]);
    }

    #[test]
    fn test_metric_parsing() {
        assert_eq!("K_Feasibility(3)".parse::<Metric>().unwrap(), Metric::KFeasibility);
        assert_eq!("proximity".parse::<Metric>().unwrap(), Metric::Proximity);
        assert!("Novelty".parse::<Metric>().is_err());
    }
}
