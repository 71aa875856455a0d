//! Pareto-front selection over a candidate × metric matrix.
//!
//! Row `i` dominates row `j` when, with every `Max` column negated, `i` is no
//! worse than `j` on every column and strictly better on at least one.
//! Identical rows never dominate each other, so both stay on the front.
//!
//! Rows holding a NaN or infinite value are excluded: their mask entry is
//! `false` and they take no part in dominance checks against other rows.

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ParetoError;

/// Optimization direction of one metric column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[serde(alias = "minimize")]
    Min,
    #[serde(alias = "maximize")]
    Max,
}

impl Direction {
    /// Value oriented so that smaller is always better.
    fn orient(self, value: f64) -> f64 {
        match self {
            Direction::Min => value,
            Direction::Max => -value,
        }
    }
}

fn dominates(a: ArrayView1<f64>, b: ArrayView1<f64>, directions: &[Direction]) -> bool {
    let mut strictly_better = false;
    for ((&x, &y), dir) in a.iter().zip(b.iter()).zip(directions) {
        let (x, y) = (dir.orient(x), dir.orient(y));
        if x > y {
            return false;
        }
        if x < y {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Boolean mask of non-dominated rows.
pub fn pareto_mask(matrix: ArrayView2<f64>, directions: &[Direction]) -> Result<Vec<bool>, ParetoError> {
    if directions.len() != matrix.ncols() {
        return Err(ParetoError::DirectionCount {
            expected: matrix.ncols(),
            actual: directions.len(),
        });
    }
    let finite: Vec<bool> = matrix
        .rows()
        .into_iter()
        .map(|row| row.iter().all(|v| v.is_finite()))
        .collect();
    let excluded = finite.iter().filter(|f| !**f).count();
    if excluded > 0 {
        warn!(excluded, rows = matrix.nrows(), "Rows with non-finite metrics excluded from Pareto front");
    }

    let mask = (0..matrix.nrows())
        .map(|i| {
            finite[i]
                && !(0..matrix.nrows()).any(|j| {
                    j != i && finite[j] && dominates(matrix.row(j), matrix.row(i), directions)
                })
        })
        .collect();
    Ok(mask)
}

/// Indices of the rows on the front.
pub fn pareto_indices(matrix: ArrayView2<f64>, directions: &[Direction]) -> Result<Vec<usize>, ParetoError> {
    Ok(pareto_mask(matrix, directions)?
        .into_iter()
        .enumerate()
        .filter_map(|(i, keep)| keep.then_some(i))
        .collect())
}
