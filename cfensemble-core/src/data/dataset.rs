//! Tabular datasets loaded from CSV files.

use std::collections::HashMap;
use std::path::Path;

use super::schema::FeatureSpace;
use super::value::{FeatureKind, FeatureValue, Instance};
use crate::error::{CfError, Result};

/// Rows of a dataset aligned with a [`FeatureSpace`], plus optional ground-truth targets.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    rows: Vec<Instance>,
    targets: Vec<Option<String>>,
}

impl Dataset {
    /// Build a dataset from already-typed rows, validating each one.
    pub fn new(space: &FeatureSpace, rows: Vec<Instance>) -> Result<Self> {
        for (i, row) in rows.iter().enumerate() {
            space
                .validate(row)
                .map_err(|e| CfError::dataset(format!("Row {i}: {e}")))?;
        }
        let targets = vec![None; rows.len()];
        Ok(Self { rows, targets })
    }

    /// Attach ground-truth labels, one per row.
    pub fn with_targets(mut self, targets: Vec<String>) -> Result<Self> {
        if targets.len() != self.rows.len() {
            return Err(CfError::dataset(format!(
                "Got {} targets for {} rows",
                targets.len(),
                self.rows.len()
            )));
        }
        self.targets = targets.into_iter().map(Some).collect();
        Ok(self)
    }

    /// Load a comma-separated file with a header line.
    ///
    /// Columns are matched to the space by header name, so the file may list
    /// them in any order. Unknown columns are skipped.
    pub fn from_csv(path: &Path, space: &FeatureSpace) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CfError::dataset(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::parse_csv(&content, space)
            .map_err(|e| CfError::dataset(format!("{}: {e}", path.display())))
    }

    pub fn parse_csv(content: &str, space: &FeatureSpace) -> Result<Self> {
        let mut lines = content.lines();
        let header: Vec<String> = lines
            .next()
            .map(split_record)
            .ok_or_else(|| CfError::dataset("Empty CSV file"))?;

        let positions: HashMap<&str, usize> = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let mut columns = Vec::with_capacity(space.len());
        for name in space.features() {
            let pos = positions
                .get(name.as_str())
                .copied()
                .ok_or_else(|| CfError::dataset(format!("Missing column '{name}'")))?;
            columns.push(pos);
        }
        let target_col = positions.get(space.target()).copied();
        let extra: Vec<&String> = header
            .iter()
            .filter(|name| space.index_of(name).is_none() && name.as_str() != space.target())
            .collect();
        if !extra.is_empty() {
            tracing::warn!(columns = ?extra, "Ignoring columns not in the feature space");
        }

        let mut rows = Vec::new();
        let mut targets = Vec::new();
        for (line_no, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let cells = split_record(line);
            if cells.len() != header.len() {
                return Err(CfError::dataset(format!(
                    "Row {line_no} has {} cells, header has {}",
                    cells.len(),
                    header.len()
                )));
            }
            let mut values = Vec::with_capacity(space.len());
            for (feature_idx, &col) in columns.iter().enumerate() {
                let cell = cells[col].as_str();
                let value = match space.kind(feature_idx) {
                    FeatureKind::Continuous => {
                        let v = cell.parse::<f64>().map_err(|_| {
                            CfError::dataset(format!(
                                "Row {line_no}, column '{}': '{cell}' is not a number",
                                space.features()[feature_idx]
                            ))
                        })?;
                        FeatureValue::Continuous(v)
                    }
                    FeatureKind::Categorical => FeatureValue::categorical(cell),
                };
                values.push(value);
            }
            rows.push(Instance::new(values));
            targets.push(target_col.map(|c| cells[c].clone()));
        }

        let dataset = Self::new(space, rows)?;
        Ok(Self { targets, ..dataset })
    }

    pub fn rows(&self) -> &[Instance] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Ground-truth label of a row, when the file carried the target column.
    pub fn target(&self, index: usize) -> Option<&str> {
        self.targets.get(index).and_then(|t| t.as_deref())
    }

    /// Select the instance to explain.
    pub fn instance(&self, index: usize) -> Result<&Instance> {
        self.rows.get(index).ok_or_else(|| {
            CfError::dataset(format!(
                "Index {index} is out of range; pass an index in range 0-{}",
                self.rows.len().saturating_sub(1)
            ))
        })
    }
}

/// Split one CSV line, honouring double-quoted fields and `""` escapes.
///
/// Quoted fields keep their content verbatim; unquoted ones are trimmed.
/// Records spanning several lines are not supported.
fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.trim().is_empty() && !quoted => {
                field.clear();
                quoted = true;
                in_quotes = true;
            }
            ',' if !in_quotes => {
                fields.push(finish_field(&mut field, quoted));
                quoted = false;
            }
            _ if quoted && !in_quotes => {}
            _ => field.push(ch),
        }
    }
    fields.push(finish_field(&mut field, quoted));
    fields
}

fn finish_field(field: &mut String, quoted: bool) -> String {
    let value = std::mem::take(field);
    if quoted { value } else { value.trim().to_string() }
}

/// Min/max of each continuous feature over the training set.
///
/// Computed once and reused for every distance so scores stay comparable
/// across queries.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRanges {
    ranges: Vec<Option<(f64, f64)>>,
}

impl TrainingRanges {
    pub fn fit(space: &FeatureSpace, training: &Dataset) -> Self {
        let ranges = space
            .kinds()
            .iter()
            .enumerate()
            .map(|(i, kind)| match kind {
                FeatureKind::Categorical => None,
                FeatureKind::Continuous => training
                    .rows()
                    .iter()
                    .filter_map(|row| row.get(i).and_then(FeatureValue::as_f64))
                    .fold(None, |acc: Option<(f64, f64)>, v| match acc {
                        None => Some((v, v)),
                        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
                    }),
            })
            .collect();
        Self { ranges }
    }

    pub fn get(&self, index: usize) -> Option<(f64, f64)> {
        self.ranges.get(index).copied().flatten()
    }

    /// `max - min` for a continuous feature, 0 when unknown.
    pub fn span(&self, index: usize) -> f64 {
        self.get(index).map(|(lo, hi)| hi - lo).unwrap_or(0.0)
    }
}
