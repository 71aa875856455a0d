//! Numerical helpers shared by the optimisation-based backends.
//!
//! Backends search in encoded space where every column lives in `[0, 1]`.
//! [`EncodedBounds`] keeps a search inside the actionable region of the
//! query; [`probability_jacobian`] supplies finite-difference gradients for
//! models that only expose probabilities.

use ndarray::{Array1, Array2, ArrayView1};

use super::{BackendContext, BackendKind, Query};
use crate::data::{FeatureKind, FeatureValue, Instance, Mutability};
use crate::error::BackendError;

/// Per-column box constraints derived from the actionability rules.
#[derive(Debug, Clone)]
pub struct EncodedBounds {
    lower: Array1<f64>,
    upper: Array1<f64>,
    frozen: Vec<bool>,
}

impl EncodedBounds {
    pub fn new(ctx: &BackendContext, query: &Query) -> Self {
        let width = ctx.encoder.width();
        let mut lower = Array1::zeros(width);
        let mut upper = Array1::ones(width);
        let mut frozen = vec![false; width];
        let rules = ctx.space.actionability();

        for feature in 0..ctx.space.len() {
            let rule = rules.rule(feature);
            for &col in ctx.encoder.span(feature) {
                let q = query.encoded[col];
                let (lo, hi) = match (ctx.space.kind(feature), rule) {
                    (_, Mutability::Immutable) => {
                        frozen[col] = true;
                        (q, q)
                    }
                    (FeatureKind::Continuous, Mutability::Increasing) => (q, 1.0),
                    (FeatureKind::Continuous, Mutability::Decreasing) => (0.0, q),
                    _ => (0.0, 1.0),
                };
                // the query itself must stay feasible even when it lies outside the training range
                lower[col] = lo.min(q);
                upper[col] = hi.max(q);
            }
        }
        Self {
            lower,
            upper,
            frozen,
        }
    }

    pub fn project(&self, x: &mut Array1<f64>) {
        for (i, v) in x.iter_mut().enumerate() {
            *v = v.clamp(self.lower[i], self.upper[i]);
        }
    }

    pub fn free_columns(&self) -> Vec<usize> {
        (0..self.frozen.len()).filter(|&c| !self.frozen[c]).collect()
    }

    pub fn lower(&self, col: usize) -> f64 {
        self.lower[col]
    }

    pub fn upper(&self, col: usize) -> f64 {
        self.upper[col]
    }
}

/// Class probabilities at `x` and their central-difference derivatives.
///
/// Row `k` of the returned Jacobian holds `∂p/∂x[cols[k]]`. All evaluations
/// go to the classifier in a single batch.
pub fn probability_jacobian(
    ctx: &BackendContext,
    kind: BackendKind,
    x: &Array1<f64>,
    cols: &[usize],
    step: f64,
) -> Result<(Array1<f64>, Array2<f64>), BackendError> {
    let width = x.len();
    let mut batch = Array2::zeros((1 + 2 * cols.len(), width));
    batch.row_mut(0).assign(x);
    for (k, &col) in cols.iter().enumerate() {
        let mut plus = x.clone();
        plus[col] += step;
        let mut minus = x.clone();
        minus[col] -= step;
        batch.row_mut(1 + 2 * k).assign(&plus);
        batch.row_mut(2 + 2 * k).assign(&minus);
    }
    let proba = ctx.proba(kind, batch.view())?;
    let base = proba.row(0).to_owned();
    let mut jac = Array2::zeros((cols.len(), proba.ncols()));
    for k in 0..cols.len() {
        let diff = (&proba.row(1 + 2 * k) - &proba.row(2 + 2 * k)) / (2.0 * step);
        jac.row_mut(k).assign(&diff);
    }
    Ok((base, jac))
}

/// Decode an encoded point and snap it onto the actionability rules exactly.
pub fn decode_candidate(
    ctx: &BackendContext,
    kind: BackendKind,
    query: &Query,
    row: ArrayView1<f64>,
) -> Result<Instance, BackendError> {
    let decoded = ctx
        .encoder
        .decode(row)
        .map_err(|e| BackendError::failed(kind, e.to_string()))?;
    let rules = ctx.space.actionability();
    let values = decoded
        .values()
        .iter()
        .zip(query.instance.values())
        .enumerate()
        .map(|(i, (value, original))| match (rules.rule(i), value, original) {
            (Mutability::Immutable, _, _) => original.clone(),
            (Mutability::Increasing, FeatureValue::Continuous(v), FeatureValue::Continuous(q)) => {
                FeatureValue::Continuous(v.max(*q))
            }
            (Mutability::Decreasing, FeatureValue::Continuous(v), FeatureValue::Continuous(q)) => {
                FeatureValue::Continuous(v.min(*q))
            }
            (_, value, _) => value.clone(),
        })
        .collect();
    Ok(Instance::new(values))
}

/// Whether each instance is classified differently from the query.
pub fn flips(
    ctx: &BackendContext,
    kind: BackendKind,
    query: &Query,
    instances: &[Instance],
) -> Result<Vec<bool>, BackendError> {
    Ok(ctx
        .predict_instances(kind, instances)?
        .into_iter()
        .map(|label| label != query.class)
        .collect())
}

/// Greedily restore query values on features the flip does not depend on.
pub fn revert_unneeded(
    ctx: &BackendContext,
    kind: BackendKind,
    query: &Query,
    candidate: Instance,
) -> Result<Instance, BackendError> {
    let mut current = candidate;
    for i in 0..current.len() {
        let (Some(value), Some(original)) = (current.get(i), query.instance.get(i)) else {
            continue;
        };
        if value.same_as(original) {
            continue;
        }
        let mut values = current.values().to_vec();
        values[i] = original.clone();
        let trial = Instance::new(values);
        if flips(ctx, kind, query, std::slice::from_ref(&trial))?[0] {
            current = trial;
        }
    }
    Ok(current)
}

/// L1 distance between two encoded rows.
pub fn l1(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

/// Keep the first of every group of identical instances.
pub fn dedup(instances: Vec<Instance>) -> Vec<Instance> {
    let mut unique: Vec<Instance> = Vec::with_capacity(instances.len());
    for instance in instances {
        if !unique.iter().any(|u| u.same_as(&instance)) {
            unique.push(instance);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::testing;
    use crate::data::FeatureSpace;

    #[test]
    fn test_bounds_respect_rules() {
        let space = FeatureSpace::new(
            vec![
                ("x".into(), FeatureKind::Continuous),
                ("y".into(), FeatureKind::Continuous),
                ("color".into(), FeatureKind::Categorical),
            ],
            "label",
        )
        .unwrap()
        .with_mutability("x", Mutability::Increasing)
        .unwrap()
        .with_mutability("color", Mutability::Immutable)
        .unwrap();
        let ctx = testing::context_for(space);
        let query = testing::low_query(&ctx);
        let bounds = EncodedBounds::new(&ctx, &query);
        assert_eq!(bounds.free_columns(), vec![0, 1]);
        assert!((bounds.lower(0) - 0.2).abs() < 1e-12);

        let mut x = Array1::from(vec![0.0, 2.0, 1.0, 0.0]);
        bounds.project(&mut x);
        assert!((x[0] - 0.2).abs() < 1e-12);
        assert_eq!(x[1], 1.0);
        // color block frozen at "red"
        assert_eq!(x[2], 0.0);
        assert_eq!(x[3], 1.0);
    }

    #[test]
    fn test_jacobian_sign() {
        let ctx = testing::context();
        let query = testing::low_query(&ctx);
        let (p, jac) =
            probability_jacobian(&ctx, BackendKind::Wachter, &query.encoded, &[0, 1], 1e-4).unwrap();
        assert!(p[0] > p[1]);
        // increasing x raises the probability of class 1
        assert!(jac[[0, 1]] > 0.0);
        assert!(jac[[1, 0]] < 0.0);
    }

    #[test]
    fn test_revert_unneeded_keeps_flip() {
        let ctx = testing::context();
        let query = testing::low_query(&ctx);
        let candidate = Instance::new(vec![
            FeatureValue::Continuous(2.0),
            FeatureValue::Continuous(10.0),
            FeatureValue::categorical("blue"),
        ]);
        let reverted = revert_unneeded(&ctx, BackendKind::Cfproto, &query, candidate).unwrap();
        assert_eq!(reverted.get(2), Some(&FeatureValue::categorical("red")));
        assert_eq!(reverted.get(1), Some(&FeatureValue::Continuous(10.0)));
    }
}
