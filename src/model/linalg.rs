//! Linear-algebra helpers shared by the regression fits.

use crate::error::{DmError, Result};
use nalgebra::DMatrix;

/// Moore-Penrose pseudoinverse via SVD.
///
/// Singular values below `sqrt(eps) * max(singular value)` are treated as
/// zero, so rank-deficient designs still yield the minimum-norm solution.
pub fn pseudo_inverse(m: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    if m.nrows() == 0 || m.ncols() == 0 {
        return Ok(DMatrix::zeros(m.ncols(), m.nrows()));
    }
    if m.iter().any(|v| !v.is_finite()) {
        return Err(DmError::Numerical(
            "Cannot invert a matrix with non-finite entries".to_string(),
        ));
    }
    let svd = m.clone().svd(true, true);
    let max_sv = svd.singular_values.max();
    let tol = f64::EPSILON.sqrt() * max_sv.max(f64::MIN_POSITIVE);
    svd.pseudo_inverse(tol)
        .map_err(|e| DmError::Numerical(format!("Pseudoinverse failed: {}", e)))
}

/// Distinct rows of a design matrix.
#[derive(Debug, Clone)]
pub struct DistinctRows {
    /// Distinct rows in order of first appearance.
    pub rows: DMatrix<f64>,
    /// For each distinct row, the first sample carrying it.
    pub first_sample: Vec<usize>,
    /// For each sample, the index of its distinct row.
    pub group_of_sample: Vec<usize>,
}

impl DistinctRows {
    /// Number of distinct rows.
    pub fn len(&self) -> usize {
        self.first_sample.len()
    }

    /// Check if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.first_sample.is_empty()
    }

    /// Samples belonging to each distinct row.
    pub fn members(&self) -> Vec<Vec<usize>> {
        let mut members = vec![Vec::new(); self.len()];
        for (sample, &group) in self.group_of_sample.iter().enumerate() {
            members[group].push(sample);
        }
        members
    }
}

/// Deduplicate the rows of `x` by exact equality.
pub fn distinct_rows(x: &DMatrix<f64>) -> DistinctRows {
    let n = x.nrows();
    let p = x.ncols();
    let mut keys: Vec<Vec<u64>> = Vec::new();
    let mut first_sample = Vec::new();
    let mut group_of_sample = Vec::with_capacity(n);

    for i in 0..n {
        // Normalize -0.0 so that it matches 0.0.
        let key: Vec<u64> = (0..p).map(|j| (x[(i, j)] + 0.0).to_bits()).collect();
        match keys.iter().position(|k| *k == key) {
            Some(g) => group_of_sample.push(g),
            None => {
                keys.push(key);
                first_sample.push(i);
                group_of_sample.push(keys.len() - 1);
            }
        }
    }

    let rows = x.select_rows(first_sample.iter());
    DistinctRows {
        rows,
        first_sample,
        group_of_sample,
    }
}

/// Reorder the rows of `x` so that row `i` of the result is row `order[i]` of `x`.
pub fn permute_rows(x: &DMatrix<f64>, order: &[usize]) -> DMatrix<f64> {
    x.select_rows(order.iter())
}

/// Check whether all rows of `x` are identical (e.g. an intercept-only design).
pub fn rows_identical(x: &DMatrix<f64>) -> bool {
    distinct_rows(x).len() <= 1
}
