//! Starting values for the Dirichlet-multinomial regression.
//!
//! The empirical-logit start adds a pseudocount to every count so that no
//! proportion is zero, converts each sample to proportions, takes the log
//! ratio of every feature against the reference (last) feature and regresses
//! those log ratios on the design with the pseudoinverse. The zero start
//! begins from all-zero coefficients, i.e. equal proportions everywhere.

use super::linalg::pseudo_inverse;
use crate::error::{DmError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Pseudocount added before computing empirical proportions.
pub const PSEUDOCOUNT: f64 = 1.0;

/// Strategy for the optimizer's starting point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    /// Least-squares fit of pseudocounted empirical logits.
    #[default]
    EmpiricalLogit,
    /// All coefficients zero.
    Zero,
}

impl Initializer {
    /// Starting parameter vector of length `p * (q - 1)`.
    ///
    /// The layout is column-major over the `p x (q - 1)` transposed
    /// coefficient block: entry `k * p + l` is covariate `l` of feature `k`.
    pub fn start(&self, y: &DMatrix<f64>, x: &DMatrix<f64>) -> Result<Vec<f64>> {
        let q = y.nrows();
        let p = x.ncols();
        if q < 2 {
            return Err(DmError::InvalidParameter(
                "At least two features are needed for a start value".to_string(),
            ));
        }
        match self {
            Initializer::Zero => Ok(vec![0.0; p * (q - 1)]),
            Initializer::EmpiricalLogit => {
                if x.nrows() != y.ncols() {
                    return Err(DmError::DimensionMismatch {
                        expected: y.ncols(),
                        actual: x.nrows(),
                    });
                }
                let logits = empirical_logits(y, PSEUDOCOUNT)?;
                let bt = pseudo_inverse(x)? * logits;
                Ok(bt.as_slice().to_vec())
            }
        }
    }
}

/// Empirical log ratios against the last feature, `n x (q - 1)`.
pub fn empirical_logits(y: &DMatrix<f64>, pseudocount: f64) -> Result<DMatrix<f64>> {
    if pseudocount <= 0.0 {
        return Err(DmError::InvalidParameter(
            "Pseudocount must be positive".to_string(),
        ));
    }
    let q = y.nrows();
    let n = y.ncols();
    let shifted = y.add_scalar(pseudocount);

    // The per-sample normalization cancels in the ratio, but is kept
    // explicit so the values are true empirical proportions.
    let mut logits = DMatrix::zeros(n, q - 1);
    for i in 0..n {
        let total: f64 = shifted.column(i).sum();
        let reference = shifted[(q - 1, i)] / total;
        for k in 0..q - 1 {
            logits[(i, k)] = (shifted[(k, i)] / total / reference).ln();
        }
    }
    Ok(logits)
}
