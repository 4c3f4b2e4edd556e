//! Beta-binomial recount regression.
//!
//! Treats every feature of a gene as a beta-binomial count out of the
//! sample total, with success probability given by a proportion surface that
//! has already been fitted by the DM regression. Nothing is optimized here:
//! the per-feature log-likelihoods are evaluated in closed form and the
//! coefficients are re-estimated by regressing the logit of the fitted
//! proportions on the distinct rows of the design.
//!
//! # Mathematical Formulation
//!
//! For feature j with proportion π_ij, sample total m_i and precision γ:
//!
//! ℓ_j = Σ_i [ lnΓ(y_ij + γπ_ij) - lnΓ(γπ_ij)
//!           + lnΓ(m_i - y_ij + γ(1-π_ij)) - lnΓ(γ(1-π_ij))
//!           + lnΓ(γ) - lnΓ(m_i + γ) ]

use super::linalg::{distinct_rows, pseudo_inverse};
use nalgebra::{DMatrix, DVector};
use statrs::function::gamma::ln_gamma;
use std::borrow::Cow;

/// Result of a beta-binomial recount for one gene.
#[derive(Debug, Clone)]
pub struct BbFit<'a> {
    /// Coefficients, q x p.
    pub coefficients: DMatrix<f64>,
    /// Per-feature log-likelihoods, length q.
    pub log_likelihood: DVector<f64>,
    /// The proportion surface the recount was computed from (q x n).
    pub proportions: Cow<'a, DMatrix<f64>>,
}

impl BbFit<'_> {
    /// Whether every feature has a likelihood.
    pub fn is_defined(&self) -> bool {
        !self.log_likelihood.is_empty() && self.log_likelihood.iter().all(|v| v.is_finite())
    }

    /// Number of features.
    pub fn n_features(&self) -> usize {
        self.log_likelihood.len()
    }
}

/// Closed-form per-feature BB log-likelihood.
///
/// Entries are NaN for a feature whose proportions are undefined.
pub fn bb_log_likelihood(y: &DMatrix<f64>, precision: f64, proportions: &DMatrix<f64>) -> DVector<f64> {
    let q = y.nrows();
    let totals: Vec<f64> = y.column_iter().map(|c| c.sum()).collect();
    let lg_prec = ln_gamma(precision);

    DVector::from_fn(q, |j, _| {
        let mut lik = 0.0;
        for (i, &m) in totals.iter().enumerate() {
            let count = y[(j, i)];
            let a = precision * proportions[(j, i)];
            let b = precision * (1.0 - proportions[(j, i)]);
            lik += ln_gamma(count + a) - ln_gamma(a) + ln_gamma(m - count + b) - ln_gamma(b)
                + lg_prec
                - ln_gamma(m + precision);
        }
        if lik.is_nan() || lik == f64::INFINITY {
            f64::NAN
        } else {
            lik
        }
    })
}

/// Re-estimate q x p coefficients from fitted proportions.
///
/// Each distinct design row maps to one proportion per feature, taken from
/// the first sample carrying that row.
pub fn bb_coefficients(x: &DMatrix<f64>, proportions: &DMatrix<f64>) -> DMatrix<f64> {
    let q = proportions.nrows();
    let p = x.ncols();
    let groups = distinct_rows(x);

    let logits = DMatrix::from_fn(groups.len(), q, |g, j| {
        let pi = proportions[(j, groups.first_sample[g])];
        (pi / (1.0 - pi)).ln()
    });

    match pseudo_inverse(&groups.rows) {
        Ok(pinv) => (pinv * logits).transpose(),
        Err(e) => {
            log::debug!("BB coefficient recovery failed: {}", e);
            DMatrix::from_element(q, p, f64::NAN)
        }
    }
}

/// Beta-binomial recount of counts `y` (q x n) against DM-fitted proportions.
///
/// Degenerate input (fewer than two features, undefined precision or an
/// undefined proportion surface) yields NaN coefficients and likelihoods,
/// and an all-NaN proportion surface of the same shape.
pub fn bb_fit_regression<'a>(
    y: &DMatrix<f64>,
    x: &DMatrix<f64>,
    precision: Option<f64>,
    proportions: &'a DMatrix<f64>,
) -> BbFit<'a> {
    let q = y.nrows();
    let n = y.ncols();
    let p = x.ncols();
    debug_assert_eq!(proportions.shape(), (q, n));

    let defined = proportions.iter().all(|v| !v.is_nan());
    let precision = match precision.filter(|g| g.is_finite() && *g > 0.0) {
        Some(g) if q >= 2 && defined => g,
        _ => {
            let proportions = if defined {
                Cow::Owned(DMatrix::from_element(q, n, f64::NAN))
            } else {
                Cow::Borrowed(proportions)
            };
            return BbFit {
                coefficients: DMatrix::from_element(q, p, f64::NAN),
                log_likelihood: DVector::from_element(q, f64::NAN),
                proportions,
            };
        }
    };

    BbFit {
        coefficients: bb_coefficients(x, proportions),
        log_likelihood: bb_log_likelihood(y, precision, proportions),
        proportions: Cow::Borrowed(proportions),
    }
}
