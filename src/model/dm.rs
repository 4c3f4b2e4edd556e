//! Dirichlet-multinomial regression for feature-usage proportions.
//!
//! Models the q x n count matrix of one gene with a multinomial-logit link:
//! for sample i and non-reference feature k,
//!
//! - η_ik = x_i · b_k, z_ik = exp(η_ik)
//! - π_ik = z_ik / (1 + Σ_k z_ik), π_iq = 1 - Σ_k π_ik
//!
//! where the last feature is the reference and its coefficient row is fixed
//! at zero. Given a precision γ the log-likelihood (without the multinomial
//! constant) is
//!
//! ℓ = Σ_i [ lnΓ(γ) - lnΓ(m_i + γ) + Σ_j ( lnΓ(y_ij + γπ_ij) - lnΓ(γπ_ij) ) ]
//!
//! with m_i the total count of sample i. Coefficients are found by
//! maximizing ℓ with one of the configurable optimizer backends.

use super::init::Initializer;
use super::linalg::{distinct_rows, pseudo_inverse};
use crate::optim::{Objective, OptimizerConfig};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::{digamma, ln_gamma};

/// How a gene's DM model is fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStrategy {
    /// Direct regression on the full design.
    #[default]
    Regression,
    /// Per-group intercept fits when the design is a one-way layout;
    /// falls back to regression otherwise.
    OneWay,
}

/// Configuration of a DM fit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Optimizer backend and stopping rule.
    pub optimizer: OptimizerConfig,
    /// Starting-value strategy.
    pub initializer: Initializer,
    /// Regression or one-way fitting.
    pub strategy: FitStrategy,
}

/// Result of a DM fit for one gene.
///
/// When the fit is degenerate (fewer than two features, undefined
/// precision) or the optimizer did not converge, every entry is NaN but the
/// shapes are preserved.
#[derive(Debug, Clone)]
pub struct DmFit {
    /// Coefficients, q x p; the last (reference) row is zero.
    pub coefficients: DMatrix<f64>,
    /// Maximized log-likelihood.
    pub log_likelihood: f64,
    /// Fitted proportions, q x n; columns sum to one.
    pub proportions: DMatrix<f64>,
}

impl DmFit {
    /// An all-undefined fit of the given shape.
    pub fn undefined(n_features: usize, n_coef: usize, n_samples: usize) -> Self {
        Self {
            coefficients: DMatrix::from_element(n_features, n_coef, f64::NAN),
            log_likelihood: f64::NAN,
            proportions: DMatrix::from_element(n_features, n_samples, f64::NAN),
        }
    }

    /// Whether the fit produced a likelihood.
    pub fn is_defined(&self) -> bool {
        self.log_likelihood.is_finite()
    }

    /// Number of features.
    pub fn n_features(&self) -> usize {
        self.proportions.nrows()
    }

    /// Number of samples.
    pub fn n_samples(&self) -> usize {
        self.proportions.ncols()
    }
}

/// Validated precision, or `None` for degenerate input.
fn usable_precision(precision: Option<f64>) -> Option<f64> {
    precision.filter(|g| g.is_finite() && *g > 0.0)
}

/// Transposed coefficient block (p x (q-1)) from the flat parameter vector.
fn coefficient_block(params: &[f64], n_coef: usize, n_free: usize) -> DMatrix<f64> {
    DMatrix::from_column_slice(n_coef, n_free, params)
}

/// Stack the non-reference coefficients (p x (q-1)) and a zero reference row.
fn with_reference_row(bt: &DMatrix<f64>) -> DMatrix<f64> {
    let free = bt.transpose();
    let rows = free.nrows();
    free.insert_row(rows, 0.0)
}

/// Fitted proportions (q x n) for a design and transposed coefficient block.
pub fn dm_proportions(x: &DMatrix<f64>, bt: &DMatrix<f64>) -> DMatrix<f64> {
    let n = x.nrows();
    let q = bt.ncols() + 1;
    let z = (x * bt).map(f64::exp);

    let mut pi = DMatrix::zeros(q, n);
    for i in 0..n {
        let denom = 1.0 + z.row(i).sum();
        let mut used = 0.0;
        for k in 0..q - 1 {
            let v = z[(i, k)] / denom;
            pi[(k, i)] = v;
            used += v;
        }
        pi[(q - 1, i)] = 1.0 - used;
    }
    pi
}

/// DM regression objective for a single gene.
pub struct DmRegression<'a> {
    y: &'a DMatrix<f64>,
    x: &'a DMatrix<f64>,
    precision: f64,
    /// lnΓ(γ) - lnΓ(m_i + γ) summed over samples.
    constant: f64,
}

impl<'a> DmRegression<'a> {
    pub fn new(y: &'a DMatrix<f64>, x: &'a DMatrix<f64>, precision: f64) -> Self {
        let lg_prec = ln_gamma(precision);
        let constant = y
            .column_iter()
            .map(|col| lg_prec - ln_gamma(col.sum() + precision))
            .sum();
        Self {
            y,
            x,
            precision,
            constant,
        }
    }

    fn n_free(&self) -> usize {
        self.y.nrows() - 1
    }

    fn proportions(&self, params: &[f64]) -> DMatrix<f64> {
        let bt = coefficient_block(params, self.x.ncols(), self.n_free());
        dm_proportions(self.x, &bt)
    }
}

impl Objective for DmRegression<'_> {
    fn value(&self, params: &[f64]) -> f64 {
        let pi = self.proportions(params);
        if pi.iter().any(|v| !(*v > 0.0)) {
            return f64::NEG_INFINITY;
        }

        let mut lik = self.constant;
        for (y, p) in self.y.iter().zip(pi.iter()) {
            let g = self.precision * p;
            lik += ln_gamma(y + g) - ln_gamma(g);
        }
        if lik.is_finite() {
            lik
        } else {
            f64::NEG_INFINITY
        }
    }

    fn gradient(&self, params: &[f64]) -> Vec<f64> {
        let q = self.y.nrows();
        let n = self.y.ncols();
        let p = self.x.ncols();
        let pi = self.proportions(params);

        // dℓ/dη_ik = π_ik (a_ik - Σ_j a_ij π_ij) with a_ij = γ(ψ(y_ij + γπ_ij) - ψ(γπ_ij)).
        let mut d_eta = DMatrix::zeros(n, q - 1);
        let mut a = vec![0.0; q];
        for i in 0..n {
            let mut weighted = 0.0;
            for j in 0..q {
                let g = self.precision * pi[(j, i)];
                a[j] = self.precision * (digamma(self.y[(j, i)] + g) - digamma(g));
                weighted += a[j] * pi[(j, i)];
            }
            for k in 0..q - 1 {
                d_eta[(i, k)] = pi[(k, i)] * (a[k] - weighted);
            }
        }

        // p x (q-1), flattened column-major like the parameters.
        let grad = self.x.transpose() * d_eta;
        debug_assert_eq!(grad.len(), p * (q - 1));
        grad.as_slice().to_vec()
    }
}

/// Fit a gene with the configured strategy.
pub fn dm_fit(
    y: &DMatrix<f64>,
    x: &DMatrix<f64>,
    precision: Option<f64>,
    config: &FitConfig,
) -> DmFit {
    match config.strategy {
        FitStrategy::Regression => dm_fit_regression(y, x, precision, config),
        FitStrategy::OneWay => dm_fit_one_way(y, x, precision, config),
    }
}

/// Fit the DM regression of counts `y` (q x n) on design `x` (n x p).
///
/// Never fails: degenerate input and non-convergence both return
/// [`DmFit::undefined`].
pub fn dm_fit_regression(
    y: &DMatrix<f64>,
    x: &DMatrix<f64>,
    precision: Option<f64>,
    config: &FitConfig,
) -> DmFit {
    let q = y.nrows();
    let n = y.ncols();
    let p = x.ncols();
    debug_assert_eq!(x.nrows(), n);

    let precision = match usable_precision(precision) {
        Some(g) if q >= 2 => g,
        _ => return DmFit::undefined(q, p, n),
    };

    let init = match config.initializer.start(y, x) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("DM start value failed: {}", e);
            return DmFit::undefined(q, p, n);
        }
    };

    let objective = DmRegression::new(y, x, precision);
    let optimizer = config.optimizer.build();
    let outcome = optimizer.maximize(&objective, &init);

    if !outcome.converged || !outcome.objective_value.is_finite() {
        log::debug!(
            "DM fit did not converge ({} backend, {} features, {} samples)",
            optimizer.name(),
            q,
            n
        );
        return DmFit::undefined(q, p, n);
    }

    let bt = coefficient_block(&outcome.parameters, p, q - 1);
    DmFit {
        coefficients: with_reference_row(&bt),
        log_likelihood: outcome.objective_value,
        proportions: dm_proportions(x, &bt),
    }
}

/// Fit a one-way layout group by group.
///
/// Each distinct design row is fitted with an intercept-only model on its
/// own samples. Sample proportions are the group proportions, the
/// likelihood is the sum over groups, and coefficients are recovered from
/// the group log ratios against the reference feature.
pub fn dm_fit_one_way(
    y: &DMatrix<f64>,
    x: &DMatrix<f64>,
    precision: Option<f64>,
    config: &FitConfig,
) -> DmFit {
    let q = y.nrows();
    let n = y.ncols();
    let p = x.ncols();

    if q < 2 || usable_precision(precision).is_none() {
        return DmFit::undefined(q, p, n);
    }

    let groups = distinct_rows(x);
    if groups.len() != p {
        return dm_fit_regression(y, x, precision, config);
    }

    let group_config = FitConfig {
        strategy: FitStrategy::Regression,
        ..*config
    };

    let mut group_props = DMatrix::zeros(q, groups.len());
    let mut log_likelihood = 0.0;
    for (g, members) in groups.members().iter().enumerate() {
        let yg = y.select_columns(members.iter());
        let ones = DMatrix::from_element(members.len(), 1, 1.0);
        let fit = dm_fit_regression(&yg, &ones, precision, &group_config);
        if !fit.is_defined() {
            return DmFit::undefined(q, p, n);
        }
        group_props.set_column(g, &fit.proportions.column(0));
        log_likelihood += fit.log_likelihood;
    }

    // Log ratios against the reference, one row per group.
    let mut log_ratios = DMatrix::zeros(groups.len(), q - 1);
    for g in 0..groups.len() {
        for k in 0..q - 1 {
            log_ratios[(g, k)] = (group_props[(k, g)] / group_props[(q - 1, g)]).ln();
        }
    }
    let bt = match pseudo_inverse(&groups.rows) {
        Ok(pinv) => pinv * log_ratios,
        Err(e) => {
            log::debug!("One-way coefficient recovery failed: {}", e);
            return DmFit::undefined(q, p, n);
        }
    };

    let mut proportions = DMatrix::zeros(q, n);
    for (i, &g) in groups.group_of_sample.iter().enumerate() {
        proportions.set_column(i, &group_props.column(g));
    }

    DmFit {
        coefficients: with_reference_row(&bt),
        log_likelihood,
        proportions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::OptimizerBackend;
    use approx::assert_relative_eq;

    fn two_group_design(n_per_group: usize) -> DMatrix<f64> {
        let n = 2 * n_per_group;
        DMatrix::from_fn(n, 2, |i, j| {
            if j == 0 || i >= n_per_group {
                1.0
            } else {
                0.0
            }
        })
    }

    fn assert_columns_sum_to_one(fit: &DmFit) {
        for col in fit.proportions.column_iter() {
            assert_relative_eq!(col.sum(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_intercept_only_example() {
        let y = DMatrix::from_row_slice(2, 3, &[10.0, 10.0, 10.0, 5.0, 5.0, 5.0]);
        let x = DMatrix::from_element(3, 1, 1.0);
        let fit = dm_fit_regression(&y, &x, Some(50.0), &FitConfig::default());

        assert!(fit.is_defined());
        assert_eq!(fit.proportions.shape(), (2, 3));
        for i in 0..3 {
            assert_relative_eq!(fit.proportions[(0, i)], 2.0 / 3.0, epsilon = 0.01);
            assert_relative_eq!(fit.proportions[(1, i)], 1.0 / 3.0, epsilon = 0.01);
        }
        assert_columns_sum_to_one(&fit);
        assert_eq!(fit.coefficients.shape(), (2, 1));
        assert_eq!(fit.coefficients[(1, 0)], 0.0);
    }

    #[test]
    fn test_degenerate_single_feature() {
        let y = DMatrix::from_row_slice(1, 3, &[4.0, 5.0, 6.0]);
        let x = DMatrix::from_element(3, 2, 1.0);
        let fit = dm_fit_regression(&y, &x, Some(10.0), &FitConfig::default());

        assert!(!fit.is_defined());
        assert_eq!(fit.coefficients.shape(), (1, 2));
        assert_eq!(fit.proportions.shape(), (1, 3));
        assert!(fit.coefficients.iter().all(|v| v.is_nan()));
        assert!(fit.proportions.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_degenerate_undefined_precision() {
        let y = DMatrix::from_row_slice(2, 2, &[4.0, 5.0, 6.0, 7.0]);
        let x = DMatrix::from_element(2, 1, 1.0);

        for precision in [None, Some(f64::NAN), Some(-1.0), Some(0.0)] {
            let fit = dm_fit(&y, &x, precision, &FitConfig::default());
            assert!(!fit.is_defined());
            assert!(fit.log_likelihood.is_nan());
            assert_eq!(fit.proportions.shape(), (2, 2));
        }
    }

    #[test]
    fn test_group_effect_and_reference_row() {
        let y = DMatrix::from_row_slice(
            3,
            6,
            &[
                30.0, 28.0, 32.0, 10.0, 12.0, 9.0, //
                20.0, 22.0, 19.0, 20.0, 18.0, 21.0, //
                10.0, 11.0, 9.0, 30.0, 29.0, 31.0,
            ],
        );
        let x = two_group_design(3);
        let fit = dm_fit_regression(&y, &x, Some(100.0), &FitConfig::default());

        assert!(fit.is_defined());
        assert_eq!(fit.coefficients.shape(), (3, 2));
        assert_eq!(fit.coefficients.row(2).iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0]);
        assert_columns_sum_to_one(&fit);

        // Feature 0 drops relative to the reference in group 2.
        assert!(fit.coefficients[(0, 1)] < -1.0);
        assert!(fit.proportions[(0, 0)] > fit.proportions[(0, 5)]);
    }

    #[test]
    fn test_backends_agree() {
        let y = DMatrix::from_row_slice(
            3,
            6,
            &[
                15.0, 17.0, 14.0, 8.0, 7.0, 9.0, //
                10.0, 9.0, 11.0, 10.0, 12.0, 9.0, //
                5.0, 6.0, 4.0, 12.0, 11.0, 13.0,
            ],
        );
        let x = two_group_design(3);

        let reference = dm_fit_regression(&y, &x, Some(40.0), &FitConfig::default());
        assert!(reference.is_defined());

        for backend in [OptimizerBackend::Lbfgs, OptimizerBackend::Newton] {
            let config = FitConfig {
                optimizer: OptimizerConfig {
                    tolerance: 1e-10,
                    ..OptimizerConfig::with_backend(backend)
                },
                ..Default::default()
            };
            let fit = dm_fit_regression(&y, &x, Some(40.0), &config);
            assert!(fit.is_defined(), "{:?} failed", backend);
            assert_relative_eq!(fit.log_likelihood, reference.log_likelihood, epsilon = 1e-4);
            assert_columns_sum_to_one(&fit);
        }
    }

    #[test]
    fn test_zero_initializer_reaches_same_optimum() {
        let y = DMatrix::from_row_slice(2, 4, &[12.0, 14.0, 3.0, 4.0, 6.0, 5.0, 9.0, 10.0]);
        let x = two_group_design(2);

        let empirical = dm_fit_regression(&y, &x, Some(25.0), &FitConfig::default());
        let zero = dm_fit_regression(
            &y,
            &x,
            Some(25.0),
            &FitConfig {
                initializer: Initializer::Zero,
                ..Default::default()
            },
        );

        assert!(empirical.is_defined() && zero.is_defined());
        assert_relative_eq!(empirical.log_likelihood, zero.log_likelihood, epsilon = 1e-6);
    }

    #[test]
    fn test_one_way_matches_regression() {
        let y = DMatrix::from_row_slice(
            3,
            6,
            &[
                30.0, 28.0, 32.0, 10.0, 12.0, 9.0, //
                20.0, 22.0, 19.0, 20.0, 18.0, 21.0, //
                10.0, 11.0, 9.0, 30.0, 29.0, 31.0,
            ],
        );
        let x = two_group_design(3);

        let regression = dm_fit_regression(&y, &x, Some(60.0), &FitConfig::default());
        let one_way = dm_fit_one_way(&y, &x, Some(60.0), &FitConfig::default());

        assert!(one_way.is_defined());
        assert_relative_eq!(one_way.log_likelihood, regression.log_likelihood, epsilon = 1e-4);
        for (a, b) in one_way.coefficients.iter().zip(regression.coefficients.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-3);
        }
        assert_columns_sum_to_one(&one_way);
    }

    #[test]
    fn test_one_way_falls_back_for_continuous_design() {
        let y = DMatrix::from_row_slice(2, 4, &[10.0, 12.0, 14.0, 16.0, 10.0, 9.0, 8.0, 7.0]);
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);

        let config = FitConfig {
            strategy: FitStrategy::OneWay,
            ..Default::default()
        };
        let fit = dm_fit(&y, &x, Some(30.0), &config);
        let direct = dm_fit_regression(&y, &x, Some(30.0), &FitConfig::default());

        assert!(fit.is_defined());
        assert_relative_eq!(fit.log_likelihood, direct.log_likelihood, epsilon = 1e-10);
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let y = DMatrix::from_row_slice(3, 4, &[5.0, 8.0, 2.0, 7.0, 3.0, 3.0, 6.0, 1.0, 4.0, 2.0, 5.0, 6.0]);
        let x = two_group_design(2);
        let objective = DmRegression::new(&y, &x, 15.0);
        let params = vec![0.2, -0.3, 0.1, 0.4];

        let grad = objective.gradient(&params);
        let h = 1e-6;
        for k in 0..params.len() {
            let mut up = params.clone();
            let mut down = params.clone();
            up[k] += h;
            down[k] -= h;
            let numeric = (objective.value(&up) - objective.value(&down)) / (2.0 * h);
            assert_relative_eq!(grad[k], numeric, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_log_likelihood_is_negative_and_finite() {
        let y = DMatrix::from_row_slice(2, 2, &[3.0, 4.0, 5.0, 6.0]);
        let x = DMatrix::from_element(2, 1, 1.0);
        let ll = DmRegression::new(&y, &x, 10.0).value(&[0.0]);
        assert!(ll.is_finite());
        assert!(ll < 0.0);
    }

    #[test]
    fn test_rank_deficient_design_fits() {
        let y = DMatrix::from_row_slice(
            3,
            6,
            &[
                30.0, 28.0, 32.0, 10.0, 12.0, 9.0, //
                20.0, 22.0, 19.0, 20.0, 18.0, 21.0, //
                10.0, 11.0, 9.0, 30.0, 29.0, 31.0,
            ],
        );
        let x = two_group_design(3);
        // Group column duplicated.
        let duplicated = DMatrix::from_fn(6, 3, |i, j| x[(i, j.min(1))]);
        let full_rank = dm_fit_regression(&y, &x, Some(60.0), &FitConfig::default());

        for backend in [OptimizerBackend::Bfgs, OptimizerBackend::Lbfgs, OptimizerBackend::Newton] {
            for strategy in [FitStrategy::Regression, FitStrategy::OneWay] {
                let config = FitConfig {
                    optimizer: OptimizerConfig::with_backend(backend),
                    strategy,
                    ..Default::default()
                };
                let fit = dm_fit(&y, &duplicated, Some(60.0), &config);
                assert!(fit.is_defined(), "{:?} / {:?} failed", backend, strategy);
                assert_eq!(fit.coefficients.shape(), (3, 3));
                assert_columns_sum_to_one(&fit);
                assert_relative_eq!(fit.log_likelihood, full_rank.log_likelihood, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_iteration_cap_gives_undefined_fit() {
        let y = DMatrix::from_row_slice(
            3,
            6,
            &[
                30.0, 28.0, 32.0, 10.0, 12.0, 9.0, //
                20.0, 22.0, 19.0, 20.0, 18.0, 21.0, //
                10.0, 11.0, 9.0, 30.0, 29.0, 31.0,
            ],
        );
        let x = two_group_design(3);
        let config = FitConfig {
            optimizer: OptimizerConfig {
                max_iter: 1,
                ..Default::default()
            },
            initializer: Initializer::Zero,
            ..Default::default()
        };

        let fit = dm_fit_regression(&y, &x, Some(60.0), &config);
        assert!(!fit.is_defined());
        assert!(fit.log_likelihood.is_nan());
        assert_eq!(fit.coefficients.shape(), (3, 2));
        assert!(fit.proportions.iter().all(|v| v.is_nan()));
    }
}
