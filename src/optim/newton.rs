//! Damped Newton minimizer of the negated objective.
//!
//! The Hessian is obtained by central differences of the analytic gradient
//! and symmetrized. When it is not positive definite a ridge is added until
//! a Cholesky factorization succeeds, which turns the step into a
//! Levenberg-style compromise between Newton and steepest descent. Steps are
//! then shortened by halving until the objective improves.
//!
//! Convergence is declared when the scaled gradient falls below
//! [`GRAD_TOL`] or an accepted step changes the objective by less than the
//! configured relative tolerance.

use super::{relative_change_small, Objective, OptimOutcome, Optimizer};
use nalgebra::{Cholesky, DMatrix, DVector};

/// Scaled-gradient convergence threshold.
pub const GRAD_TOL: f64 = 1e-6;

/// Maximum number of step halvings per iteration.
const MAX_HALVINGS: usize = 40;

/// Initial ridge added to a non positive definite Hessian.
const RIDGE_START: f64 = 1e-6;

/// Damped Newton minimizer.
#[derive(Debug, Clone, Copy)]
pub struct NewtonDescent {
    tolerance: f64,
    max_iter: usize,
}

impl NewtonDescent {
    pub fn new(tolerance: f64, max_iter: usize) -> Self {
        Self {
            tolerance,
            max_iter: max_iter.max(1),
        }
    }
}

fn neg_gradient(objective: &dyn Objective, x: &DVector<f64>) -> DVector<f64> {
    -DVector::from_vec(objective.gradient(x.as_slice()))
}

/// Hessian of the negated objective by central differences of the gradient.
fn numeric_hessian(objective: &dyn Objective, x: &DVector<f64>) -> DMatrix<f64> {
    let n = x.len();
    let mut h = DMatrix::zeros(n, n);
    let mut probe = x.clone();
    for j in 0..n {
        let step = f64::EPSILON.cbrt() * x[j].abs().max(1.0);
        probe[j] = x[j] + step;
        let g_plus = neg_gradient(objective, &probe);
        probe[j] = x[j] - step;
        let g_minus = neg_gradient(objective, &probe);
        probe[j] = x[j];
        h.set_column(j, &((g_plus - g_minus) / (2.0 * step)));
    }
    (&h + h.transpose()) * 0.5
}

/// Solve H d = -g, adding a ridge to H until it is positive definite.
fn damped_direction(h: &DMatrix<f64>, g: &DVector<f64>) -> Option<DVector<f64>> {
    let n = g.len();
    let scale = h.diagonal().abs().max().max(1.0);
    let mut ridge = 0.0;
    for _ in 0..60 {
        let shifted = h + DMatrix::identity(n, n) * ridge;
        if let Some(chol) = Cholesky::new(shifted) {
            let d = chol.solve(&(-g));
            if d.iter().all(|v| v.is_finite()) {
                return Some(d);
            }
        }
        ridge = if ridge == 0.0 {
            RIDGE_START * scale
        } else {
            ridge * 10.0
        };
    }
    None
}

fn scaled_gradient_max(g: &DVector<f64>, x: &DVector<f64>, f: f64) -> f64 {
    let denom = f.abs().max(1.0);
    g.iter()
        .zip(x.iter())
        .map(|(gi, xi)| (gi.abs() * xi.abs().max(1.0)) / denom)
        .fold(0.0, f64::max)
}

impl Optimizer for NewtonDescent {
    fn name(&self) -> &'static str {
        "newton"
    }

    fn maximize(&self, objective: &dyn Objective, init: &[f64]) -> OptimOutcome {
        let cost = |p: &DVector<f64>| -objective.value(p.as_slice());

        let mut x = DVector::from_column_slice(init);
        let mut f = cost(&x);
        if !f.is_finite() {
            return OptimOutcome::failed(init.to_vec());
        }

        let mut converged = false;
        for _ in 0..self.max_iter {
            let g = neg_gradient(objective, &x);
            if g.iter().any(|v| !v.is_finite()) {
                return OptimOutcome::failed(x.as_slice().to_vec());
            }
            if scaled_gradient_max(&g, &x, f) < GRAD_TOL {
                converged = true;
                break;
            }

            let h = numeric_hessian(objective, &x);
            let direction = match damped_direction(&h, &g) {
                Some(d) => d,
                None => break,
            };

            let mut step = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_HALVINGS {
                let candidate = &x + &direction * step;
                let f_new = cost(&candidate);
                if f_new.is_finite() && f_new <= f {
                    accepted = Some((candidate, f_new));
                    break;
                }
                step *= 0.5;
            }

            match accepted {
                Some((x_new, f_new)) => {
                    let small = relative_change_small(f, f_new, self.tolerance);
                    x = x_new;
                    f = f_new;
                    if small {
                        converged = true;
                        break;
                    }
                }
                // No improving step along a descent direction: we are at
                // the numerical optimum only if the gradient is tiny.
                None => {
                    converged = scaled_gradient_max(&g, &x, f) < GRAD_TOL.sqrt();
                    break;
                }
            }
        }

        OptimOutcome {
            converged,
            parameters: x.as_slice().to_vec(),
            objective_value: -f,
        }
    }
}
