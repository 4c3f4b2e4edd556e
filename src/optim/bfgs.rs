//! Variable-metric (BFGS) maximizer.
//!
//! Works on the negated objective with an inverse-Hessian approximation that
//! starts from the identity and is reset whenever the search direction stops
//! being an ascent direction. Steps are found by backtracking until the
//! Armijo condition holds. The run stops once an accepted step changes the
//! objective by less than `tolerance` relative to its magnitude; hitting the
//! iteration cap first is reported as non-convergence.

use super::{relative_change_small, Objective, OptimOutcome, Optimizer};
use nalgebra::{DMatrix, DVector};

/// Step shrink factor during backtracking.
const STEP_REDUCTION: f64 = 0.2;

/// Armijo sufficient-decrease constant.
const ACCEPT_TOL: f64 = 1e-4;

/// Offset used to decide that a step no longer moves any coordinate.
const REL_TEST: f64 = 10.0;

/// BFGS maximizer with a relative-tolerance stop rule.
#[derive(Debug, Clone, Copy)]
pub struct BfgsAscent {
    tolerance: f64,
    max_iter: usize,
}

impl BfgsAscent {
    pub fn new(tolerance: f64, max_iter: usize) -> Self {
        Self {
            tolerance,
            max_iter: max_iter.max(1),
        }
    }
}

impl Optimizer for BfgsAscent {
    fn name(&self) -> &'static str {
        "bfgs"
    }

    fn maximize(&self, objective: &dyn Objective, init: &[f64]) -> OptimOutcome {
        let n = init.len();
        let cost = |p: &DVector<f64>| -objective.value(p.as_slice());
        let grad = |p: &DVector<f64>| -DVector::from_vec(objective.gradient(p.as_slice()));

        let mut b = DVector::from_column_slice(init);
        let mut f_min = cost(&b);
        if !f_min.is_finite() {
            return OptimOutcome::failed(init.to_vec());
        }
        if n == 0 {
            return OptimOutcome {
                converged: true,
                parameters: Vec::new(),
                objective_value: -f_min,
            };
        }

        let mut g = grad(&b);
        if g.iter().any(|v| !v.is_finite()) {
            return OptimOutcome::failed(init.to_vec());
        }

        let mut h = DMatrix::<f64>::identity(n, n);
        let mut iter = 1usize;
        let mut grad_count = 1usize;
        let mut last_reset = grad_count;

        loop {
            if last_reset == grad_count {
                h = DMatrix::identity(n, n);
            }
            let x_prev = b.clone();
            let g_prev = g.clone();
            let mut direction = -(&h * &g);
            let slope = direction.dot(&g);

            // Number of coordinates the last trial step left unchanged.
            let mut unchanged;

            if slope < 0.0 {
                let mut step = 1.0;
                let mut f = f_min;
                loop {
                    unchanged = 0;
                    for i in 0..n {
                        b[i] = x_prev[i] + step * direction[i];
                        if REL_TEST + x_prev[i] == REL_TEST + b[i] {
                            unchanged += 1;
                        }
                    }
                    if unchanged < n {
                        f = cost(&b);
                        let accepted = f.is_finite() && f <= f_min + slope * step * ACCEPT_TOL;
                        if accepted {
                            break;
                        }
                        step *= STEP_REDUCTION;
                    } else {
                        b.copy_from(&x_prev);
                        break;
                    }
                }

                if unchanged < n && relative_change_small(f_min, f, self.tolerance) {
                    // Accepted, but no meaningful progress left.
                    unchanged = n;
                    f_min = f;
                }

                if unchanged < n {
                    f_min = f;
                    g = grad(&b);
                    grad_count += 1;
                    iter += 1;
                    if g.iter().any(|v| !v.is_finite()) {
                        return OptimOutcome::failed(b.as_slice().to_vec());
                    }

                    direction *= step;
                    let y = &g - &g_prev;
                    let d1 = direction.dot(&y);
                    if d1 > 0.0 {
                        let hy = &h * &y;
                        let d2 = 1.0 + y.dot(&hy) / d1;
                        for i in 0..n {
                            for j in 0..n {
                                h[(i, j)] += (d2 * direction[i] * direction[j]
                                    - hy[i] * direction[j]
                                    - direction[i] * hy[j])
                                    / d1;
                            }
                        }
                    } else {
                        last_reset = grad_count;
                    }
                } else if last_reset < grad_count {
                    // Stalled with an old metric: retry from the identity.
                    unchanged = 0;
                    last_reset = grad_count;
                }
            } else {
                unchanged = 0;
                if last_reset == grad_count {
                    unchanged = n;
                } else {
                    last_reset = grad_count;
                }
            }

            if iter >= self.max_iter {
                break;
            }
            if grad_count - last_reset > 2 * n {
                last_reset = grad_count;
            }
            if unchanged == n && last_reset == grad_count {
                break;
            }
        }

        OptimOutcome {
            converged: iter < self.max_iter,
            parameters: b.as_slice().to_vec(),
            objective_value: -f_min,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::test_objectives::{NegRosenbrock, Quadratic};
    use approx::assert_relative_eq;

    #[test]
    fn test_bfgs_quadratic() {
        let objective = Quadratic {
            center: vec![3.0, -2.0],
            weights: vec![2.0, 0.5],
        };
        let outcome = BfgsAscent::new(1e-12, 100).maximize(&objective, &[0.0, 0.0]);

        assert!(outcome.converged);
        assert_relative_eq!(outcome.parameters[0], 3.0, epsilon = 1e-5);
        assert_relative_eq!(outcome.parameters[1], -2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_bfgs_rosenbrock() {
        let outcome = BfgsAscent::new(1e-12, 1000).maximize(&NegRosenbrock, &[-1.2, 1.0]);

        assert!(outcome.converged);
        assert_relative_eq!(outcome.parameters[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(outcome.parameters[1], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_bfgs_iteration_cap() {
        let outcome = BfgsAscent::new(1e-12, 2).maximize(&NegRosenbrock, &[-1.2, 1.0]);
        assert!(!outcome.converged);
        assert_eq!(outcome.parameters.len(), 2);
    }

    #[test]
    fn test_bfgs_infeasible_start() {
        struct Infeasible;
        impl Objective for Infeasible {
            fn value(&self, _: &[f64]) -> f64 {
                f64::NEG_INFINITY
            }
            fn gradient(&self, p: &[f64]) -> Vec<f64> {
                vec![0.0; p.len()]
            }
        }

        let outcome = BfgsAscent::new(1e-8, 50).maximize(&Infeasible, &[1.0]);
        assert!(!outcome.converged);
        assert!(outcome.objective_value.is_nan());
    }
}
