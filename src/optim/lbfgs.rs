//! L-BFGS minimizer of the negated objective, backed by `argmin`.

use super::{Objective, OptimOutcome, Optimizer};
use argmin::core::{
    CostFunction, Error as ArgminError, Executor, Gradient, State, TerminationReason,
    TerminationStatus,
};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;

/// Number of correction pairs kept by L-BFGS.
const HISTORY: usize = 7;

/// Gradient-norm tolerance used alongside the cost tolerance.
const GRAD_TOL: f64 = 1e-8;

/// L-BFGS with a More-Thuente line search.
#[derive(Debug, Clone, Copy)]
pub struct LbfgsDescent {
    tolerance: f64,
    max_iter: usize,
}

impl LbfgsDescent {
    pub fn new(tolerance: f64, max_iter: usize) -> Self {
        Self {
            tolerance,
            max_iter: max_iter.max(1),
        }
    }
}

/// Adapter exposing `-objective` to argmin.
struct NegatedProblem<'a> {
    objective: &'a dyn Objective,
}

impl CostFunction for NegatedProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, ArgminError> {
        let value = self.objective.value(param);
        // Infeasible points must look uphill to the line search.
        Ok(if value.is_finite() { -value } else { f64::INFINITY })
    }
}

impl Gradient for NegatedProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, ArgminError> {
        Ok(self.objective.gradient(param).into_iter().map(|g| -g).collect())
    }
}

impl Optimizer for LbfgsDescent {
    fn name(&self) -> &'static str {
        "lbfgs"
    }

    fn maximize(&self, objective: &dyn Objective, init: &[f64]) -> OptimOutcome {
        if !objective.value(init).is_finite() {
            return OptimOutcome::failed(init.to_vec());
        }

        let solver = match LBFGS::new(MoreThuenteLineSearch::new(), HISTORY)
            .with_tolerance_grad(GRAD_TOL)
            .and_then(|s| s.with_tolerance_cost(self.tolerance))
        {
            Ok(s) => s,
            Err(e) => {
                log::warn!("L-BFGS setup failed: {}", e);
                return OptimOutcome::failed(init.to_vec());
            }
        };

        let problem = NegatedProblem { objective };
        let run = Executor::new(problem, solver)
            .configure(|state| state.param(init.to_vec()).max_iters(self.max_iter as u64))
            .run();

        match run {
            Ok(res) => {
                let state = res.state();
                let converged = matches!(
                    state.get_termination_status(),
                    TerminationStatus::Terminated(TerminationReason::SolverConverged)
                );
                let parameters = state
                    .get_best_param()
                    .cloned()
                    .unwrap_or_else(|| init.to_vec());
                let cost = state.get_best_cost();
                OptimOutcome {
                    converged: converged && cost.is_finite(),
                    parameters,
                    objective_value: -cost,
                }
            }
            Err(e) => {
                log::debug!("L-BFGS run aborted: {}", e);
                OptimOutcome::failed(init.to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::test_objectives::Quadratic;
    use approx::assert_relative_eq;

    #[test]
    fn test_lbfgs_quadratic() {
        let objective = Quadratic {
            center: vec![-1.0, 4.0],
            weights: vec![1.0, 2.0],
        };
        let outcome = LbfgsDescent::new(1e-12, 200).maximize(&objective, &[0.0, 0.0]);

        assert!(outcome.converged);
        assert_relative_eq!(outcome.parameters[0], -1.0, epsilon = 1e-5);
        assert_relative_eq!(outcome.parameters[1], 4.0, epsilon = 1e-5);
        assert_relative_eq!(outcome.objective_value, 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_lbfgs_reports_maximization_scale() {
        struct Shifted;
        impl Objective for Shifted {
            fn value(&self, p: &[f64]) -> f64 {
                5.0 - (p[0] - 1.0).powi(2)
            }
            fn gradient(&self, p: &[f64]) -> Vec<f64> {
                vec![-2.0 * (p[0] - 1.0)]
            }
        }

        let outcome = LbfgsDescent::new(1e-12, 100).maximize(&Shifted, &[3.0]);
        assert_relative_eq!(outcome.objective_value, 5.0, epsilon = 1e-8);
    }
}
