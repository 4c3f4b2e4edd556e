//! Gradient-based optimizer backends.
//!
//! All backends share one contract: they take an [`Objective`] to be
//! maximized together with a starting point and report an [`OptimOutcome`]
//! `{converged, parameters, objective_value}`. Backends that work on the
//! minimization scale negate the objective internally and negate the
//! reported value back, so `objective_value` is always on the scale of the
//! objective itself (a log-likelihood for the models in this crate).
//!
//! The backend is chosen by configuration ([`OptimizerBackend`]), not by
//! type: [`OptimizerConfig::build`] returns a boxed [`Optimizer`].

pub mod bfgs;
pub mod lbfgs;
pub mod newton;

pub use bfgs::BfgsAscent;
pub use lbfgs::LbfgsDescent;
pub use newton::NewtonDescent;

use serde::{Deserialize, Serialize};

/// Default relative tolerance on the objective.
pub const DEFAULT_TOLERANCE: f64 = 1e-12;

/// Default iteration cap.
pub const DEFAULT_MAX_ITER: usize = 200;

/// A smooth objective function to be maximized.
pub trait Objective: Sync {
    /// Objective value at `params`. Non-finite values mark infeasible points.
    fn value(&self, params: &[f64]) -> f64;

    /// Analytic gradient of [`Objective::value`] at `params`.
    fn gradient(&self, params: &[f64]) -> Vec<f64>;
}

/// Outcome reported by every backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimOutcome {
    /// Whether the backend's stop rule was met (false on failure or iteration cap).
    pub converged: bool,
    /// Final parameter vector.
    pub parameters: Vec<f64>,
    /// Objective value at `parameters`, on the maximization scale.
    pub objective_value: f64,
}

impl OptimOutcome {
    /// Outcome for a run that could not start or broke down.
    pub fn failed(parameters: Vec<f64>) -> Self {
        Self {
            converged: false,
            parameters,
            objective_value: f64::NAN,
        }
    }
}

/// A maximization strategy.
pub trait Optimizer: Send + Sync {
    /// Maximize `objective` starting from `init`.
    fn maximize(&self, objective: &dyn Objective, init: &[f64]) -> OptimOutcome;

    /// Short name used in log messages.
    fn name(&self) -> &'static str;
}

/// Selectable optimizer backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerBackend {
    /// Quasi-Newton (BFGS) maximizer with a relative-tolerance stop rule.
    #[default]
    Bfgs,
    /// L-BFGS minimizer of the negated objective.
    Lbfgs,
    /// Damped Newton minimizer of the negated objective.
    Newton,
}

/// Optimizer selection and stopping parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Which backend to run.
    pub backend: OptimizerBackend,
    /// Convergence tolerance (relative change in the objective).
    pub tolerance: f64,
    /// Maximum number of iterations.
    pub max_iter: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            backend: OptimizerBackend::default(),
            tolerance: DEFAULT_TOLERANCE,
            max_iter: DEFAULT_MAX_ITER,
        }
    }
}

impl OptimizerConfig {
    /// Configuration for a given backend with default stopping parameters.
    pub fn with_backend(backend: OptimizerBackend) -> Self {
        Self {
            backend,
            ..Default::default()
        }
    }

    /// Instantiate the configured backend.
    pub fn build(&self) -> Box<dyn Optimizer> {
        match self.backend {
            OptimizerBackend::Bfgs => Box::new(BfgsAscent::new(self.tolerance, self.max_iter)),
            OptimizerBackend::Lbfgs => Box::new(LbfgsDescent::new(self.tolerance, self.max_iter)),
            OptimizerBackend::Newton => Box::new(NewtonDescent::new(self.tolerance, self.max_iter)),
        }
    }
}

/// Relative-change stop rule shared by the hand-written backends.
#[inline]
pub(crate) fn relative_change_small(old: f64, new: f64, tol: f64) -> bool {
    (old - new).abs() <= tol * (old.abs() + tol)
}
