//! Regression models for feature-usage proportions.

pub mod bb;
pub mod dm;
pub mod init;
pub mod linalg;

pub use bb::{bb_coefficients, bb_fit_regression, bb_log_likelihood, BbFit};
pub use dm::{
    dm_fit, dm_fit_one_way, dm_fit_regression, dm_proportions, DmFit,
    DmRegression, FitConfig, FitStrategy,
};
pub use init::{empirical_logits, Initializer, PSEUDOCOUNT};
pub use linalg::{distinct_rows, permute_rows, pseudo_inverse, rows_identical, DistinctRows};
