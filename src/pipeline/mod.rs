//! Batch execution of tests over genes or gene x block pairs.

mod qtl;
mod runner;

pub use qtl::qtl_units;
pub use runner::{bb_test, dm_test, ds_units, BbTestResults, DmTestResults, TestConfig, TestUnit};
