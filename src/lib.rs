//! Dirichlet-multinomial usage testing library
//!
//! This library fits per-gene Dirichlet-multinomial (DM) regressions to
//! feature counts (transcripts, exons, ...), tests a full model against a
//! nested null model with a likelihood ratio test, and calibrates the
//! resulting p-values by permutation followed by Benjamini-Hochberg.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Count tables, metadata, formulas, designs, precisions, genotypes and results
//! - **optim**: Interchangeable optimizer backends (BFGS, L-BFGS, Newton)
//! - **model**: DM regression and beta-binomial recount
//! - **test**: Likelihood ratio tests and permutation calibration
//! - **correct**: Multiple testing correction (Benjamini-Hochberg)
//! - **pipeline**: Batch execution over genes or gene x block pairs
//!
//! Per-gene numerical failures never abort a batch: they surface as NaN
//! values, written as `NA` in result tables.
//!
//! # Example
//!
//! ```no_run
//! use dmfit::prelude::*;
//!
//! let counts = CountTable::from_tsv("counts.tsv").unwrap();
//! let metadata = Metadata::from_tsv("metadata.tsv").unwrap();
//! let units = ds_units(
//!     &counts,
//!     &metadata,
//!     &Formula::parse("~ group").unwrap(),
//!     &Formula::intercept_only(),
//!     &PrecisionSource::Common(50.0),
//! )
//! .unwrap();
//!
//! let results = dm_test(&units, &TestConfig::default());
//! results.table.to_tsv("results.tsv").unwrap();
//! ```

pub mod correct;
pub mod data;
pub mod error;
pub mod model;
pub mod optim;
pub mod pipeline;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::correct::{correct_bh, BhCorrected};
    pub use crate::data::{
        CountTable, DesignMatrix, Formula, GeneCounts, GenotypeTable, Metadata, PrecisionSource,
        PrecisionTable, ResultTable, ResultsRow, Term, Variable,
    };
    pub use crate::error::{DmError, Result};
    pub use crate::model::{
        bb_fit_regression, dm_fit, BbFit, DmFit, FitConfig, FitStrategy, Initializer,
    };
    pub use crate::optim::{OptimizerBackend, OptimizerConfig};
    pub use crate::pipeline::{
        bb_test, dm_test, ds_units, qtl_units, BbTestResults, DmTestResults, TestConfig, TestUnit,
    };
    pub use crate::test::{
        likelihood_ratio, LrtRow, PermutationConfig, PermutationMode, PermutationOutcome,
    };
}
