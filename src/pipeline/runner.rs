//! Gene-batch execution of DM and BB likelihood ratio tests.

use crate::correct::correct_bh;
use crate::data::{
    CountTable, DesignMatrix, Formula, Metadata, PrecisionSource, ResultTable, ResultsRow,
};
use crate::error::{DmError, Result};
use crate::model::{bb_fit_regression, dm_fit, permute_rows, rows_identical, BbFit, DmFit, FitConfig};
use crate::test::{
    adjust_p_values, degrees_of_freedom, likelihood_ratio, likelihood_ratio_batch,
    likelihood_ratio_per_feature, LrtRow,
    PermutationConfig, PermutationOutcome, PermutationProblem,
};
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// One unit of testing: the counts of a gene (or a gene x block pair)
/// together with the designs it is tested under.
#[derive(Debug, Clone)]
pub struct TestUnit {
    pub gene_id: String,
    pub block_id: Option<String>,
    pub feature_ids: Vec<String>,
    /// Counts, q x n.
    pub counts: DMatrix<f64>,
    /// Full design, n x p_full. Shared between units when possible.
    pub full_design: Arc<DMatrix<f64>>,
    /// Null design, n x p_null.
    pub null_design: Arc<DMatrix<f64>>,
    pub precision: Option<f64>,
    /// Degrees of freedom of the DM test.
    pub df: usize,
}

impl TestUnit {
    /// Number of features (q).
    pub fn n_features(&self) -> usize {
        self.counts.nrows()
    }

    /// Number of samples (n).
    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }
}

/// Settings of a full test run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// DM fitting.
    pub fit: FitConfig,
    /// Permutation calibration.
    pub permutation: PermutationConfig,
    /// 0 = silent, 1 = per-gene and per-cycle progress, 2 = per-permutation detail.
    pub verbose: u8,
}

impl TestConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(DmError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(DmError::from)
    }

    /// Load from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }
}

/// Build differential-usage units: every gene tested under `full` against
/// `null`, with metadata aligned to the count samples.
///
/// `null` must be nested in `full`, either term by term or through the
/// column spaces of the two designs.
pub fn ds_units(
    counts: &CountTable,
    metadata: &Metadata,
    full: &Formula,
    null: &Formula,
    precision: &PrecisionSource,
) -> Result<Vec<TestUnit>> {
    if counts.n_genes() == 0 {
        return Err(DmError::EmptyData("No genes to test".to_string()));
    }

    let metadata = metadata.subset_samples(counts.sample_ids())?;
    let full_design = DesignMatrix::from_formula(&metadata, full)?;
    let null_design = DesignMatrix::from_formula(&metadata, null)?;
    if !null.is_nested_in(full) && !full_design.spans(&null_design) {
        return Err(DmError::InvalidParameter(format!(
            "Null model '{}' is not nested in full model '{}'",
            null, full
        )));
    }
    let p_full = full_design.n_coefficients();
    let p_null = null_design.n_coefficients();

    log::info!(
        "Testing {} genes on {} samples: {} ({} coefficients) vs {} ({} coefficients)",
        counts.n_genes(),
        counts.n_samples(),
        full,
        p_full,
        null,
        p_null
    );

    let full_x = Arc::new(full_design.into_matrix());
    let null_x = Arc::new(null_design.into_matrix());

    Ok(counts
        .genes()
        .iter()
        .map(|gene| TestUnit {
            gene_id: gene.gene_id().to_string(),
            block_id: None,
            feature_ids: gene.feature_ids().to_vec(),
            counts: gene.counts().clone(),
            full_design: Arc::clone(&full_x),
            null_design: Arc::clone(&null_x),
            precision: precision.precision(gene.gene_id()),
            df: degrees_of_freedom(gene.n_features(), p_full, p_null),
        })
        .collect())
}

/// Results of the DM test over a batch of units.
///
/// Borrows the units it was computed from; the fits and rows are fresh and
/// never modified afterwards.
#[derive(Debug)]
pub struct DmTestResults<'a> {
    pub units: &'a [TestUnit],
    pub full_fits: Vec<DmFit>,
    pub null_fits: Vec<DmFit>,
    pub lrt: Vec<LrtRow>,
    pub permutation: PermutationOutcome,
    pub table: ResultTable,
}

/// Refits units under shuffled sample labels.
struct Refit<'a> {
    units: &'a [TestUnit],
    null_log_likelihoods: Vec<f64>,
    fit: &'a FitConfig,
}

impl PermutationProblem for Refit<'_> {
    fn n_units(&self) -> usize {
        self.units.len()
    }

    fn n_samples(&self, unit: usize) -> usize {
        self.units[unit].n_samples()
    }

    fn permuted_p_value(&self, unit: usize, order: &[usize]) -> f64 {
        let u = &self.units[unit];
        let full_x = permute_rows(&u.full_design, order);
        let full = dm_fit(&u.counts, &full_x, u.precision, self.fit);

        // A constant null design is unchanged by any permutation.
        let ll_null = if rows_identical(&u.null_design) {
            self.null_log_likelihoods[unit]
        } else {
            let null_x = permute_rows(&u.null_design, order);
            dm_fit(&u.counts, &null_x, u.precision, self.fit).log_likelihood
        };

        likelihood_ratio(full.log_likelihood, ll_null, u.df).p_value
    }
}

/// Fit full and null DM models for every unit, combine them into LRTs and
/// calibrate the p-values by permutation followed by BH.
pub fn dm_test<'a>(units: &'a [TestUnit], config: &TestConfig) -> DmTestResults<'a> {
    let fits: Vec<(DmFit, DmFit)> = units
        .par_iter()
        .map(|u| {
            let full = dm_fit(&u.counts, &u.full_design, u.precision, &config.fit);
            let null = dm_fit(&u.counts, &u.null_design, u.precision, &config.fit);
            (full, null)
        })
        .collect();
    let (full_fits, null_fits): (Vec<DmFit>, Vec<DmFit>) = fits.into_iter().unzip();

    let ll_full: Vec<f64> = full_fits.iter().map(|f| f.log_likelihood).collect();
    let ll_null: Vec<f64> = null_fits.iter().map(|f| f.log_likelihood).collect();
    let df: Vec<usize> = units.iter().map(|u| u.df).collect();
    let lrt = likelihood_ratio_batch(&ll_full, &ll_null, &df);

    if config.verbose >= 1 {
        for (u, row) in units.iter().zip(&lrt) {
            log::info!(
                "Gene {}{}: lr = {:.4}, df = {}, p = {:.4e}",
                u.gene_id,
                u.block_id.as_deref().map(|b| format!(" / {}", b)).unwrap_or_default(),
                row.lr,
                row.df,
                row.p_value
            );
        }
    }

    let n_failed = lrt.iter().filter(|r| !r.is_defined()).count();
    if n_failed > 0 {
        log::warn!("{} of {} units have no test (degenerate or failed fit)", n_failed, units.len());
    }

    let observed: Vec<f64> = lrt.iter().map(|r| r.p_value).collect();
    let problem = Refit {
        units,
        null_log_likelihoods: ll_null,
        fit: &config.fit,
    };
    let permutation = adjust_p_values(&problem, &observed, &config.permutation, config.verbose);

    let rows = units
        .iter()
        .zip(&lrt)
        .zip(&permutation.adj_p_values)
        .map(|((u, row), &adj)| ResultsRow {
            gene_id: u.gene_id.clone(),
            block_id: u.block_id.clone(),
            feature_id: None,
            lr: row.lr,
            df: row.df,
            p_value: row.p_value,
            adj_p_value: adj,
        })
        .collect();

    DmTestResults {
        units,
        full_fits,
        null_fits,
        lrt,
        permutation,
        table: ResultTable::new(rows),
    }
}

/// Per-feature BB results derived from a DM test.
#[derive(Debug)]
pub struct BbTestResults<'a> {
    pub dm: &'a DmTestResults<'a>,
    pub full_fits: Vec<BbFit<'a>>,
    pub null_fits: Vec<BbFit<'a>>,
    pub table: ResultTable,
}

/// Re-estimate every unit with BB on the DM proportions and test each
/// feature separately, with df = p_full - p_null and BH over all features.
pub fn bb_test<'a>(dm: &'a DmTestResults<'a>) -> BbTestResults<'a> {
    let fits: Vec<(BbFit<'a>, BbFit<'a>)> = dm
        .units
        .par_iter()
        .zip(dm.full_fits.par_iter().zip(dm.null_fits.par_iter()))
        .map(|(u, (full, null))| {
            (
                bb_fit_regression(&u.counts, &u.full_design, u.precision, &full.proportions),
                bb_fit_regression(&u.counts, &u.null_design, u.precision, &null.proportions),
            )
        })
        .collect();
    let (full_fits, null_fits): (Vec<BbFit<'a>>, Vec<BbFit<'a>>) = fits.into_iter().unzip();

    let mut rows = Vec::new();
    for (u, (full, null)) in dm.units.iter().zip(full_fits.iter().zip(&null_fits)) {
        let df = u.full_design.ncols().saturating_sub(u.null_design.ncols());
        let tests = likelihood_ratio_per_feature(&full.log_likelihood, &null.log_likelihood, df);
        for (feature_id, t) in u.feature_ids.iter().zip(tests) {
            rows.push(ResultsRow {
                gene_id: u.gene_id.clone(),
                block_id: u.block_id.clone(),
                feature_id: Some(feature_id.clone()),
                lr: t.lr,
                df: t.df,
                p_value: t.p_value,
                adj_p_value: f64::NAN,
            });
        }
    }

    let p_values: Vec<f64> = rows.iter().map(|r| r.p_value).collect();
    let corrected = correct_bh(&p_values);
    log::info!(
        "{} of {} tested features below FDR 0.05",
        corrected.n_significant(0.05),
        corrected.n_tests
    );
    for (row, q) in rows.iter_mut().zip(corrected.q_values) {
        row.adj_p_value = q;
    }

    BbTestResults {
        dm,
        full_fits,
        null_fits,
        table: ResultTable::new(rows),
    }
}
