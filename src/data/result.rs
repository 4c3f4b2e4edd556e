//! Result tables of likelihood ratio tests.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One tested unit: a gene, a (gene, block) pair or a (gene, feature) pair.
///
/// NaN statistics mean no test was performed; they are written as `NA`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsRow {
    pub gene_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
    /// LRT statistic.
    pub lr: f64,
    /// Degrees of freedom.
    pub df: usize,
    /// Raw chi-squared p-value.
    pub p_value: f64,
    /// Final adjusted p-value (after permutations and BH).
    pub adj_p_value: f64,
}

impl ResultsRow {
    /// Whether a test was performed for this row.
    pub fn is_tested(&self) -> bool {
        !self.p_value.is_nan()
    }

    /// Check if significant at a threshold on the adjusted p-value.
    pub fn is_significant_at(&self, alpha: f64) -> bool {
        self.adj_p_value < alpha
    }
}

/// Collection of result rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultTable {
    pub rows: Vec<ResultsRow>,
}

fn fmt_value(v: f64) -> String {
    if v.is_nan() {
        "NA".to_string()
    } else {
        format!("{:e}", v)
    }
}

impl ResultTable {
    /// Create a table from rows.
    pub fn new(rows: Vec<ResultsRow>) -> Self {
        Self { rows }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate over rows.
    pub fn iter(&self) -> impl Iterator<Item = &ResultsRow> {
        self.rows.iter()
    }

    /// Rows sorted by raw p-value; untested rows last.
    pub fn sorted_by_pvalue(&self) -> Vec<&ResultsRow> {
        let mut sorted: Vec<_> = self.rows.iter().collect();
        sorted.sort_by(|a, b| match (a.p_value.is_nan(), b.p_value.is_nan()) {
            (false, false) => a.p_value.total_cmp(&b.p_value),
            (a_nan, b_nan) => a_nan.cmp(&b_nan),
        });
        sorted
    }

    /// Number of rows with adjusted p-value below `alpha`.
    pub fn n_significant(&self, alpha: f64) -> usize {
        self.rows.iter().filter(|r| r.is_significant_at(alpha)).count()
    }

    /// Counts at the usual thresholds.
    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            total: self.len(),
            tested: self.rows.iter().filter(|r| r.is_tested()).count(),
            significant_01: self.n_significant(0.01),
            significant_05: self.n_significant(0.05),
            significant_10: self.n_significant(0.10),
        }
    }

    /// Write the table as TSV. Block and feature columns appear only when
    /// some row carries them.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_tsv(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Write the table as TSV to any writer.
    pub fn write_tsv<W: Write>(&self, writer: &mut W) -> Result<()> {
        let with_block = self.rows.iter().any(|r| r.block_id.is_some());
        let with_feature = self.rows.iter().any(|r| r.feature_id.is_some());

        write!(writer, "gene_id")?;
        if with_block {
            write!(writer, "\tblock_id")?;
        }
        if with_feature {
            write!(writer, "\tfeature_id")?;
        }
        writeln!(writer, "\tlr\tdf\tpvalue\tadj_pvalue")?;

        for r in &self.rows {
            write!(writer, "{}", r.gene_id)?;
            if with_block {
                write!(writer, "\t{}", r.block_id.as_deref().unwrap_or("NA"))?;
            }
            if with_feature {
                write!(writer, "\t{}", r.feature_id.as_deref().unwrap_or("NA"))?;
            }
            writeln!(
                writer,
                "\t{}\t{}\t{}\t{}",
                fmt_value(r.lr),
                r.df,
                fmt_value(r.p_value),
                fmt_value(r.adj_p_value)
            )?;
        }
        Ok(())
    }

    /// Serialize to pretty JSON; NaN values become `null`.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Summary counts of a result table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub total: usize,
    pub tested: usize,
    pub significant_01: usize,
    pub significant_05: usize,
    pub significant_10: usize,
}

impl std::fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Units: {} ({} tested)", self.total, self.tested)?;
        writeln!(f, "Significant at adj p < 0.01: {}", self.significant_01)?;
        writeln!(f, "Significant at adj p < 0.05: {}", self.significant_05)?;
        writeln!(f, "Significant at adj p < 0.10: {}", self.significant_10)?;
        Ok(())
    }
}
