//! Per-gene DM precision estimates supplied by an upstream estimator.

use super::metadata::is_na;
use crate::error::{DmError, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Where per-gene precisions come from.
#[derive(Debug, Clone)]
pub enum PrecisionSource {
    /// One value shared by all genes.
    Common(f64),
    /// Looked up per gene.
    PerGene(PrecisionTable),
}

impl PrecisionSource {
    /// Precision of a gene, `None` when undefined.
    pub fn precision(&self, gene_id: &str) -> Option<f64> {
        let value = match self {
            PrecisionSource::Common(v) => Some(*v),
            PrecisionSource::PerGene(table) => table.get(gene_id),
        };
        value.filter(|v| v.is_finite() && *v > 0.0)
    }
}

/// Table of `gene_id -> precision`; `NA` entries are undefined.
#[derive(Debug, Clone, Default)]
pub struct PrecisionTable {
    values: HashMap<String, Option<f64>>,
}

impl PrecisionTable {
    /// Load a two-column TSV (`gene_id  precision`) with a header line.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    /// Parse a precision table from any TSV source.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut lines = BufReader::new(reader).lines();
        lines
            .next()
            .ok_or_else(|| DmError::EmptyData("Empty precision table".to_string()))??;

        let mut values = HashMap::new();
        for (row, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
            if fields.len() < 2 {
                return Err(DmError::DimensionMismatch {
                    expected: 2,
                    actual: fields.len(),
                });
            }
            let value = if is_na(fields[1]) {
                None
            } else {
                Some(fields[1].parse::<f64>().map_err(|_| {
                    DmError::InvalidParameter(format!(
                        "Invalid precision '{}' on line {}",
                        fields[1],
                        row + 2
                    ))
                })?)
            };
            values.insert(fields[0].to_string(), value);
        }
        Ok(Self { values })
    }

    /// Build from pairs.
    pub fn from_pairs<I: IntoIterator<Item = (String, Option<f64>)>>(pairs: I) -> Self {
        Self {
            values: pairs.into_iter().collect(),
        }
    }

    /// Precision of a gene; `None` if missing or `NA`.
    pub fn get(&self, gene_id: &str) -> Option<f64> {
        self.values.get(gene_id).copied().flatten()
    }

    /// Number of genes listed.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
