//! Gene-grouped feature counts.

use crate::error::{DmError, Result};
use nalgebra::DMatrix;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Counts of one gene: features (rows) x samples (columns).
#[derive(Debug, Clone, PartialEq)]
pub struct GeneCounts {
    gene_id: String,
    feature_ids: Vec<String>,
    counts: DMatrix<f64>,
}

impl GeneCounts {
    /// Create gene counts, checking shape and values.
    pub fn new(gene_id: String, feature_ids: Vec<String>, counts: DMatrix<f64>) -> Result<Self> {
        if feature_ids.len() != counts.nrows() {
            return Err(DmError::DimensionMismatch {
                expected: counts.nrows(),
                actual: feature_ids.len(),
            });
        }
        if let Some(v) = counts.iter().find(|v| !(v.is_finite() && **v >= 0.0 && v.fract() == 0.0)) {
            return Err(DmError::InvalidParameter(format!(
                "Gene '{}' has a non-count value {}",
                gene_id, v
            )));
        }
        Ok(Self {
            gene_id,
            feature_ids,
            counts,
        })
    }

    /// Gene identifier.
    pub fn gene_id(&self) -> &str {
        &self.gene_id
    }

    /// Feature identifiers in row order.
    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    /// The q x n count matrix.
    pub fn counts(&self) -> &DMatrix<f64> {
        &self.counts
    }

    /// Number of features (q).
    pub fn n_features(&self) -> usize {
        self.counts.nrows()
    }

    /// Number of samples (n).
    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    /// Keep the sample columns at `indices`, in that order.
    pub fn select_samples(&self, indices: &[usize]) -> Self {
        Self {
            gene_id: self.gene_id.clone(),
            feature_ids: self.feature_ids.clone(),
            counts: self.counts.select_columns(indices.iter()),
        }
    }
}

/// Feature counts of many genes over a shared set of samples.
#[derive(Debug, Clone, Default)]
pub struct CountTable {
    sample_ids: Vec<String>,
    genes: Vec<GeneCounts>,
}

impl CountTable {
    /// Assemble a table from per-gene counts.
    pub fn new(sample_ids: Vec<String>, genes: Vec<GeneCounts>) -> Result<Self> {
        for gene in &genes {
            if gene.n_samples() != sample_ids.len() {
                return Err(DmError::DimensionMismatch {
                    expected: sample_ids.len(),
                    actual: gene.n_samples(),
                });
            }
        }
        Ok(Self { sample_ids, genes })
    }

    /// Load a count table from a TSV file.
    ///
    /// Expected format:
    /// - Header: `gene_id  feature_id  <sample ids...>`
    /// - Rows: one feature each; rows sharing a `gene_id` form one gene, in
    ///   file order. Genes are ordered by first appearance.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    /// Parse a count table from any TSV source.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut lines = BufReader::new(reader).lines();

        let header_line = lines
            .next()
            .ok_or_else(|| DmError::EmptyData("Empty count table".to_string()))??;
        let header: Vec<&str> = header_line.split('\t').map(str::trim).collect();
        if header.len() < 3 {
            return Err(DmError::EmptyData(
                "Count table needs gene_id, feature_id and at least one sample".to_string(),
            ));
        }
        let sample_ids: Vec<String> = header[2..].iter().map(|s| s.to_string()).collect();
        let n_samples = sample_ids.len();

        let mut order: Vec<String> = Vec::new();
        let mut rows: HashMap<String, (Vec<String>, Vec<f64>)> = HashMap::new();

        for (row_idx, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != n_samples + 2 {
                return Err(DmError::DimensionMismatch {
                    expected: n_samples + 2,
                    actual: fields.len(),
                });
            }

            let gene_id = fields[0].trim();
            let entry = rows.entry(gene_id.to_string()).or_insert_with(|| {
                order.push(gene_id.to_string());
                (Vec::new(), Vec::new())
            });
            entry.0.push(fields[1].trim().to_string());
            for (col_idx, raw) in fields[2..].iter().enumerate() {
                let value: u64 = raw.trim().parse().map_err(|_| DmError::InvalidCount {
                    value: raw.to_string(),
                    row: row_idx,
                    col: col_idx,
                })?;
                entry.1.push(value as f64);
            }
        }

        if order.is_empty() {
            return Err(DmError::EmptyData("No features in count table".to_string()));
        }

        let mut genes = Vec::with_capacity(order.len());
        for gene_id in order {
            if let Some((feature_ids, values)) = rows.remove(&gene_id) {
                let counts = DMatrix::from_row_slice(feature_ids.len(), n_samples, &values);
                genes.push(GeneCounts::new(gene_id, feature_ids, counts)?);
            }
        }

        Self::new(sample_ids, genes)
    }

    /// Write the table back in the format read by [`CountTable::from_tsv`].
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        write!(writer, "gene_id\tfeature_id")?;
        for sample_id in &self.sample_ids {
            write!(writer, "\t{}", sample_id)?;
        }
        writeln!(writer)?;

        for gene in &self.genes {
            for (row, feature_id) in gene.feature_ids.iter().enumerate() {
                write!(writer, "{}\t{}", gene.gene_id, feature_id)?;
                for value in gene.counts.row(row).iter() {
                    write!(writer, "\t{}", *value as u64)?;
                }
                writeln!(writer)?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Sample identifiers.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// All genes in table order.
    pub fn genes(&self) -> &[GeneCounts] {
        &self.genes
    }

    /// Look up a gene by identifier.
    pub fn gene(&self, gene_id: &str) -> Option<&GeneCounts> {
        self.genes.iter().find(|g| g.gene_id == gene_id)
    }

    /// Number of genes.
    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    /// Number of samples.
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Total number of features over all genes.
    pub fn n_features(&self) -> usize {
        self.genes.iter().map(GeneCounts::n_features).sum()
    }

    /// Reorder / subset samples by identifier.
    pub fn subset_samples(&self, sample_ids: &[String]) -> Result<Self> {
        let index: HashMap<&str, usize> = self
            .sample_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let columns = sample_ids
            .iter()
            .map(|id| {
                index.get(id.as_str()).copied().ok_or_else(|| {
                    DmError::SampleMismatch(format!("Sample '{}' not found in counts", id))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            sample_ids: sample_ids.to_vec(),
            genes: self.genes.iter().map(|g| g.select_samples(&columns)).collect(),
        })
    }
}
