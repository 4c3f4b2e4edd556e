//! Genotype blocks for QTL-style testing.

use super::metadata::is_na;
use crate::error::{DmError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Genotypes of one block (e.g. a group of SNPs in LD) near one gene.
///
/// `None` marks a missing genotype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenotypeBlock {
    pub gene_id: String,
    pub block_id: String,
    pub genotypes: Vec<Option<i64>>,
}

impl GenotypeBlock {
    /// Indices of samples with an observed genotype.
    pub fn observed_samples(&self) -> Vec<usize> {
        self.genotypes
            .iter()
            .enumerate()
            .filter_map(|(i, g)| g.map(|_| i))
            .collect()
    }

    /// Sorted distinct observed genotype codes.
    pub fn levels(&self) -> Vec<i64> {
        let mut levels: Vec<i64> = self.genotypes.iter().flatten().copied().collect();
        levels.sort_unstable();
        levels.dedup();
        levels
    }
}

/// All genotype blocks over a shared set of samples.
#[derive(Debug, Clone, Default)]
pub struct GenotypeTable {
    sample_ids: Vec<String>,
    blocks: Vec<GenotypeBlock>,
}

impl GenotypeTable {
    /// Load a TSV with header `gene_id  block_id  <sample ids...>`.
    ///
    /// Genotypes are integer codes; `NA`, empty and negative values are
    /// missing.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    /// Parse a genotype table from any TSV source.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut lines = BufReader::new(reader).lines();
        let header_line = lines
            .next()
            .ok_or_else(|| DmError::EmptyData("Empty genotype table".to_string()))??;
        let header: Vec<&str> = header_line.split('\t').map(str::trim).collect();
        if header.len() < 3 {
            return Err(DmError::EmptyData(
                "Genotype table needs gene_id, block_id and at least one sample".to_string(),
            ));
        }
        let sample_ids: Vec<String> = header[2..].iter().map(|s| s.to_string()).collect();

        let mut blocks = Vec::new();
        for (row, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
            if fields.len() != sample_ids.len() + 2 {
                return Err(DmError::DimensionMismatch {
                    expected: sample_ids.len() + 2,
                    actual: fields.len(),
                });
            }
            let genotypes = fields[2..]
                .iter()
                .enumerate()
                .map(|(col, raw)| {
                    if is_na(raw) {
                        return Ok(None);
                    }
                    let code: i64 = raw.parse().map_err(|_| DmError::InvalidCount {
                        value: raw.to_string(),
                        row,
                        col,
                    })?;
                    Ok((code >= 0).then_some(code))
                })
                .collect::<Result<Vec<_>>>()?;
            blocks.push(GenotypeBlock {
                gene_id: fields[0].to_string(),
                block_id: fields[1].to_string(),
                genotypes,
            });
        }

        Ok(Self { sample_ids, blocks })
    }

    /// Sample identifiers.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// All blocks in file order.
    pub fn blocks(&self) -> &[GenotypeBlock] {
        &self.blocks
    }

    /// Blocks belonging to one gene.
    pub fn blocks_for<'a>(&'a self, gene_id: &'a str) -> impl Iterator<Item = &'a GenotypeBlock> + 'a {
        self.blocks.iter().filter(move |b| b.gene_id == gene_id)
    }

    /// Number of blocks.
    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }
}
