//! Units for QTL-style testing of feature usage against genotype blocks.

use super::runner::TestUnit;
use crate::data::{CountTable, DesignMatrix, GenotypeBlock, GenotypeTable, PrecisionSource, INTERCEPT};
use crate::error::{DmError, Result};
use crate::test::genotype_degrees_of_freedom;
use nalgebra::DMatrix;
use std::collections::HashMap;
use std::sync::Arc;

/// One unit per (gene, block) pair.
///
/// Samples with a missing genotype are dropped from the unit. The full
/// design is an intercept plus treatment dummies of the observed genotype
/// codes (the lowest code is the reference), the null design is the
/// intercept alone. Genes without blocks, and blocks without any observed
/// genotype, are skipped.
pub fn qtl_units(
    counts: &CountTable,
    genotypes: &GenotypeTable,
    precision: &PrecisionSource,
) -> Result<Vec<TestUnit>> {
    let index: HashMap<&str, usize> = genotypes
        .sample_ids()
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let columns = counts
        .sample_ids()
        .iter()
        .map(|id| {
            index.get(id.as_str()).copied().ok_or_else(|| {
                DmError::SampleMismatch(format!("Sample '{}' has no genotypes", id))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut units = Vec::new();
    for gene in counts.genes() {
        for block in genotypes.blocks_for(gene.gene_id()) {
            let aligned = GenotypeBlock {
                gene_id: block.gene_id.clone(),
                block_id: block.block_id.clone(),
                genotypes: columns.iter().map(|&c| block.genotypes[c]).collect(),
            };
            let kept = aligned.observed_samples();
            if kept.is_empty() {
                log::debug!(
                    "Skipping {} / {}: no sample has an observed genotype",
                    gene.gene_id(),
                    block.block_id
                );
                continue;
            }
            let sample_ids: Vec<String> = kept.iter().map(|&i| counts.sample_ids()[i].clone()).collect();

            let design = genotype_design(&aligned, &kept, sample_ids.clone())?;
            let n_levels = design.n_coefficients();
            let gene_counts = gene.select_samples(&kept);

            units.push(TestUnit {
                gene_id: gene.gene_id().to_string(),
                block_id: Some(block.block_id.clone()),
                feature_ids: gene.feature_ids().to_vec(),
                counts: gene_counts.counts().clone(),
                full_design: Arc::new(design.into_matrix()),
                null_design: Arc::new(DesignMatrix::intercept(sample_ids).into_matrix()),
                precision: precision.precision(gene.gene_id()),
                df: genotype_degrees_of_freedom(gene.n_features(), n_levels),
            });
        }
    }

    if units.is_empty() {
        return Err(DmError::EmptyData(
            "No gene has a genotype block to test".to_string(),
        ));
    }
    log::info!(
        "Built {} gene-block units from {} genes and {} blocks",
        units.len(),
        counts.n_genes(),
        genotypes.n_blocks()
    );
    Ok(units)
}

/// Intercept plus one dummy column per non-reference genotype code, over
/// the `kept` samples of a block aligned to the counts.
fn genotype_design(block: &GenotypeBlock, kept: &[usize], sample_ids: Vec<String>) -> Result<DesignMatrix> {
    let levels = block.levels();
    let codes: Vec<Option<i64>> = kept.iter().map(|&i| block.genotypes[i]).collect();

    let mut names = vec![INTERCEPT.to_string()];
    names.extend(levels.iter().skip(1).map(|l| format!("{}{}", block.block_id, l)));

    let matrix = DMatrix::from_fn(codes.len(), names.len(), |i, j| {
        if j == 0 || codes[i] == Some(levels[j]) {
            1.0
        } else {
            0.0
        }
    });
    DesignMatrix::from_matrix(matrix, names, sample_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{dm_test, TestConfig};
    use crate::test::{PermutationConfig, PermutationMode};

    fn counts() -> CountTable {
        let tsv = "gene_id\tfeature_id\tS1\tS2\tS3\tS4\tS5\tS6\n\
                   g1\tt1\t40\t38\t20\t22\t5\t6\n\
                   g1\tt2\t10\t12\t20\t19\t35\t33\n\
                   g2\tt3\t20\t22\t18\t21\t19\t20\n\
                   g2\tt4\t10\t11\t9\t10\t12\t10\n";
        CountTable::from_reader(tsv.as_bytes()).unwrap()
    }

    fn genotypes() -> GenotypeTable {
        // Sample columns deliberately in a different order from the counts.
        let tsv = "gene_id\tblock_id\tS6\tS5\tS4\tS3\tS2\tS1\n\
                   g1\tb1\t2\t2\t1\t1\t0\t0\n\
                   g1\tb2\t0\tNA\t1\t0\t1\t-1\n\
                   g3\tb3\t0\t1\t2\t0\t1\t2\n";
        GenotypeTable::from_reader(tsv.as_bytes()).unwrap()
    }

    #[test]
    fn test_units_per_block() {
        let units = qtl_units(&counts(), &genotypes(), &PrecisionSource::Common(50.0)).unwrap();
        assert_eq!(units.len(), 2);

        let b1 = &units[0];
        assert_eq!(b1.block_id.as_deref(), Some("b1"));
        assert_eq!(b1.n_samples(), 6);
        assert_eq!(b1.full_design.shape(), (6, 3));
        assert_eq!(b1.df, 2);
        // S1 has genotype 0: intercept only.
        assert_eq!(b1.full_design.row(0).iter().copied().collect::<Vec<_>>(), vec![1.0, 0.0, 0.0]);
        // S6 has genotype 2.
        assert_eq!(b1.full_design.row(5).iter().copied().collect::<Vec<_>>(), vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_missing_genotypes_dropped() {
        let units = qtl_units(&counts(), &genotypes(), &PrecisionSource::Common(50.0)).unwrap();
        let b2 = &units[1];
        // S1 (negative code) and S5 (NA) are dropped.
        assert_eq!(b2.n_samples(), 4);
        assert_eq!(b2.null_design.shape(), (4, 1));
        assert_eq!(b2.counts[(0, 0)], 38.0);
        assert_eq!(b2.df, 1);
    }

    #[test]
    fn test_missing_sample_is_error() {
        let tsv = "gene_id\tblock_id\tS1\n g1\tb1\t0\n";
        let genotypes = GenotypeTable::from_reader(tsv.as_bytes()).unwrap();
        let err = qtl_units(&counts(), &genotypes, &PrecisionSource::Common(50.0));
        assert!(matches!(err, Err(DmError::SampleMismatch(_))));
    }

    #[test]
    fn test_qtl_association() {
        let units = qtl_units(&counts(), &genotypes(), &PrecisionSource::Common(50.0)).unwrap();
        let config = TestConfig {
            permutation: PermutationConfig::with_mode(PermutationMode::None),
            ..Default::default()
        };
        let results = dm_test(&units, &config);
        assert!(results.table.rows[0].p_value < 1e-3);
        assert_eq!(results.table.rows[0].block_id.as_deref(), Some("b1"));
    }

    #[test]
    fn test_unobserved_block_skipped() {
        let tsv = "gene_id\tblock_id\tS1\tS2\tS3\tS4\tS5\tS6\n\
                   g1\tb1\tNA\tNA\tNA\tNA\tNA\tNA\n\
                   g2\tb2\t0\t1\t0\t1\t0\t1\n";
        let genotypes = GenotypeTable::from_reader(tsv.as_bytes()).unwrap();
        let units = qtl_units(&counts(), &genotypes, &PrecisionSource::Common(50.0)).unwrap();

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].gene_id, "g2");
        assert_eq!(units[0].n_samples(), 6);

        let config = TestConfig {
            permutation: PermutationConfig::with_mode(PermutationMode::None),
            ..Default::default()
        };
        let results = dm_test(&units, &config);
        assert_eq!(results.table.len(), 1);
        assert_eq!(results.table.rows[0].block_id.as_deref(), Some("b2"));
    }

    #[test]
    fn test_only_unobserved_blocks_is_empty() {
        let tsv = "gene_id\tblock_id\tS1\tS2\tS3\tS4\tS5\tS6\n\
                   g1\tb1\tNA\tNA\tNA\tNA\tNA\tNA\n";
        let genotypes = GenotypeTable::from_reader(tsv.as_bytes()).unwrap();
        let err = qtl_units(&counts(), &genotypes, &PrecisionSource::Common(50.0));
        assert!(matches!(err, Err(DmError::EmptyData(_))));
    }
}
