//! Differential usage on synthetic data.
//!
//! This example shows how to:
//! 1. Build a count table and sample metadata in memory
//! 2. Turn them into per-gene test units
//! 3. Run the DM likelihood ratio test with pooled permutations
//! 4. Follow up with per-feature beta-binomial tests

use dmfit::prelude::*;
use nalgebra::DMatrix;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const N_PER_GROUP: usize = 5;

fn main() -> Result<()> {
    println!("=== dmfit Example ===\n");

    let (counts, metadata) = create_example_data()?;
    println!("Data dimensions:");
    println!("  Genes:    {}", counts.n_genes());
    println!("  Features: {}", counts.n_features());
    println!("  Samples:  {}", counts.n_samples());
    println!();

    let units = ds_units(
        &counts,
        &metadata,
        &Formula::parse("~ group")?,
        &Formula::intercept_only(),
        &PrecisionSource::Common(50.0),
    )?;

    let config = TestConfig {
        permutation: PermutationConfig {
            max_cycles: 5,
            ..PermutationConfig::default()
        },
        ..Default::default()
    };
    println!("=== Gene-level DM tests ===\n");
    let results = dm_test(&units, &config);
    println!("{}", results.table.summary());

    println!(
        "{:<8} {:>10} {:>4} {:>12} {:>12}",
        "Gene", "LR", "df", "p-value", "adj p"
    );
    println!("{}", "-".repeat(50));
    for row in results.table.sorted_by_pvalue().iter().take(5) {
        println!(
            "{:<8} {:>10.3} {:>4} {:>12.2e} {:>12.2e}",
            row.gene_id, row.lr, row.df, row.p_value, row.adj_p_value
        );
    }
    println!();

    println!("=== Feature-level BB tests ===\n");
    let features = bb_test(&results);
    for row in features.table.iter().filter(|r| r.adj_p_value < 0.05) {
        println!(
            "  {} / {}  p = {:.2e}  adj = {:.2e}",
            row.gene_id,
            row.feature_id.as_deref().unwrap_or("-"),
            row.p_value,
            row.adj_p_value
        );
    }

    Ok(())
}

/// Ten genes with three features; the first two switch usage between groups.
fn create_example_data() -> Result<(CountTable, Metadata)> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let n = 2 * N_PER_GROUP;
    let sample_ids: Vec<String> = (0..n).map(|i| format!("S{}", i + 1)).collect();

    let mut genes = Vec::new();
    for g in 0..10 {
        let switched = g < 2;
        let counts = DMatrix::from_fn(3, n, |f, s| {
            let treated = s >= N_PER_GROUP;
            let share = match (switched && treated, f) {
                (true, 0) => 0.2,
                (true, 1) => 0.6,
                (false, 0) => 0.6,
                (false, 1) => 0.3,
                _ => 0.1,
            };
            let depth = 100.0 + 200.0 * rng.gen::<f64>();
            (depth * share).round()
        });
        let gene_id = format!("gene{}", g + 1);
        let feature_ids = (1..=3).map(|f| format!("{}.t{}", gene_id, f)).collect();
        genes.push(GeneCounts::new(gene_id, feature_ids, counts)?);
    }
    let counts = CountTable::new(sample_ids.clone(), genes)?;

    let mut tsv = String::from("sample_id\tgroup\n");
    for (i, id) in sample_ids.iter().enumerate() {
        let group = if i < N_PER_GROUP { "control" } else { "treatment" };
        tsv.push_str(&format!("{}\t{}\n", id, group));
    }
    let metadata = Metadata::from_reader(tsv.as_bytes())?;

    Ok((counts, metadata))
}
