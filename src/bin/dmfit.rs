//! dmfit - Dirichlet-multinomial usage testing CLI
//!
//! Command-line interface for differential and QTL testing of
//! feature-usage proportions.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use dmfit::data::{CountTable, Formula, GenotypeTable, Metadata, PrecisionSource, PrecisionTable, ResultTable};
use dmfit::error::{DmError, Result};
use dmfit::pipeline::{bb_test, dm_test, ds_units, qtl_units, TestConfig, TestUnit};
use dmfit::test::PermutationMode;
use log::LevelFilter;
use std::path::{Path, PathBuf};

/// CLI-friendly permutation mode enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliPermutationMode {
    /// One empirical null pooled across all genes
    AllGenes,
    /// An independent empirical null per gene (slow)
    PerGene,
    /// Keep chi-squared p-values
    None,
}

impl From<CliPermutationMode> for PermutationMode {
    fn from(mode: CliPermutationMode) -> Self {
        match mode {
            CliPermutationMode::AllGenes => PermutationMode::AllGenes,
            CliPermutationMode::PerGene => PermutationMode::PerGene,
            CliPermutationMode::None => PermutationMode::None,
        }
    }
}

/// Dirichlet-multinomial regression and likelihood ratio tests
#[derive(Parser)]
#[command(name = "dmfit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase logging (-v progress, -vv per-permutation detail)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Per-gene precision input; exactly one is required.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct PrecisionArgs {
    /// TSV of per-gene precisions (gene_id, precision)
    #[arg(long)]
    precision: Option<PathBuf>,

    /// One precision shared by all genes
    #[arg(long)]
    common_precision: Option<f64>,
}

/// Run settings shared by the test commands.
#[derive(Args)]
struct RunArgs {
    /// Test configuration YAML (see `dmfit config`)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the permutation mode of the configuration
    #[arg(long, value_enum)]
    permutations: Option<CliPermutationMode>,

    /// Override the permutation seed of the configuration
    #[arg(long)]
    seed: Option<u64>,

    /// Worker threads (default: all cores)
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Differential usage between conditions
    Ds {
        /// Path to gene-grouped count TSV
        #[arg(short = 'c', long)]
        counts: PathBuf,

        /// Path to sample metadata TSV
        #[arg(short, long)]
        metadata: PathBuf,

        /// Full model formula (e.g., "~ group")
        #[arg(long)]
        full: String,

        /// Null model formula
        #[arg(long, default_value = "~ 1")]
        null: String,

        #[command(flatten)]
        precision: PrecisionArgs,

        #[command(flatten)]
        run: RunArgs,

        /// Output path for per-gene results TSV
        #[arg(short, long)]
        output: PathBuf,

        /// Also run per-feature beta-binomial tests and write them here
        #[arg(long)]
        feature_output: Option<PathBuf>,
    },

    /// Association of feature usage with genotype blocks
    Qtl {
        /// Path to gene-grouped count TSV
        #[arg(short = 'c', long)]
        counts: PathBuf,

        /// Path to genotype block TSV
        #[arg(short, long)]
        genotypes: PathBuf,

        #[command(flatten)]
        precision: PrecisionArgs,

        #[command(flatten)]
        run: RunArgs,

        /// Output path for per-block results TSV
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the default test configuration as YAML
    Config,
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Commands::Ds {
            counts,
            metadata,
            full,
            null,
            precision,
            run,
            output,
            feature_output,
        } => cmd_ds(
            &counts,
            &metadata,
            &full,
            &null,
            &precision,
            &run,
            cli.verbose,
            &output,
            feature_output.as_deref(),
        ),

        Commands::Qtl {
            counts,
            genotypes,
            precision,
            run,
            output,
        } => cmd_qtl(&counts, &genotypes, &precision, &run, cli.verbose, &output),

        Commands::Config => cmd_config(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_precision(args: &PrecisionArgs) -> Result<PrecisionSource> {
    match (&args.precision, args.common_precision) {
        (Some(path), _) => Ok(PrecisionSource::PerGene(PrecisionTable::from_tsv(path)?)),
        (None, Some(value)) => Ok(PrecisionSource::Common(value)),
        (None, None) => Err(DmError::InvalidParameter(
            "Either --precision or --common-precision is required".to_string(),
        )),
    }
}

/// Resolve the configuration file and command-line overrides.
fn load_config(args: &RunArgs, verbose: u8) -> Result<TestConfig> {
    let mut config = match &args.config {
        Some(path) => TestConfig::from_yaml_file(path)?,
        None => TestConfig::default(),
    };
    if let Some(mode) = args.permutations {
        config.permutation.mode = mode.into();
    }
    if let Some(seed) = args.seed {
        config.permutation.seed = seed;
    }
    config.verbose = config.verbose.max(verbose);

    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| DmError::InvalidParameter(format!("Cannot start {} threads: {}", threads, e)))?;
    }
    Ok(config)
}

fn report(table: &ResultTable, label: &str) {
    eprint!("{}", table.summary());
    let top: Vec<_> = table
        .sorted_by_pvalue()
        .into_iter()
        .filter(|r| r.is_tested())
        .take(5)
        .collect();
    if !top.is_empty() {
        eprintln!("\nTop {} {}:", top.len(), label);
        for r in top {
            eprintln!(
                "  {}{}{}  lr={:.3}  p={:.2e}  adj={:.2e}",
                r.gene_id,
                r.block_id.as_deref().map(|b| format!(":{}", b)).unwrap_or_default(),
                r.feature_id.as_deref().map(|f| format!(":{}", f)).unwrap_or_default(),
                r.lr,
                r.p_value,
                r.adj_p_value
            );
        }
    }
}

fn run_tests(
    units: &[TestUnit],
    config: &TestConfig,
    output_path: &Path,
    feature_output: Option<&Path>,
) -> Result<()> {
    eprintln!(
        "Testing {} units ({:?} permutations, seed {})...",
        units.len(),
        config.permutation.mode,
        config.permutation.seed
    );
    let results = dm_test(units, config);

    eprintln!("Writing results to {:?}...", output_path);
    results.table.to_tsv(output_path)?;
    report(&results.table, "units");

    if let Some(path) = feature_output {
        eprintln!("\nRunning per-feature beta-binomial tests...");
        let features = bb_test(&results);
        eprintln!("Writing feature results to {:?}...", path);
        features.table.to_tsv(path)?;
        report(&features.table, "features");
    }
    Ok(())
}

/// Differential usage between conditions
#[allow(clippy::too_many_arguments)]
fn cmd_ds(
    counts_path: &Path,
    metadata_path: &Path,
    full: &str,
    null: &str,
    precision: &PrecisionArgs,
    run: &RunArgs,
    verbose: u8,
    output_path: &Path,
    feature_output: Option<&Path>,
) -> Result<()> {
    let config = load_config(run, verbose)?;

    eprintln!("Loading data...");
    let counts = CountTable::from_tsv(counts_path)?;
    let metadata = Metadata::from_tsv(metadata_path)?;
    let precision = load_precision(precision)?;
    eprintln!(
        "Loaded {} genes ({} features) x {} samples, {} metadata columns",
        counts.n_genes(),
        counts.n_features(),
        counts.n_samples(),
        metadata.n_columns()
    );

    let full = Formula::parse(full)?;
    let null = Formula::parse(null)?;
    eprintln!("  Full model: {}", full);
    eprintln!("  Null model: {}", null);

    let units = ds_units(&counts, &metadata, &full, &null, &precision)?;
    run_tests(&units, &config, output_path, feature_output)?;

    eprintln!("\nDone!");
    Ok(())
}

/// Association with genotype blocks
fn cmd_qtl(
    counts_path: &Path,
    genotypes_path: &Path,
    precision: &PrecisionArgs,
    run: &RunArgs,
    verbose: u8,
    output_path: &Path,
) -> Result<()> {
    let config = load_config(run, verbose)?;

    eprintln!("Loading data...");
    let counts = CountTable::from_tsv(counts_path)?;
    let genotypes = GenotypeTable::from_tsv(genotypes_path)?;
    let precision = load_precision(precision)?;
    eprintln!(
        "Loaded {} genes x {} samples, {} genotype blocks",
        counts.n_genes(),
        counts.n_samples(),
        genotypes.n_blocks()
    );

    let units = qtl_units(&counts, &genotypes, &precision)?;
    run_tests(&units, &config, output_path, None)?;

    eprintln!("\nDone!");
    Ok(())
}

/// Print the default configuration
fn cmd_config() -> Result<()> {
    print!("{}", TestConfig::default().to_yaml()?);
    Ok(())
}
