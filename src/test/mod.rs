//! Hypothesis testing: likelihood ratio tests and their permutation calibration.


pub use lrt::{
    chi_square_sf, degrees_of_freedom, genotype_degrees_of_freedom, likelihood_ratio,
    likelihood_ratio_batch, likelihood_ratio_per_feature, LrtRow,
};
pub use permutation::{
    adjust_p_values, per_gene_p_values, pooled_p_values, unit_rng, PermutationConfig,
    PermutationMode, PermutationOutcome, PermutationProblem, PermutationState,
};
