//! Data structures for gene-grouped count analysis.

mod count_matrix;
mod design_matrix;
mod formula;
mod genotype;
mod metadata;
mod precision;
mod result;

pub use count_matrix::{CountTable, GeneCounts};
pub use design_matrix::{DesignMatrix, INTERCEPT};
pub use formula::{Formula, Term};
pub use genotype::{GenotypeBlock, GenotypeTable};
pub use metadata::{Metadata, Variable, VariableType};
pub use precision::{PrecisionSource, PrecisionTable};
pub use result::{ResultSummary, ResultTable, ResultsRow};
