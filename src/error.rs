//! Error types for the dmfit library.

use thiserror::Error;

/// Main error type for the library.
///
/// Only malformed input (files, shapes, formulas, configuration) produces an
/// error. A gene whose fit degenerates or fails to converge is reported
/// through NaN values in its fit and result row instead.
#[derive(Error, Debug)]
pub enum DmError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid count value '{value}' at row {row}, column {col}")]
    InvalidCount {
        value: String,
        row: usize,
        col: usize,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Sample ID mismatch: {0}")]
    SampleMismatch(String),

    #[error("Missing column '{0}' in metadata")]
    MissingColumn(String),

    #[error("Formula parse error: {0}")]
    FormulaParse(String),

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, DmError>;
