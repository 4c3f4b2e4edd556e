//! Design matrix construction from metadata and formula.

use crate::data::{Formula, Metadata, Term, Variable, VariableType};
use crate::error::{DmError, Result};
use nalgebra::DMatrix;
use std::collections::HashMap;

/// Name of the intercept column.
pub const INTERCEPT: &str = "(Intercept)";

/// A design matrix (samples x coefficients) with named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    matrix: DMatrix<f64>,
    coefficient_names: Vec<String>,
    sample_ids: Vec<String>,
}

/// Relative singular-value cutoff for column-space comparisons.
const RANK_TOLERANCE: f64 = 1e-9;

/// Named columns contributed by one variable.
type Columns = Vec<(String, Vec<f64>)>;

impl DesignMatrix {
    /// Wrap an existing matrix.
    pub fn from_matrix(
        matrix: DMatrix<f64>,
        coefficient_names: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        if coefficient_names.len() != matrix.ncols() {
            return Err(DmError::DimensionMismatch {
                expected: matrix.ncols(),
                actual: coefficient_names.len(),
            });
        }
        if sample_ids.len() != matrix.nrows() {
            return Err(DmError::DimensionMismatch {
                expected: matrix.nrows(),
                actual: sample_ids.len(),
            });
        }
        Ok(Self {
            matrix,
            coefficient_names,
            sample_ids,
        })
    }

    /// Intercept-only design for the given samples.
    pub fn intercept(sample_ids: Vec<String>) -> Self {
        Self {
            matrix: DMatrix::from_element(sample_ids.len(), 1, 1.0),
            coefficient_names: vec![INTERCEPT.to_string()],
            sample_ids,
        }
    }

    /// Build a design from metadata and a formula.
    ///
    /// Categorical variables use treatment coding with the alphabetically
    /// first level as reference; without an intercept the first categorical
    /// main effect keeps all of its levels. Missing values in a variable
    /// used by the formula are an error.
    pub fn from_formula(metadata: &Metadata, formula: &Formula) -> Result<Self> {
        let sample_ids = metadata.sample_ids().to_vec();
        let n = sample_ids.len();

        let mut cache: HashMap<&str, Columns> = HashMap::new();
        for var in formula.variables() {
            cache.insert(var, Self::variable_columns(metadata, var, true)?);
        }

        let mut names = Vec::new();
        let mut columns: Vec<Vec<f64>> = Vec::new();
        if formula.intercept {
            names.push(INTERCEPT.to_string());
            columns.push(vec![1.0; n]);
        }

        let mut full_coding_used = formula.intercept;
        for term in &formula.terms {
            match term {
                Term::Main(var) => {
                    let categorical = metadata.column_type(var) == Some(VariableType::Categorical);
                    let cols = if categorical && !full_coding_used {
                        full_coding_used = true;
                        Self::variable_columns(metadata, var, false)?
                    } else {
                        cache.get(var.as_str()).cloned().unwrap_or_default()
                    };
                    for (name, col) in cols {
                        names.push(name);
                        columns.push(col);
                    }
                }
                Term::Interaction(v1, v2) => {
                    let empty = Vec::new();
                    let cols1 = cache.get(v1.as_str()).unwrap_or(&empty);
                    let cols2 = cache.get(v2.as_str()).unwrap_or(&empty);
                    for (name1, col1) in cols1 {
                        for (name2, col2) in cols2 {
                            names.push(format!("{}:{}", name1, name2));
                            columns.push(col1.iter().zip(col2).map(|(a, b)| a * b).collect());
                        }
                    }
                }
            }
        }

        let matrix = DMatrix::from_fn(n, columns.len(), |i, j| columns[j][i]);
        Ok(Self {
            matrix,
            coefficient_names: names,
            sample_ids,
        })
    }

    /// Columns for one variable; `drop_reference` removes the first level.
    fn variable_columns(metadata: &Metadata, var: &str, drop_reference: bool) -> Result<Columns> {
        let values = metadata.column(var)?;
        if let Some(i) = values.iter().position(Variable::is_missing) {
            return Err(DmError::InvalidParameter(format!(
                "Variable '{}' is missing for sample '{}'",
                var,
                metadata.sample_ids()[i]
            )));
        }

        match metadata.column_type(var) {
            Some(VariableType::Continuous) => Ok(vec![(
                var.to_string(),
                values.iter().filter_map(Variable::as_continuous).collect(),
            )]),
            _ => {
                let levels = metadata.levels(var)?;
                let skip = usize::from(drop_reference);
                Ok(levels
                    .iter()
                    .skip(skip)
                    .map(|level| {
                        let col = values
                            .iter()
                            .map(|v| if v.as_categorical() == Some(level.as_str()) { 1.0 } else { 0.0 })
                            .collect();
                        (format!("{}{}", var, level), col)
                    })
                    .collect())
            }
        }
    }

    /// The matrix itself.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Consume into the matrix.
    pub fn into_matrix(self) -> DMatrix<f64> {
        self.matrix
    }

    /// Coefficient (column) names.
    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Sample IDs (rows).
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Number of samples (rows).
    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of coefficients (columns).
    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    /// Whether every column of `other` lies in the column space of `self`.
    ///
    /// Catches nestings the formulas cannot show, such as an intercept
    /// against the full level coding of `~ 0 + group`.
    pub fn spans(&self, other: &DesignMatrix) -> bool {
        let n = self.n_samples();
        if other.n_samples() != n {
            return false;
        }
        let p = self.n_coefficients();
        let combined = DMatrix::from_fn(n, p + other.n_coefficients(), |i, j| {
            if j < p {
                self.matrix[(i, j)]
            } else {
                other.matrix[(i, j - p)]
            }
        });
        let eps = RANK_TOLERANCE * combined.amax().max(1.0);
        combined.rank(eps) == self.matrix.rank(eps)
    }
}
