//! Sample metadata: the covariates from which designs are built.

use crate::error::{DmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// A single covariate value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    /// Categorical value with a string level.
    Categorical(String),
    /// Continuous numeric value.
    Continuous(f64),
    /// Missing value (`NA` or empty).
    Missing,
}

impl Variable {
    /// Check if this is a missing value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Variable::Missing)
    }

    /// Try to get as categorical string.
    pub fn as_categorical(&self) -> Option<&str> {
        match self {
            Variable::Categorical(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as continuous f64.
    pub fn as_continuous(&self) -> Option<f64> {
        match self {
            Variable::Continuous(v) => Some(*v),
            _ => None,
        }
    }
}

/// Inferred kind of a metadata column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableType {
    Categorical,
    Continuous,
}

pub(crate) fn is_na(raw: &str) -> bool {
    raw.is_empty() || raw.eq_ignore_ascii_case("na") || raw == "NaN"
}

/// Sample metadata, one row per sample.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    sample_ids: Vec<String>,
    column_names: Vec<String>,
    /// Column-major values: `columns[c][s]` is column `c` of sample `s`.
    columns: Vec<Vec<Variable>>,
    column_types: Vec<VariableType>,
}

impl Metadata {
    /// Load metadata from a TSV file.
    ///
    /// The first column holds sample IDs, the remaining columns covariates.
    /// A column is continuous if every non-missing value parses as a number,
    /// otherwise categorical.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    /// Parse metadata from any TSV source.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut lines = BufReader::new(reader).lines();

        let header_line = lines
            .next()
            .ok_or_else(|| DmError::EmptyData("Empty metadata file".to_string()))??;
        let header: Vec<&str> = header_line.trim_end().split('\t').collect();
        if header.len() < 2 {
            return Err(DmError::EmptyData(
                "Metadata must have at least one variable column".to_string(),
            ));
        }
        let column_names: Vec<String> = header[1..].iter().map(|s| s.trim().to_string()).collect();

        let mut sample_ids = Vec::new();
        let mut raw: Vec<Vec<String>> = vec![Vec::new(); column_names.len()];
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            sample_ids.push(fields[0].trim().to_string());
            for (c, column) in raw.iter_mut().enumerate() {
                column.push(fields.get(c + 1).map(|s| s.trim()).unwrap_or("").to_string());
            }
        }

        if sample_ids.is_empty() {
            return Err(DmError::EmptyData("No samples in metadata".to_string()));
        }

        let mut columns = Vec::with_capacity(raw.len());
        let mut column_types = Vec::with_capacity(raw.len());
        for values in raw {
            let numeric = values
                .iter()
                .all(|v| is_na(v) || v.parse::<f64>().is_ok());
            let kind = if numeric {
                VariableType::Continuous
            } else {
                VariableType::Categorical
            };
            let parsed = values
                .into_iter()
                .map(|v| {
                    if is_na(&v) {
                        Variable::Missing
                    } else if numeric {
                        v.parse::<f64>().map(Variable::Continuous).unwrap_or(Variable::Missing)
                    } else {
                        Variable::Categorical(v)
                    }
                })
                .collect();
            columns.push(parsed);
            column_types.push(kind);
        }

        Ok(Self {
            sample_ids,
            column_names,
            columns,
            column_types,
        })
    }

    /// Sample IDs in order.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Column names.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Number of samples.
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Number of columns (variables).
    pub fn n_columns(&self) -> usize {
        self.column_names.len()
    }

    fn column_index(&self, column: &str) -> Result<usize> {
        self.column_names
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| DmError::MissingColumn(column.to_string()))
    }

    /// Value of one sample in one column.
    pub fn get(&self, sample_id: &str, column: &str) -> Option<&Variable> {
        let c = self.column_index(column).ok()?;
        let s = self.sample_ids.iter().position(|id| id == sample_id)?;
        self.columns[c].get(s)
    }

    /// All values of a column, in sample order.
    pub fn column(&self, column: &str) -> Result<&[Variable]> {
        let c = self.column_index(column)?;
        Ok(&self.columns[c])
    }

    /// Kind of a column.
    pub fn column_type(&self, column: &str) -> Option<VariableType> {
        self.column_index(column).ok().map(|c| self.column_types[c])
    }

    /// Sorted distinct levels of a categorical column.
    pub fn levels(&self, column: &str) -> Result<Vec<String>> {
        let levels: BTreeSet<&str> = self
            .column(column)?
            .iter()
            .filter_map(Variable::as_categorical)
            .collect();
        Ok(levels.into_iter().map(String::from).collect())
    }

    /// Reorder / subset to the given samples.
    pub fn subset_samples(&self, sample_ids: &[String]) -> Result<Self> {
        let index: HashMap<&str, usize> = self
            .sample_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let rows = sample_ids
            .iter()
            .map(|id| {
                index.get(id.as_str()).copied().ok_or_else(|| {
                    DmError::SampleMismatch(format!("Sample '{}' not found in metadata", id))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            sample_ids: sample_ids.to_vec(),
            column_names: self.column_names.clone(),
            columns: self
                .columns
                .iter()
                .map(|col| rows.iter().map(|&r| col[r].clone()).collect())
                .collect(),
            column_types: self.column_types.clone(),
        })
    }

    /// Check if a column exists.
    pub fn has_column(&self, column: &str) -> bool {
        self.column_names.iter().any(|c| c == column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_tsv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sample_id\tcondition\tbatch_size").unwrap();
        writeln!(file, "S1\tcontrol\t25").unwrap();
        writeln!(file, "S2\tknockdown\t30").unwrap();
        writeln!(file, "S3\tcontrol\t35").unwrap();
        writeln!(file, "S4\tknockdown\tNA").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_metadata() {
        let file = create_test_tsv();
        let meta = Metadata::from_tsv(file.path()).unwrap();

        assert_eq!(meta.n_samples(), 4);
        assert_eq!(meta.n_columns(), 2);
        assert_eq!(meta.sample_ids(), &["S1", "S2", "S3", "S4"]);
        assert_eq!(meta.column_type("condition"), Some(VariableType::Categorical));
        assert_eq!(meta.column_type("batch_size"), Some(VariableType::Continuous));
        assert_eq!(meta.get("S2", "batch_size").unwrap().as_continuous(), Some(30.0));
        assert!(meta.get("S4", "batch_size").unwrap().is_missing());
    }

    #[test]
    fn test_levels_sorted() {
        let meta = Metadata::from_tsv(create_test_tsv().path()).unwrap();
        assert_eq!(meta.levels("condition").unwrap(), vec!["control", "knockdown"]);
        assert!(matches!(meta.levels("missing"), Err(DmError::MissingColumn(_))));
    }

    #[test]
    fn test_subset_reorders() {
        let meta = Metadata::from_tsv(create_test_tsv().path()).unwrap();
        let subset = meta
            .subset_samples(&["S3".to_string(), "S2".to_string()])
            .unwrap();

        assert_eq!(subset.sample_ids(), &["S3", "S2"]);
        assert_eq!(subset.column("condition").unwrap()[1].as_categorical(), Some("knockdown"));
        assert!(meta.subset_samples(&["S9".to_string()]).is_err());
    }

    #[test]
    fn test_empty_file() {
        let file = NamedTempFile::new().unwrap();
        assert!(matches!(Metadata::from_tsv(file.path()), Err(DmError::EmptyData(_))));
    }
}
