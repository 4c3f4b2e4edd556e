//! R-style model formulas for the full and null designs.

use crate::error::{DmError, Result};
use serde::{Deserialize, Serialize};

/// A term on the right-hand side of a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Term {
    /// Main effect of a variable.
    Main(String),
    /// Interaction between two variables.
    Interaction(String, String),
}

impl Term {
    /// Variable names involved in this term.
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Term::Main(v) => vec![v.as_str()],
            Term::Interaction(v1, v2) => vec![v1.as_str(), v2.as_str()],
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Main(v) => write!(f, "{}", v),
            Term::Interaction(v1, v2) => write!(f, "{}:{}", v1, v2),
        }
    }
}

/// A parsed formula.
///
/// Supported syntax:
/// - `~ 1` - intercept only (the usual null model)
/// - `~ group` / `~ group + batch` - intercept plus main effects
/// - `~ group * batch` - main effects plus their interaction
/// - `~ group:batch` - interaction only
/// - `~ 0 + group` / `~ -1 + group` - no intercept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    /// Whether to include an intercept.
    pub intercept: bool,
    /// Terms in order of appearance (without the intercept).
    pub terms: Vec<Term>,
}

fn interaction(term: &str, sep: char) -> Result<(String, String)> {
    let parts: Vec<&str> = term.split(sep).map(str::trim).collect();
    match parts.as_slice() {
        [a, b] if !a.is_empty() && !b.is_empty() => Ok((a.to_string(), b.to_string())),
        _ => Err(DmError::FormulaParse(format!(
            "Invalid interaction term: {}",
            term
        ))),
    }
}

fn push_unique(terms: &mut Vec<Term>, term: Term) {
    if !terms.contains(&term) {
        terms.push(term);
    }
}

impl Formula {
    /// Parse a formula string.
    ///
    /// ```
    /// use dmfit::data::Formula;
    /// let f = Formula::parse("~ condition + batch").unwrap();
    /// assert!(f.intercept);
    /// assert_eq!(f.terms.len(), 2);
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        let rhs = formula
            .trim()
            .strip_prefix('~')
            .ok_or_else(|| DmError::FormulaParse("Formula must start with '~'".to_string()))?
            .trim();
        if rhs.is_empty() {
            return Err(DmError::FormulaParse(
                "Formula right-hand side is empty".to_string(),
            ));
        }

        let mut intercept = true;
        let mut terms: Vec<Term> = Vec::new();
        for raw in rhs.split('+').map(str::trim) {
            match raw {
                "" => {
                    return Err(DmError::FormulaParse(format!(
                        "Empty term in formula '{}'",
                        formula.trim()
                    )))
                }
                "1" => {}
                "0" | "-1" => intercept = false,
                t if t.contains('*') => {
                    let (a, b) = interaction(t, '*')?;
                    push_unique(&mut terms, Term::Main(a.clone()));
                    push_unique(&mut terms, Term::Main(b.clone()));
                    push_unique(&mut terms, Term::Interaction(a, b));
                }
                t if t.contains(':') => {
                    let (a, b) = interaction(t, ':')?;
                    push_unique(&mut terms, Term::Interaction(a, b));
                }
                t => push_unique(&mut terms, Term::Main(t.to_string())),
            }
        }

        if terms.is_empty() && !intercept {
            return Err(DmError::FormulaParse(
                "Formula must have at least one term".to_string(),
            ));
        }

        Ok(Self { intercept, terms })
    }

    /// Intercept-only formula `~ 1`.
    pub fn intercept_only() -> Self {
        Self {
            intercept: true,
            terms: Vec::new(),
        }
    }

    /// Sorted, deduplicated variable names used in the formula.
    pub fn variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = self.terms.iter().flat_map(|t| t.variables()).collect();
        vars.sort_unstable();
        vars.dedup();
        vars
    }

    /// Whether every term of `self` also appears in `full`.
    ///
    /// Purely syntactic: `~ 1` is not nested in `~ 0 + group` here, see
    /// [`crate::data::DesignMatrix::spans`] for the column-space check.
    pub fn is_nested_in(&self, full: &Formula) -> bool {
        (!self.intercept || full.intercept) && self.terms.iter().all(|t| full.terms.contains(t))
    }
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "~ ")?;
        let mut parts: Vec<String> = Vec::new();
        if !self.intercept {
            parts.push("0".to_string());
        } else if self.terms.is_empty() {
            parts.push("1".to_string());
        }
        parts.extend(self.terms.iter().map(|t| t.to_string()));
        write!(f, "{}", parts.join(" + "))
    }
}
