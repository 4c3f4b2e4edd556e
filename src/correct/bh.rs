//! Benjamini-Hochberg false discovery rate correction.

use serde::{Deserialize, Serialize};

/// Result of BH correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BhCorrected {
    /// Original p-values.
    pub p_values: Vec<f64>,
    /// Adjusted p-values (NaN where the input was NaN).
    pub q_values: Vec<f64>,
    /// Number of defined p-values that entered the ranking.
    pub n_tests: usize,
}

impl BhCorrected {
    /// Count significant results at a threshold.
    pub fn n_significant(&self, alpha: f64) -> usize {
        self.q_values.iter().filter(|&&q| q < alpha).count()
    }
}

/// Apply Benjamini-Hochberg FDR correction.
///
/// For the m defined p-values sorted ascending, the adjusted value at rank i
/// is `q[i] = min(p[i] * m / i, q[i+1])`, capped at 1. NaN p-values are
/// carried through as NaN and do not count towards m, so undefined tests
/// never shift the ranks of the others.
pub fn correct_bh(p_values: &[f64]) -> BhCorrected {
    let mut q_values = vec![f64::NAN; p_values.len()];

    let mut indices: Vec<usize> = (0..p_values.len())
        .filter(|&i| !p_values[i].is_nan())
        .collect();
    let n = indices.len();
    if n == 0 {
        return BhCorrected {
            p_values: p_values.to_vec(),
            q_values,
            n_tests: 0,
        };
    }

    indices.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let n_f64 = n as f64;
    let mut running = f64::INFINITY;
    // Work backwards from the largest p-value.
    for (i, &orig_idx) in indices.iter().enumerate().rev() {
        let rank = (i + 1) as f64;
        let adjusted = p_values[orig_idx] * n_f64 / rank;
        running = running.min(adjusted).min(1.0);
        q_values[orig_idx] = running;
    }

    BhCorrected {
        p_values: p_values.to_vec(),
        q_values,
        n_tests: n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bh_ordering() {
        // P-values in non-sorted order
        let p_values = vec![0.04, 0.01, 0.03, 0.005];
        let corrected = correct_bh(&p_values);

        // q = 0.005 * 4 / 1 = 0.02
        assert_relative_eq!(corrected.q_values[3], 0.02, epsilon = 1e-10);
        // min(0.01 * 4 / 2, 0.03 * 4 / 3, 0.04) = 0.02
        assert_relative_eq!(corrected.q_values[1], 0.02, epsilon = 1e-10);
        assert_eq!(corrected.p_values, p_values);
    }

    #[test]
    fn test_bh_known_values() {
        let p_values = vec![0.005, 0.01, 0.02, 0.04, 0.1];
        let corrected = correct_bh(&p_values);

        assert_eq!(corrected.n_tests, 5);
        assert_relative_eq!(corrected.q_values[0], 0.025, epsilon = 1e-10);
        assert_relative_eq!(corrected.q_values[1], 0.025, epsilon = 1e-10);
        assert_relative_eq!(corrected.q_values[2], 1.0 / 30.0, epsilon = 1e-10);
        assert_relative_eq!(corrected.q_values[3], 0.05, epsilon = 1e-10);
        assert_relative_eq!(corrected.q_values[4], 0.1, epsilon = 1e-10);
    }

    #[test]
    fn test_bh_nan_excluded_from_ranking() {
        let with_nan = correct_bh(&[0.01, f64::NAN, 0.04, f64::NAN]);
        let without = correct_bh(&[0.01, 0.04]);

        assert_eq!(with_nan.n_tests, 2);
        assert!(with_nan.q_values[1].is_nan());
        assert!(with_nan.q_values[3].is_nan());
        assert_relative_eq!(with_nan.q_values[0], without.q_values[0], epsilon = 1e-12);
        assert_relative_eq!(with_nan.q_values[2], without.q_values[1], epsilon = 1e-12);
    }

    #[test]
    fn test_bh_bounded() {
        let corrected = correct_bh(&[0.5, 0.6, 0.7, 0.8, 0.9, 1.0]);
        for q in &corrected.q_values {
            assert!(*q <= 1.0);
        }
    }

    #[test]
    fn test_bh_empty_and_all_nan() {
        let corrected = correct_bh(&[]);
        assert_eq!(corrected.n_tests, 0);
        assert!(corrected.q_values.is_empty());

        let corrected = correct_bh(&[f64::NAN, f64::NAN]);
        assert_eq!(corrected.n_tests, 0);
        assert!(corrected.q_values.iter().all(|q| q.is_nan()));
    }

    #[test]
    fn test_n_significant() {
        let corrected = correct_bh(&[0.001, 0.01, 0.03, 0.1, 0.5, f64::NAN]);

        let n_sig_01 = corrected.n_significant(0.01);
        let n_sig_05 = corrected.n_significant(0.05);
        let n_sig_10 = corrected.n_significant(0.10);

        assert!(n_sig_01 <= n_sig_05);
        assert!(n_sig_05 <= n_sig_10);
        assert_eq!(n_sig_01, 1);
    }
}
