//! Property-based tests using proptest.
//!
//! These tests verify invariants that must hold for all valid inputs:
//!   - BH-adjusted p-values are bounded and monotone in the raw p-values
//!   - LRT statistics are exact differences with the df = 0 convention
//!   - Fitted DM proportions lie on the simplex
//!   - Degenerate genes keep their shapes

use dmfit::correct::correct_bh;
use dmfit::model::{dm_fit, dm_proportions, FitConfig};
use dmfit::test::likelihood_ratio;
use nalgebra::DMatrix;
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// 1. BH q-values are non-decreasing in raw p and lie in [p, 1]
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_bh_monotone_and_bounded(p in prop::collection::vec(0.0f64..=1.0, 1..60)) {
        let corrected = correct_bh(&p);
        prop_assert_eq!(corrected.q_values.len(), p.len());

        let mut order: Vec<usize> = (0..p.len()).collect();
        order.sort_by(|&a, &b| p[a].total_cmp(&p[b]));
        for pair in order.windows(2) {
            prop_assert!(corrected.q_values[pair[0]] <= corrected.q_values[pair[1]]);
        }
        for (raw, q) in p.iter().zip(&corrected.q_values) {
            prop_assert!(*q <= 1.0);
            prop_assert!(*q >= *raw * (1.0 - 1e-12));
        }
    }

    #[test]
    fn prop_bh_ignores_missing(
        p in prop::collection::vec(0.0f64..=1.0, 1..30),
        gaps in prop::collection::vec(any::<bool>(), 30),
    ) {
        let with_gaps: Vec<f64> = p
            .iter()
            .zip(&gaps)
            .map(|(&v, &gap)| if gap { f64::NAN } else { v })
            .collect();
        let kept: Vec<f64> = with_gaps.iter().copied().filter(|v| !v.is_nan()).collect();

        let full = correct_bh(&with_gaps);
        let compact = correct_bh(&kept);

        let defined: Vec<f64> = full.q_values.iter().copied().filter(|v| !v.is_nan()).collect();
        prop_assert_eq!(defined, compact.q_values);
        for (raw, q) in with_gaps.iter().zip(&full.q_values) {
            prop_assert_eq!(raw.is_nan(), q.is_nan());
        }
    }
}

// ---------------------------------------------------------------------------
// 2. LRT identities
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_lrt_is_twice_the_difference(
        ll_null in -1e4f64..0.0,
        gain in 0.0f64..50.0,
        df in 1usize..8,
    ) {
        let ll_full = ll_null + gain;
        let row = likelihood_ratio(ll_full, ll_null, df);
        prop_assert_eq!(row.lr, 2.0 * (ll_full - ll_null));
        prop_assert!(row.p_value >= 0.0 && row.p_value <= 1.0);
    }

    #[test]
    fn prop_lrt_equal_likelihoods(ll in -1e4f64..0.0, df in 1usize..8) {
        let row = likelihood_ratio(ll, ll, df);
        prop_assert_eq!(row.lr, 0.0);
        prop_assert_eq!(row.p_value, 1.0);
    }

    #[test]
    fn prop_lrt_zero_df(ll_full in -1e4f64..0.0, ll_null in -1e4f64..0.0) {
        prop_assert_eq!(likelihood_ratio(ll_full, ll_null, 0).p_value, 1.0);
    }

    #[test]
    fn prop_lrt_negative_is_undefined(ll_full in -1e4f64..0.0, loss in 1e-6f64..50.0, df in 1usize..8) {
        let row = likelihood_ratio(ll_full, ll_full + loss, df);
        prop_assert!(row.lr.is_nan());
        prop_assert!(row.p_value.is_nan());
    }
}

// ---------------------------------------------------------------------------
// 3. Proportions lie on the simplex
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_proportions_on_simplex(
        n in 1usize..12,
        q in 2usize..6,
        covariate in prop::collection::vec(-2.0f64..2.0, 12),
        coefs in prop::collection::vec(-3.0f64..3.0, 10),
    ) {
        let x = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { covariate[i] });
        let bt = DMatrix::from_fn(2, q - 1, |r, c| coefs[r * 5 + c]);
        let pi = dm_proportions(&x, &bt);

        prop_assert_eq!(pi.shape(), (q, n));
        for col in pi.column_iter() {
            prop_assert!((col.sum() - 1.0).abs() < 1e-9);
            prop_assert!(col.iter().all(|&v| v > -1e-12 && v <= 1.0));
        }
    }
}

// ---------------------------------------------------------------------------
// 4. Degenerate genes keep their shapes
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_degenerate_fit_shapes(
        n in 2usize..10,
        q in 1usize..5,
        p in 1usize..3,
        count in 1u32..50,
        undefined_precision in any::<bool>(),
    ) {
        // A single feature, or no usable precision, is degenerate.
        let q = if undefined_precision { q } else { 1 };
        let y = DMatrix::from_element(q, n, f64::from(count));
        let x = DMatrix::from_fn(n, p, |i, j| if j == 0 { 1.0 } else { (i % 2) as f64 });
        let precision = if undefined_precision { None } else { Some(10.0) };

        let fit = dm_fit(&y, &x, precision, &FitConfig::default());
        prop_assert!(!fit.is_defined());
        prop_assert!(fit.log_likelihood.is_nan());
        prop_assert_eq!(fit.coefficients.shape(), (q, p));
        prop_assert_eq!(fit.proportions.shape(), (q, n));
        prop_assert!(fit.proportions.iter().all(|v| v.is_nan()));
    }
}
