use metastat::stats::{
    RegressionSums, average_ranks, chi_square_p, confidence_interval, i_squared,
    pooled_var_group_structure, pooled_var_no_structure, pooled_var_regression_structure,
    pooled_within_q, prob_t_score, prob_z_score, random_weights, round_half_even,
    weighted_mean_var_q, weighted_median,
};
use metastat::types::CiDistribution;

#[test]
fn weighted_mean_variance_and_q() {
    let s = weighted_mean_var_q(&[1.0, 2.0, 3.0], &[1.0, 1.0, 2.0]).expect("summary");
    assert!((s.mean - 2.25).abs() < 1e-12);
    assert!((s.variance - 0.25).abs() < 1e-12);
    assert!((s.q - 2.75).abs() < 1e-12);
    assert!((s.sum_w2 - 6.0).abs() < 1e-12);
}

#[test]
fn weighted_mean_rejects_bad_input() {
    assert!(weighted_mean_var_q(&[1.0, 2.0], &[1.0]).is_err());
    assert!(weighted_mean_var_q(&[1.0, 2.0], &[0.0, 0.0]).is_err());
}

#[test]
fn weighted_median_averages_on_exact_half() {
    assert!((weighted_median(&[4.0, 1.0, 3.0, 2.0], &[1.0; 4]) - 2.5).abs() < 1e-12);
    assert!((weighted_median(&[3.0, 1.0, 2.0], &[1.0; 3]) - 2.0).abs() < 1e-12);
    // heavy weight pulls the median onto one study
    assert!((weighted_median(&[1.0, 2.0, 3.0], &[1.0, 1.0, 5.0]) - 3.0).abs() < 1e-12);
    assert!(weighted_median(&[], &[]).is_nan());
}

#[test]
fn pooled_variance_estimators_clamp_at_zero() {
    assert!((pooled_var_no_structure(10.0, 4.0, 6.0, 2.0) - 3.2).abs() < 1e-12);
    assert_eq!(pooled_var_no_structure(1.0, 4.0, 6.0, 2.0), 0.0);

    let grouped = pooled_var_group_structure(10.0, &[(4.0, 6.0), (2.0, 2.0)], 6, 2);
    assert!((grouped - 6.0 / 3.5).abs() < 1e-12);
    assert_eq!(pooled_var_group_structure(0.5, &[(4.0, 6.0), (2.0, 2.0)], 6, 2), 0.0);

    let x = [1.0, 2.0, 3.0, 4.0];
    let w = [1.0; 4];
    let sums = RegressionSums {
        sum_w: 4.0,
        sum_wx: 10.0,
        sum_wx2: 30.0,
    };
    assert_eq!(pooled_var_regression_structure(0.098, sums, &x, &w), 0.0);
    // with unit weights the denominator is n - 2
    let pooled = pooled_var_regression_structure(6.0, sums, &x, &w);
    assert!((pooled - 2.0).abs() < 1e-10);
}

#[test]
fn random_weights_add_pooled_variance() {
    let w = random_weights(&[1.0, 0.5], 0.5);
    assert!((w[0] - 1.0 / 1.5).abs() < 1e-12);
    assert!((w[1] - 1.0).abs() < 1e-12);
}

#[test]
fn within_q_sums_each_group() {
    let effects = [1.0, 2.0, 3.0, 4.0];
    let weights = [1.0; 4];
    let q = pooled_within_q(&effects, &weights, &[vec![0, 1], vec![2, 3]]);
    assert!((q - 1.0).abs() < 1e-12);
}

#[test]
fn i_squared_and_degenerate_cases() {
    let i2 = i_squared(10.0, 5, 0.05);
    assert!((i2.i2 - 60.0).abs() < 1e-12);
    assert!(i2.lower <= i2.i2 && i2.i2 <= i2.upper);

    let low = i_squared(2.0, 5, 0.05);
    assert_eq!(low.i2, 0.0);
    assert!(low.upper >= 0.0);

    let zero = i_squared(0.0, 5, 0.05);
    assert_eq!((zero.i2, zero.lower, zero.upper), (0.0, 0.0, 0.0));
    let one = i_squared(3.0, 1, 0.05);
    assert_eq!(one.i2, 0.0);
}

#[test]
fn distribution_probabilities() {
    assert!((chi_square_p(2.75, 2) - (-1.375f64).exp()).abs() < 1e-10);
    assert!(chi_square_p(1.0, 0).is_nan());
    assert!((prob_z_score(1.959963984540054) - 0.05).abs() < 1e-9);
    assert!((prob_z_score(-1.959963984540054) - 0.05).abs() < 1e-9);
    assert!((prob_t_score(0.0, 5.0) - 1.0).abs() < 1e-12);
    assert!(prob_t_score(2.0, 5.0) > prob_z_score(2.0));
}

#[test]
fn intervals_by_distribution() {
    let (lo, hi) = confidence_interval(0.0, 1.0, 0.05, CiDistribution::Normal, 3.0);
    assert!((hi - 1.959963984540054).abs() < 1e-9);
    assert!((lo + hi).abs() < 1e-12);

    let (t_lo, t_hi) = confidence_interval(1.0, 4.0, 0.05, CiDistribution::T, 4.0);
    // t(0.975, 4) = 2.776445
    assert!((t_hi - (1.0 + 2.0 * 2.776445105)).abs() < 1e-6);
    assert!((t_lo - (1.0 - 2.0 * 2.776445105)).abs() < 1e-6);
}

#[test]
fn ties_share_average_rank() {
    assert_eq!(average_ranks(&[3.0, 1.0, 3.0, 2.0]), vec![3.5, 1.0, 3.5, 2.0]);
    assert_eq!(average_ranks(&[5.0, 5.0, 5.0]), vec![2.0, 2.0, 2.0]);
}

#[test]
fn rounding_is_half_to_even() {
    assert_eq!(round_half_even(2.5), 2);
    assert_eq!(round_half_even(3.5), 4);
    assert_eq!(round_half_even(-0.5), 0);
    assert_eq!(round_half_even(2.6), 3);
}
