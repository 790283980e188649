//! Weighted summary statistics, pooled-variance estimators and the
//! distribution helpers shared by every analysis.

use anyhow::{Result, anyhow};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal, StudentsT};
use tracing::trace;

use crate::types::{CiDistribution, I2};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedSummary {
    pub mean: f64,
    pub variance: f64,
    pub q: f64,
    pub sum_w: f64,
    pub sum_w2: f64,
    pub sum_ew: f64,
}

/// Weighted mean, its variance `1/sum(w)`, and `Q = sum(w * (e - mean)^2)`.
pub fn weighted_mean_var_q(effects: &[f64], weights: &[f64]) -> Result<WeightedSummary> {
    if effects.len() != weights.len() {
        return Err(anyhow!(
            "effects ({}) and weights ({}) differ in length",
            effects.len(),
            weights.len()
        ));
    }
    let sum_w: f64 = weights.iter().sum();
    if sum_w == 0.0 {
        return Err(anyhow!("sum of weights is zero"));
    }
    let sum_w2: f64 = weights.iter().map(|w| w * w).sum();
    let sum_ew: f64 = effects.iter().zip(weights).map(|(e, w)| e * w).sum();
    let mean = sum_ew / sum_w;
    let q = effects
        .iter()
        .zip(weights)
        .map(|(e, w)| w * (e - mean).powi(2))
        .sum();
    Ok(WeightedSummary {
        mean,
        variance: 1.0 / sum_w,
        q,
        sum_w,
        sum_w2,
        sum_ew,
    })
}

/// Unchecked weighted mean for resampling loops.
pub fn weighted_mean(effects: &[f64], weights: &[f64]) -> f64 {
    let sum_w: f64 = weights.iter().sum();
    let sum_ew: f64 = effects.iter().zip(weights).map(|(e, w)| e * w).sum();
    sum_ew / sum_w
}

/// Weighted median. When half the total weight falls exactly on the
/// boundary between two sorted effects, their average is returned.
pub fn weighted_median(effects: &[f64], weights: &[f64]) -> f64 {
    let n = effects.len().min(weights.len());
    if n == 0 {
        return f64::NAN;
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| effects[a].total_cmp(&effects[b]));
    let midpoint = weights[..n].iter().sum::<f64>() / 2.0;
    let mut i = 0;
    let mut running = weights[order[0]];
    while running < midpoint && i + 1 < n {
        i += 1;
        running += weights[order[i]];
    }
    if running == midpoint && i + 1 < n {
        (effects[order[i]] + effects[order[i + 1]]) / 2.0
    } else {
        effects[order[i]]
    }
}

pub fn reciprocal(values: &[f64]) -> Vec<f64> {
    values.iter().map(|v| 1.0 / v).collect()
}

/// Random-effects weights `1/(v + pooled)`.
pub fn random_weights(variances: &[f64], pooled_var: f64) -> Vec<f64> {
    variances.iter().map(|v| 1.0 / (v + pooled_var)).collect()
}

/// Values at `indices`, in index order.
pub fn select(values: &[f64], indices: &[usize]) -> Vec<f64> {
    indices.iter().map(|&i| values[i]).collect()
}

/// Within-group Q summed over `groups`, each a list of row indices.
pub fn pooled_within_q(effects: &[f64], weights: &[f64], groups: &[Vec<usize>]) -> f64 {
    groups
        .iter()
        .map(|members| {
            let e = select(effects, members);
            let w = select(weights, members);
            let mean = weighted_mean(&e, &w);
            e.iter()
                .zip(&w)
                .map(|(ei, wi)| wi * (ei - mean).powi(2))
                .sum::<f64>()
        })
        .sum()
}

pub fn mean_of(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn pooled_var_no_structure(qt: f64, sum_w: f64, sum_w2: f64, df: f64) -> f64 {
    let pooled = (qt - df) / (sum_w - sum_w2 / sum_w);
    pooled.max(0.0)
}

/// `group_sums` holds `(sum_w, sum_w2)` for each group.
pub fn pooled_var_group_structure(qe: f64, group_sums: &[(f64, f64)], n: usize, groups: usize) -> f64 {
    let denominator: f64 = group_sums
        .iter()
        .map(|(sum_w, sum_w2)| sum_w - sum_w2 / sum_w)
        .sum();
    let pooled = (qe - (n as f64 - groups as f64)) / denominator;
    pooled.max(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionSums {
    pub sum_w: f64,
    pub sum_wx: f64,
    pub sum_wx2: f64,
}

pub fn pooled_var_regression_structure(qe: f64, sums: RegressionSums, x: &[f64], w: &[f64]) -> f64 {
    let RegressionSums {
        sum_w,
        sum_wx,
        sum_wx2,
    } = sums;
    let n = x.len();
    let denom = sum_w * sum_wx2 - sum_wx.powi(2);
    let d_sum: f64 = x
        .iter()
        .zip(w)
        .map(|(xi, wi)| wi.powi(2) * ((sum_wx2 - 2.0 * xi * sum_wx + xi.powi(2) * sum_w) / denom))
        .sum();
    let pooled = (qe - (n as f64 - 2.0)) / (sum_w - d_sum);
    pooled.max(0.0)
}

/// I² with a confidence interval from the log-H transform. Degenerate
/// inputs (zero Q, fewer than three studies on the small-Q branch) give
/// all zeros.
pub fn i_squared(qt: f64, n: usize, alpha: f64) -> I2 {
    let zero = I2 {
        i2: 0.0,
        lower: 0.0,
        upper: 0.0,
    };
    let n = n as f64;
    let df = n - 1.0;
    if qt == 0.0 || df == 0.0 {
        return zero;
    }
    let i2 = (100.0 * (qt - df) / qt).max(0.0);
    let ln_h = (qt / df).sqrt().ln();
    let se_ln_h = if qt > df {
        let denom = 2.0 * ((2.0 * qt).sqrt() - (2.0 * n - 3.0).sqrt());
        if denom == 0.0 {
            return zero;
        }
        (qt.ln() - df.ln()) / denom
    } else {
        let m = n - 2.0;
        if m == 0.0 {
            return zero;
        }
        ((1.0 / (2.0 * m)) * (1.0 - 1.0 / (3.0 * m.powi(2)))).sqrt()
    };
    let z = -norm_ppf(alpha / 2.0);
    let lower_h = (ln_h - z * se_ln_h).exp();
    let upper_h = (ln_h + z * se_ln_h).exp();
    let lower = (100.0 * (lower_h.powi(2) - 1.0) / lower_h.powi(2)).max(0.0);
    let upper = (100.0 * (upper_h.powi(2) - 1.0) / upper_h.powi(2)).max(0.0);
    trace!("i2: qt={qt}, n={n}, i2={i2}, lower={lower}, upper={upper}");
    I2 { i2, lower, upper }
}

pub fn norm_cdf(x: f64) -> f64 {
    Normal::new(0.0, 1.0).map(|d| d.cdf(x)).unwrap_or(f64::NAN)
}

pub fn norm_ppf(p: f64) -> f64 {
    Normal::new(0.0, 1.0)
        .map(|d| d.inverse_cdf(p))
        .unwrap_or(f64::NAN)
}

pub fn t_cdf(x: f64, df: f64) -> f64 {
    if df <= 0.0 {
        return f64::NAN;
    }
    StudentsT::new(0.0, 1.0, df)
        .map(|d| d.cdf(x))
        .unwrap_or(f64::NAN)
}

pub fn t_ppf(p: f64, df: f64) -> f64 {
    if df <= 0.0 {
        return f64::NAN;
    }
    StudentsT::new(0.0, 1.0, df)
        .map(|d| d.inverse_cdf(p))
        .unwrap_or(f64::NAN)
}

/// Upper-tail chi-square probability; NaN for non-positive df.
pub fn chi_square_p(q: f64, df: i64) -> f64 {
    if df <= 0 {
        return f64::NAN;
    }
    ChiSquared::new(df as f64)
        .map(|d| 1.0 - d.cdf(q.max(0.0)))
        .unwrap_or(f64::NAN)
}

/// Two-tailed normal probability of a z-score.
pub fn prob_z_score(z: f64) -> f64 {
    2.0 * (1.0 - norm_cdf(z.abs()))
}

/// Two-tailed Student's t probability.
pub fn prob_t_score(t: f64, df: f64) -> f64 {
    2.0 * (1.0 - t_cdf(t.abs(), df))
}

pub fn normal_interval(mean: f64, se: f64, alpha: f64) -> (f64, f64) {
    let z = norm_ppf(1.0 - alpha / 2.0);
    (mean - z * se, mean + z * se)
}

pub fn t_interval(mean: f64, se: f64, alpha: f64, df: f64) -> (f64, f64) {
    let t = t_ppf(1.0 - alpha / 2.0, df);
    (mean - t * se, mean + t * se)
}

/// Interval for a mean with variance `variance`; `df` is only used for
/// the t distribution.
pub fn confidence_interval(
    mean: f64,
    variance: f64,
    alpha: f64,
    distribution: CiDistribution,
    df: f64,
) -> (f64, f64) {
    let se = variance.sqrt();
    match distribution {
        CiDistribution::Normal => normal_interval(mean, se, alpha),
        CiDistribution::T => t_interval(mean, se, alpha, df),
    }
}

/// Ranks with ties sharing their average rank, starting at 1.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }
    ranks
}

/// Rounds half to even, the convention used for every index and count
/// derived from a real-valued estimate.
pub fn round_half_even(x: f64) -> i64 {
    x.round_ties_even() as i64
}
