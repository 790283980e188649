//! Trim-and-fill estimation of studies missing from one side of the funnel.

use anyhow::Result;
use tracing::{debug, info, trace, warn};

use crate::analysis::{AnalysisContext, AnalysisReport, FEWER_THAN_TWO_STUDIES, preamble};
use crate::chart::trim_fill_plot;
use crate::data::{DataSource, ExtractSpec, extract};
use crate::output::{heading, included_line, mean_effects_table, pooled_variance_line};
use crate::stats::{
    WeightedSummary, mean_of, pooled_var_no_structure, random_weights, reciprocal,
    weighted_mean_var_q, weighted_median,
};
use crate::types::{AnalysisValues, MeanEffect, TrimFillEstimator, TrimFillValues};

pub const MAX_ITERATIONS: usize = 1000;

/// Result of the trimming loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimEstimate {
    pub missing: usize,
    pub skew_right: bool,
    /// Mean of the trimmed data at the last iteration.
    pub center: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// `(effect, variance)` pairs sorted descending by effect when the excess
/// is on the right, ascending otherwise.
fn sorted_by_skew(data: &[(f64, f64)], skew_right: bool) -> Vec<(f64, f64)> {
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| {
        let ord = a.0.total_cmp(&b.0);
        if skew_right { ord.reverse() } else { ord }
    });
    sorted
}

fn trimmed_mean(kept: &[(f64, f64)], random_effects: bool) -> Result<f64> {
    let effects: Vec<f64> = kept.iter().map(|(e, _)| *e).collect();
    let variances: Vec<f64> = kept.iter().map(|(_, v)| *v).collect();
    let fixed = weighted_mean_var_q(&effects, &reciprocal(&variances))?;
    if !random_effects {
        return Ok(fixed.mean);
    }
    let df = kept.len() as f64 - 1.0;
    let pooled = pooled_var_no_structure(fixed.q, fixed.sum_w, fixed.sum_w2, df);
    Ok(weighted_mean_var_q(&effects, &random_weights(&variances, pooled))?.mean)
}

/// Signed ranks of `values - center` by absolute deviation, 1-based; ties
/// in absolute deviation take consecutive ranks in input order.
pub fn signed_ranks(values: &[f64], center: f64) -> Vec<f64> {
    let diff: Vec<f64> = values.iter().map(|v| v - center).collect();
    let mut order: Vec<usize> = (0..diff.len()).collect();
    order.sort_by(|&a, &b| diff[a].abs().total_cmp(&diff[b].abs()));
    let mut ranks = vec![0.0; diff.len()];
    for (rank, &i) in order.iter().enumerate() {
        let sign = if diff[i] > 0.0 {
            1.0
        } else if diff[i] < 0.0 {
            -1.0
        } else {
            0.0
        };
        ranks[i] = (rank as f64 + 1.0) * sign;
    }
    ranks
}

/// Missing-study count implied by the signed ranks, floored and clamped at
/// zero, with the skew direction it detected.
pub fn estimate_k(ranks: &[f64], estimator: TrimFillEstimator) -> (usize, bool) {
    let n = ranks.len() as f64;
    let t_pos: f64 = ranks.iter().filter(|r| **r > 0.0).sum();
    let t_neg: f64 = ranks.iter().filter(|r| **r < 0.0).map(|r| r.abs()).sum();
    let min = ranks.iter().copied().fold(f64::INFINITY, f64::min);
    let max = ranks.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let (gamma, t_n, skew_right) = if t_pos > t_neg {
        (n - min.abs(), t_pos, true)
    } else {
        (n - max.abs(), t_neg, false)
    };
    let k = match estimator {
        TrimFillEstimator::R0 => gamma - 1.0,
        TrimFillEstimator::L0 => (4.0 * t_n - n * (n + 1.0)) / (2.0 * n - 1.0),
        TrimFillEstimator::Q0 => n - 0.5 - (2.0 * n * n - 4.0 * t_n + 0.25).sqrt(),
    };
    let k = k.floor();
    (if k.is_finite() && k > 0.0 { k as usize } else { 0 }, skew_right)
}

/// Iterate trim, re-center, re-rank and re-estimate until the missing
/// count stops changing or the iteration cap is reached.
pub fn estimate_missing(
    data: &[(f64, f64)],
    random_effects: bool,
    estimator: TrimFillEstimator,
) -> Result<TrimEstimate> {
    let n = data.len();
    let mut skew_right = true;
    let mut trim: Option<usize> = None;
    let mut new_trim = 0usize;
    let mut center = 0.0;
    let mut iterations = 0;
    while trim != Some(new_trim) && iterations < MAX_ITERATIONS {
        iterations += 1;
        let current = new_trim.min(n.saturating_sub(1));
        trim = Some(current);
        let sorted = sorted_by_skew(data, skew_right);
        center = trimmed_mean(&sorted[current..], random_effects)?;
        let effects: Vec<f64> = sorted.iter().map(|(e, _)| *e).collect();
        let (k, right) = estimate_k(&signed_ranks(&effects, center), estimator);
        if !right {
            skew_right = false;
        }
        new_trim = k;
        trace!("trim and fill iteration {iterations}: trimmed={current}, center={center}, k={k}");
    }
    let missing = trim.unwrap_or(0);
    let converged = trim == Some(new_trim);
    if !converged {
        warn!("trim and fill did not converge after {MAX_ITERATIONS} iterations; using the last estimate");
    }
    Ok(TrimEstimate {
        missing,
        skew_right,
        center,
        iterations,
        converged,
    })
}

pub fn trim_and_fill(
    data: &dyn DataSource,
    ctx: &AnalysisContext<'_>,
    estimator: TrimFillEstimator,
) -> Result<AnalysisReport> {
    let options = ctx.options;
    let extracted = extract(
        data,
        options.effect.index,
        options.variance.index,
        &ExtractSpec::default(),
    )?;
    let mut output = preamble(&extracted);
    let n = extracted.len();
    if n < 2 {
        return Ok(AnalysisReport::insufficient(output, FEWER_THAN_TWO_STUDIES));
    }
    info!("{n} studies will be included in this analysis");
    output.push(included_line(n));

    let effects = extracted.effects();
    let variances = extracted.variances();
    let mean_v = mean_of(&variances);
    let (summary, median, pooled_var) = pooled_summary(&effects, &variances, options.random_effects)?;
    if options.random_effects {
        output.push(pooled_variance_line(pooled_var, ctx.decimals()));
    }
    let (lower_ci, upper_ci) = ctx.interval(summary.mean, summary.variance, n as f64 - 1.0);
    let original = MeanEffect {
        name: "Original Mean".to_string(),
        n,
        mean: summary.mean,
        median: Some(median),
        variance: summary.variance,
        avg_var: mean_v,
        lower_ci,
        upper_ci,
        bootstrap: None,
    };

    let pairs: Vec<(f64, f64)> = effects.iter().copied().zip(variances.iter().copied()).collect();
    let estimate = estimate_missing(&pairs, options.random_effects, estimator)?;
    debug!(
        "trim and fill: {} missing studies after {} iterations (right skew: {})",
        estimate.missing, estimate.iterations, estimate.skew_right
    );

    let mut filled = sorted_by_skew(&pairs, estimate.skew_right);
    let inferred: Vec<(f64, f64)> = filled
        .iter()
        .take(estimate.missing)
        .map(|(e, v)| (2.0 * estimate.center - e, *v))
        .collect();
    filled.extend(inferred.iter().copied());
    let total = filled.len();
    let all_e: Vec<f64> = filled.iter().map(|(e, _)| *e).collect();
    let all_v: Vec<f64> = filled.iter().map(|(_, v)| *v).collect();
    let fixed_median = weighted_median(&all_e, &reciprocal(&all_v));
    let (adjusted_summary, _, _) = pooled_summary(&all_e, &all_v, options.random_effects)?;
    let (lower_ci, upper_ci) = ctx.interval(
        adjusted_summary.mean,
        adjusted_summary.variance,
        total as f64 - 1.0,
    );
    let adjusted = MeanEffect {
        name: "Trim and Fill Mean".to_string(),
        n: total,
        mean: adjusted_summary.mean,
        median: Some(fixed_median),
        variance: adjusted_summary.variance,
        avg_var: mean_v,
        lower_ci,
        upper_ci,
        bootstrap: None,
    };

    output.push(vec![format!(
        "Trim and Fill Analysis estimated {} missing studies.",
        estimate.missing
    )]);
    output.push(heading("Mean Effect Sizes"));
    output.push(mean_effects_table(
        ctx.effect_label(),
        &[original.clone(), adjusted.clone()],
        ctx.decimals(),
        options.alpha,
        options.log_transformed,
        true,
    ));

    let chart = options.create_chart.then(|| {
        trim_fill_plot(
            ctx.effect_label(),
            &filled,
            n,
            original.mean,
            adjusted.mean,
        )
    });

    Ok(AnalysisReport::ok(
        output,
        chart,
        AnalysisValues::TrimFill(TrimFillValues {
            original,
            adjusted,
            missing: estimate.missing,
            skew_right: estimate.skew_right,
            iterations: estimate.iterations,
            converged: estimate.converged,
            inferred,
        }),
        Vec::new(),
    ))
}

/// Mean, median and pooled variance with the weights the model calls for.
fn pooled_summary(
    effects: &[f64],
    variances: &[f64],
    random_effects: bool,
) -> Result<(WeightedSummary, f64, f64)> {
    let w = reciprocal(variances);
    let fixed = weighted_mean_var_q(effects, &w)?;
    let df = effects.len() as f64 - 1.0;
    let pooled = pooled_var_no_structure(fixed.q, fixed.sum_w, fixed.sum_w2, df);
    if !random_effects {
        let median = weighted_median(effects, &w);
        return Ok((fixed, median, pooled));
    }
    let ws = random_weights(variances, pooled);
    let summary = weighted_mean_var_q(effects, &ws)?;
    let median = weighted_median(effects, &ws);
    Ok((summary, median, pooled))
}
