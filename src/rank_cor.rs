//! Begg-style rank correlation between standardized effects and study
//! size (or variance).

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{debug, info};

use crate::analysis::{AnalysisContext, AnalysisReport, FEWER_THAN_TWO_STUDIES, preamble};
use crate::data::{DataSource, ExtractSpec, extract};
use crate::output::{fmt_float, heading, included_line, randomization_decimals};
use crate::stats::{
    average_ranks, pooled_var_no_structure, random_weights, reciprocal, weighted_mean_var_q,
};
use crate::types::{AnalysisValues, Column, RankCorrelationMethod, RankCorrelationValues};

/// Pearson correlation.
pub fn correlation(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    let x_mean = x.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;
    let mut sum_xy = 0.0;
    let mut sum_x2 = 0.0;
    let mut sum_y2 = 0.0;
    for (a, b) in x.iter().zip(y) {
        sum_xy += (a - x_mean) * (b - y_mean);
        sum_x2 += (a - x_mean).powi(2);
        sum_y2 += (b - y_mean).powi(2);
    }
    sum_xy / (sum_x2 * sum_y2).sqrt()
}

fn tie_term(ranks: &[f64]) -> f64 {
    let mut counts: BTreeMap<u64, usize> = BTreeMap::new();
    for r in ranks {
        *counts.entry(r.to_bits()).or_default() += 1;
    }
    counts
        .values()
        .filter(|c| **c > 1)
        .map(|&c| (c * (c - 1)) as f64)
        .sum()
}

fn has_ties(ranks: &[f64]) -> bool {
    let mut sorted = ranks.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.windows(2).any(|w| w[0] == w[1])
}

/// Kendall's τ with tie corrections. Pairs are ordered by the effect ranks,
/// or by the covariate ranks when the effect ranks contain ties; a later
/// pair member scores 1 when larger on the other ranking and ½ when tied.
pub fn kendalls_tau(e_ranks: &[f64], x_ranks: &[f64]) -> f64 {
    let n = e_ranks.len();
    let (key, other) = if has_ties(e_ranks) {
        (x_ranks, e_ranks)
    } else {
        (e_ranks, x_ranks)
    };
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| key[a].total_cmp(&key[b]));
    let sorted: Vec<f64> = order.iter().map(|&i| other[i]).collect();

    let mut c = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            if sorted[j] > sorted[i] {
                c += 1.0;
            } else if sorted[j] == sorted[i] {
                c += 0.5;
            }
        }
    }
    let pairs = (n * (n - 1)) as f64;
    let sum_n = 4.0 * c - pairs;
    let t1 = tie_term(e_ranks);
    let t2 = tie_term(x_ranks);
    sum_n / ((pairs - t1) * (pairs - t2)).sqrt()
}

fn rank_statistic(method: RankCorrelationMethod, e_ranks: &[f64], x_ranks: &[f64]) -> f64 {
    match method {
        RankCorrelationMethod::KendallTau => kendalls_tau(e_ranks, x_ranks),
        RankCorrelationMethod::SpearmanRho => correlation(e_ranks, x_ranks),
    }
}

pub fn rank_correlation(
    data: &dyn DataSource,
    ctx: &AnalysisContext<'_>,
    method: RankCorrelationMethod,
    sample_size: Option<&Column>,
) -> Result<AnalysisReport> {
    let options = ctx.options;
    let extracted = extract(
        data,
        options.effect.index,
        options.variance.index,
        &ExtractSpec {
            sample_size: sample_size.map(|c| c.index),
            ..ExtractSpec::default()
        },
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
    let fixed = weighted_mean_var_q(&effects, &reciprocal(&variances))?;
    let mean = if options.random_effects {
        let pooled = pooled_var_no_structure(fixed.q, fixed.sum_w, fixed.sum_w2, n as f64 - 1.0);
        weighted_mean_var_q(&effects, &random_weights(&variances, pooled))?.mean
    } else {
        fixed.mean
    };

    let v_star: Vec<f64> = variances.iter().map(|v| v - 1.0 / fixed.sum_w).collect();
    let e_star: Vec<f64> = effects
        .iter()
        .zip(&v_star)
        .map(|(e, v)| (e - mean) / v.sqrt())
        .collect();
    let x_star: Vec<f64> = if sample_size.is_some() {
        extracted
            .observations
            .iter()
            .map(|o| o.sample_size.unwrap_or(f64::NAN))
            .collect()
    } else {
        v_star
    };
    let e_ranks = average_ranks(&e_star);
    let x_ranks = average_ranks(&x_star);
    let r = rank_statistic(method, &e_ranks, &x_ranks);
    debug!("rank correlation ({method:?}): r={r}");

    let p_randomization = match options.randomization_iterations {
        Some(iterations) => Some(ctx.resampler.permutation_test(
            iterations,
            &e_ranks,
            r.abs(),
            |permuted| rank_statistic(method, permuted, &x_ranks).abs(),
        )?),
        None => None,
    };

    let dp = ctx.decimals();
    output.push(heading("Rank Correlation Results"));
    let mut block = vec![match method {
        RankCorrelationMethod::KendallTau => format!("Kendall's τ = {}", fmt_float(r, dp)),
        RankCorrelationMethod::SpearmanRho => format!("Spearman's ρ = {}", fmt_float(r, dp)),
    }];
    if let (Some(p), Some(iterations)) = (p_randomization, options.randomization_iterations) {
        block.push(format!(
            "Probability = {}",
            fmt_float(p, randomization_decimals(dp, iterations))
        ));
    }
    output.push(block);

    Ok(AnalysisReport::ok(
        output,
        None,
        AnalysisValues::RankCorrelation(RankCorrelationValues {
            method,
            n,
            correlation: r,
            p_randomization,
        }),
        vec!["Sokal_Rohlf_1995"],
    ))
}
