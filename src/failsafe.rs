//! Fail-safe numbers: how many unpublished null studies it would take to
//! make a significant mean effect non-significant.

use anyhow::Result;
use tracing::{debug, trace, warn};

use crate::output::{Block, citation_line, fmt_float, heading};
use crate::stats::{
    norm_ppf, pooled_var_no_structure, random_weights, reciprocal, round_half_even, t_ppf,
    weighted_mean_var_q,
};
use crate::types::{
    FailsafeOptions, FailsafeValues, RosenbergFixed, RosenbergRandom, RosenbergResult,
};

const MAX_ITERATIONS: usize = 1000;

const ROSENBERG: &str = "Rosenberg_2005";
const ROSENTHAL: &str = "Rosenthal_1979";
const ORWIN: &str = "Orwin_1983";

const ONE_STUDY_LINE: &str = "Fail-safe n (t distribution, 1 study of n × avg weight) = ";
const N_STUDIES_LINE: &str = "Fail-safe n (t distribution, n studies of avg weight) = ";
const POOLED_ERROR: &str =
    "Estimate of pooled variance was less than zero. This fail-safe number cannot be calculated.";
const POOLED_RANDOM_ERROR: &str = "Estimate of pooled variance is less than zero. No random effects fail-safe number can be calculated.";

/// Report blocks, values and citation keys for the requested fail-safe numbers.
#[derive(Debug, Clone, Default)]
pub struct FailsafeReport {
    pub blocks: Vec<Block>,
    pub values: FailsafeValues,
    pub citations: Vec<&'static str>,
}

/// Inputs shared by the fail-safe calculations of a simple analysis.
#[derive(Debug, Clone, Copy)]
pub struct FailsafeInputs<'a> {
    pub effects: &'a [f64],
    pub variances: &'a [f64],
    pub mean: f64,
    pub pooled_var: f64,
    pub sum_w: f64,
    pub sum_ew: f64,
    pub random_effects: bool,
}

pub fn failsafe_numbers(
    options: &FailsafeOptions,
    inputs: &FailsafeInputs<'_>,
    decimals: usize,
) -> Result<FailsafeReport> {
    let mut report = FailsafeReport::default();
    let n = inputs.effects.len();

    if let Some(alpha) = options.rosenberg {
        let result = if inputs.random_effects {
            RosenbergResult::Random(rosenberg_random(inputs.effects, inputs.variances, alpha)?)
        } else {
            RosenbergResult::Fixed(rosenberg_fixed(n, inputs.sum_ew, inputs.sum_w, alpha))
        };
        report
            .blocks
            .extend(rosenberg_blocks(&result, alpha, decimals));
        report.values.rosenberg = Some(result);
        report.citations.push(ROSENBERG);
    }

    if let Some(alpha) = options.rosenthal {
        let variances: Vec<f64> = if inputs.random_effects {
            inputs
                .variances
                .iter()
                .map(|v| v + inputs.pooled_var)
                .collect()
        } else {
            inputs.variances.to_vec()
        };
        let k = rosenthal(inputs.effects, &variances, alpha);
        report.blocks.push(heading("Rosenthal's Fail-safe Number"));
        report.blocks.push(vec![
            citation_line(&[ROSENTHAL]),
            format!("→ alpha: {}", fmt_float(alpha, decimals)),
        ]);
        report
            .blocks
            .push(vec![format!("Fail-safe n = {}", fmt_float(k, decimals))]);
        report.values.rosenthal = Some(k);
        report.citations.push(ROSENTHAL);
    }

    if let Some(minimal) = options.orwin {
        let k = orwin(n, inputs.mean, minimal);
        report.blocks.push(heading("Orwin's Fail-safe Number"));
        report.blocks.push(vec![
            citation_line(&[ORWIN]),
            format!("→ Minimal Effect Size: {}", fmt_float(minimal, decimals)),
        ]);
        report
            .blocks
            .push(vec![format!("Fail-safe n = {}", fmt_float(k, decimals))]);
        report.values.orwin = Some(k);
        report.citations.push(ORWIN);
    }
    Ok(report)
}

fn rosenberg_blocks(result: &RosenbergResult, alpha: f64, decimals: usize) -> Vec<Block> {
    let estimate = |k: Option<f64>| match k {
        Some(k) => fmt_float(k, decimals),
        None => POOLED_ERROR.to_string(),
    };
    let lines = match result {
        RosenbergResult::Fixed(fixed) => vec![
            format!(
                "Fail-safe n (normal distribution) = {}",
                fmt_float(fixed.k_normal, decimals)
            ),
            format!("{ONE_STUDY_LINE}{}", fmt_float(fixed.k_one_study, decimals)),
            format!("{N_STUDIES_LINE}{}", fmt_float(fixed.k_n_studies, decimals)),
        ],
        RosenbergResult::Random(RosenbergRandom::NonPositivePooledVariance) => {
            vec![POOLED_RANDOM_ERROR.to_string()]
        }
        RosenbergResult::Random(RosenbergRandom::Estimated {
            k_one_study,
            k_n_studies,
            ..
        }) => vec![
            format!("{ONE_STUDY_LINE}{}", estimate(*k_one_study)),
            format!("{N_STUDIES_LINE}{}", estimate(*k_n_studies)),
        ],
    };
    vec![
        heading("Rosenberg's Fail-safe Number"),
        vec![
            citation_line(&[ROSENBERG]),
            format!("→ alpha: {}", fmt_float(alpha, decimals)),
        ],
        lines,
    ]
}

/// Rosenberg's weighted fail-safe numbers under fixed effects: a normal
/// closed form, one added study of aggregate weight, and `k` added
/// studies of average weight found by fixed-point iteration.
pub fn rosenberg_fixed(n: usize, sum_ew: f64, sum_w: f64, alpha: f64) -> RosenbergFixed {
    let nf = n as f64;
    let solve = |quantile: f64| (nf / sum_w) * (sum_ew.powi(2) / quantile.powi(2) - sum_w);

    let k_normal = solve(norm_ppf(alpha / 2.0)).max(0.0);
    let k_one_study = solve(t_ppf(alpha / 2.0, nf)).max(0.0);

    let mut k_star = 1.0;
    let mut df = nf - 1.0;
    let mut iterations = 0;
    let mut settled = round_half_even(k_star) == round_half_even(df + 1.0 - nf);
    while iterations < MAX_ITERATIONS && !settled {
        df = nf + k_star - 1.0;
        if df <= 0.0 {
            break;
        }
        k_star = solve(t_ppf(alpha / 2.0, df));
        iterations += 1;
        settled = round_half_even(k_star) == round_half_even(df + 1.0 - nf);
        trace!("rosenberg fixed: iteration {iterations}, df={df}, k={k_star}");
    }
    let converged = settled;
    if !converged {
        warn!("Rosenberg fail-safe number did not converge in {MAX_ITERATIONS} iterations");
    }
    RosenbergFixed {
        k_normal,
        k_one_study,
        k_n_studies: k_star.max(0.0),
        converged,
    }
}

struct RandomSums {
    sum_erw: f64,
    sum_rw: f64,
}

fn random_sums(effects: &[f64], variances: &[f64], pooled_var: f64) -> RandomSums {
    let rw = random_weights(variances, pooled_var);
    RandomSums {
        sum_erw: effects.iter().zip(&rw).map(|(e, w)| e * w).sum(),
        sum_rw: rw.iter().sum(),
    }
}

fn fixed_q(effects: &[f64], weights: &[f64], mean: f64) -> f64 {
    effects
        .iter()
        .zip(weights)
        .map(|(e, w)| w * (e - mean).powi(2))
        .sum()
}

/// Rosenberg's fail-safe numbers under random effects. Each added study
/// changes the pooled variance, so both estimates re-solve it until the
/// rounded number of studies stops changing.
pub fn rosenberg_random(effects: &[f64], variances: &[f64], alpha: f64) -> Result<RosenbergRandom> {
    let n = effects.len();
    let nf = n as f64;
    let weights = reciprocal(variances);
    let summary = weighted_mean_var_q(effects, &weights)?;
    let (sum_w, sum_w2, sum_ew) = (summary.sum_w, summary.sum_w2, summary.sum_ew);
    let pooled_var = pooled_var_no_structure(summary.q, sum_w, sum_w2, nf - 1.0);
    debug!("rosenberg random: initial pooled variance {pooled_var}");
    if pooled_var <= 0.0 {
        return Ok(RosenbergRandom::NonPositivePooledVariance);
    }

    // one added study of weight k
    let t_score = t_ppf(alpha / 2.0, nf);
    let sums = random_sums(effects, variances, pooled_var);
    let mut sum_rw = sums.sum_rw;
    let mut k = (sums.sum_erw.powi(2) / t_score.powi(2) - sum_rw).max(0.0);
    let mut pooled_new = 0.0;
    let mut iterations = 0;
    let mut settled = false;
    while iterations < MAX_ITERATIONS && !settled {
        iterations += 1;
        let r_mean = sum_ew / (sum_w + k);
        let qtr = fixed_q(effects, &weights, r_mean) + k * r_mean.powi(2);
        pooled_new = (qtr - nf) / (sum_w + k - (sum_w2 + k.powi(2)) / (sum_w + k));
        if pooled_new > 0.0 {
            let sums = random_sums(effects, variances, pooled_new);
            sum_rw = sums.sum_rw;
            let tmp_k = sums.sum_erw.powi(2) / t_score.powi(2) - sum_rw;
            if round_half_even(k) == round_half_even(tmp_k) {
                settled = true;
            } else {
                k = tmp_k;
            }
        } else {
            settled = true;
        }
        trace!("rosenberg random (one study): iteration {iterations}, pooled={pooled_new}, k={k}");
    }
    let one_study_converged = settled;
    let k_one_study = (pooled_new > 0.0).then(|| (k * nf / sum_w).max(0.0));

    // k added studies of average weight; the starting point pairs the
    // initial weighted effect sum with the last weight sum from above
    let sum_erw = random_sums(effects, variances, pooled_var).sum_erw;
    let mut t_score = t_ppf(alpha / 2.0, nf);
    let mut k = (sum_erw.powi(2) / t_score.powi(2) - sum_rw).max(0.0);
    let avg_w = sum_w / nf;
    let mut iterations = 0;
    let mut settled = false;
    while iterations < MAX_ITERATIONS && !settled {
        iterations += 1;
        let r_mean = sum_ew / (sum_w + k);
        let j = round_half_even(k * nf / sum_w);
        let added = j.max(0) as f64;
        let qtr = fixed_q(effects, &weights, r_mean) + added * avg_w * r_mean.powi(2);
        let extra_w2 = added * avg_w.powi(2);
        pooled_new = (qtr - nf - 1.0 + j as f64) / (sum_w + k - (sum_w2 + extra_w2) / (sum_w + k));
        if pooled_new > 0.0 {
            let df = nf - 1.0 + j as f64;
            if df <= 0.0 {
                break;
            }
            let sums = random_sums(effects, variances, pooled_new);
            t_score = t_ppf(alpha / 2.0, df);
            let tmp_k = sums.sum_erw.powi(2) / t_score.powi(2) - sums.sum_rw;
            if j == round_half_even(tmp_k * nf / sum_w) {
                settled = true;
            } else {
                k = tmp_k;
            }
        } else {
            settled = true;
        }
        trace!("rosenberg random (n studies): iteration {iterations}, pooled={pooled_new}, k={k}");
    }
    let k_n_studies = (pooled_new > 0.0).then(|| (k * nf / sum_w).max(0.0));
    let converged = one_study_converged && settled;
    if !converged {
        warn!("Rosenberg random-effects fail-safe number did not converge in {MAX_ITERATIONS} iterations");
    }
    Ok(RosenbergRandom::Estimated {
        k_one_study,
        k_n_studies,
        converged,
    })
}

/// Rosenthal's unweighted fail-safe number from summed z-scores.
pub fn rosenthal(effects: &[f64], variances: &[f64], alpha: f64) -> f64 {
    let sum_z: f64 = effects
        .iter()
        .zip(variances)
        .map(|(e, v)| e / v.sqrt())
        .sum();
    let k = sum_z.powi(2) / norm_ppf(alpha / 2.0).powi(2) - effects.len() as f64;
    k.max(0.0)
}

/// Orwin's fail-safe number for a minimal meaningful effect.
pub fn orwin(n: usize, mean: f64, minimal: f64) -> f64 {
    (n as f64 * (mean - minimal) / minimal).max(0.0)
}
