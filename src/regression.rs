use anyhow::Result;
use tracing::{debug, info};

use crate::analysis::{
    AnalysisContext, AnalysisReport, FEWER_THAN_TWO_STUDIES, preamble, q_test,
};
use crate::chart::{RegressionLine, regression_plot};
use crate::data::{DataSource, ExtractSpec, extract};
use crate::output::{
    global_output, heading, heterogeneity_table, included_line, pooled_variance_line,
    predictor_table,
};
use crate::stats::{
    RegressionSums, mean_of, pooled_var_regression_structure, prob_z_score, random_weights,
    reciprocal, weighted_mean_var_q, weighted_median,
};
use crate::types::{
    AnalysisValues, Column, GlobalValues, MeanEffect, PredictorTest, RegressionValues,
};

/// Weighted least-squares fit of effect on one predictor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionFit {
    pub slope: f64,
    pub intercept: f64,
    pub var_slope: f64,
    pub var_intercept: f64,
    pub qm: f64,
    pub qe: f64,
    pub sums: RegressionSums,
}

/// `qt` is the total heterogeneity under the same weights; the model Q is
/// `slope² / var(slope)` and the error Q the remainder.
pub fn regression_fit(effects: &[f64], weights: &[f64], x: &[f64], qt: f64) -> RegressionFit {
    let mut sum_w = 0.0;
    let mut sum_we = 0.0;
    let mut sum_wx = 0.0;
    let mut sum_wx2 = 0.0;
    let mut sum_wxe = 0.0;
    for ((e, w), xi) in effects.iter().zip(weights).zip(x) {
        sum_w += w;
        sum_we += w * e;
        sum_wx += w * xi;
        sum_wx2 += w * xi * xi;
        sum_wxe += w * xi * e;
    }
    let sxx = sum_wx2 - sum_wx.powi(2) / sum_w;
    let slope = (sum_wxe - sum_wx * sum_we / sum_w) / sxx;
    let intercept = (sum_we - slope * sum_wx) / sum_w;
    let var_slope = 1.0 / sxx;
    let var_intercept = 1.0 / (sum_w - sum_wx.powi(2) / sum_wx2);
    let qm = slope.powi(2) / var_slope;
    RegressionFit {
        slope,
        intercept,
        var_slope,
        var_intercept,
        qm,
        qe: qt - qm,
        sums: RegressionSums {
            sum_w,
            sum_wx,
            sum_wx2,
        },
    }
}

const FIXED_CITATIONS: [&str; 2] = ["Hedges_Olkin_1985", "Greenland_1987"];
const RANDOM_CITATIONS: [&str; 3] = ["Hedges_Olkin_1985", "Greenland_1987", "Rosenberg_et_2000"];

pub fn regression(
    data: &dyn DataSource,
    ctx: &AnalysisContext<'_>,
    predictor: &Column,
) -> Result<AnalysisReport> {
    let options = ctx.options;
    let extracted = extract(
        data,
        options.effect.index,
        options.variance.index,
        &ExtractSpec {
            numbers: vec![predictor.index],
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
    let x: Vec<f64> = extracted
        .observations
        .iter()
        .map(|o| o.covariates[0])
        .collect();
    let w = reciprocal(&variances);
    let fixed = weighted_mean_var_q(&effects, &w)?;
    let fixed_fit = regression_fit(&effects, &w, &x, fixed.q);
    let pooled_var = pooled_var_regression_structure(fixed_fit.qe, fixed_fit.sums, &x, &w);

    let (ws, summary, fit) = if options.random_effects {
        output.push(pooled_variance_line(pooled_var, ctx.decimals()));
        let ws = random_weights(&variances, pooled_var);
        let summary = weighted_mean_var_q(&effects, &ws)?;
        let fit = regression_fit(&effects, &ws, &x, summary.q);
        (ws, summary, fit)
    } else {
        (w, fixed, fixed_fit)
    };
    debug!(
        "regression: slope={}, intercept={}, qm={}, qe={}",
        fit.slope, fit.intercept, fit.qm, fit.qe
    );

    let (lower_ci, upper_ci) = ctx.interval(summary.mean, summary.variance, n as f64 - 1.0);
    let bootstrap = ctx.bootstrap(&effects, &variances, summary.mean, pooled_var)?;
    let global = GlobalValues {
        mean: MeanEffect {
            name: "Global".to_string(),
            n,
            mean: summary.mean,
            median: Some(weighted_median(&effects, &ws)),
            variance: summary.variance,
            avg_var: mean_of(&variances),
            lower_ci,
            upper_ci,
            bootstrap,
        },
        pooled_var,
        total: q_test("Total", summary.q, n as i64 - 1),
        i2: ctx.i2(summary.q, n),
    };

    let mut model = q_test("Model", fit.qm, 1);
    if let Some(iterations) = options.randomization_iterations {
        model.p_randomization = Some(ctx.resampler.permutation_test(
            iterations,
            &effects,
            fit.qm,
            |permuted| regression_fit(permuted, &ws, &x, summary.q).qm,
        )?);
    }
    let error = q_test("Error", fit.qe, n as i64 - 2);

    let se_intercept = fit.var_intercept.sqrt();
    let se_slope = fit.var_slope.sqrt();
    let predictors = vec![
        PredictorTest {
            predictor: "Intercept".to_string(),
            value: fit.intercept,
            se: se_intercept,
            p_norm: prob_z_score(fit.intercept / se_intercept),
        },
        PredictorTest {
            predictor: "Slope".to_string(),
            value: fit.slope,
            se: se_slope,
            p_norm: prob_z_score(fit.slope / se_slope),
        },
    ];

    let dp = ctx.decimals();
    output.push(heading("Regression Results"));
    output.push(heading("Predictors"));
    output.push(predictor_table(&predictors, dp, options.alpha));
    output.push(heading("Heterogeneity"));
    output.push(heterogeneity_table(
        &[model.clone(), error.clone(), global.total.clone()],
        dp,
        true,
        options.randomization_iterations,
    ));
    output.push(heading("Global Results"));
    let citations = global_output(&mut output, &global, &ctx.global_output(true));

    let chart = options.create_chart.then(|| {
        let fig_citations: &[&str] = if options.random_effects {
            &RANDOM_CITATIONS
        } else {
            &FIXED_CITATIONS
        };
        regression_plot(
            &RegressionLine {
                x_label: &predictor.label,
                y_label: ctx.effect_label(),
                slope: fit.slope,
                intercept: fit.intercept,
                random_effects: options.random_effects,
                citations: fig_citations,
            },
            &x,
            &effects,
        )
    });

    Ok(AnalysisReport::ok(
        output,
        chart,
        AnalysisValues::Regression(RegressionValues {
            global,
            model,
            error,
            predictors,
        }),
        citations,
    ))
}
