use anyhow::Result;
use tracing::{debug, info};

use crate::analysis::{
    AnalysisContext, AnalysisReport, FEWER_THAN_TWO_STUDIES, preamble, q_test,
};
use crate::chart::{ForestKind, forest_plot};
use crate::data::{DataSource, ExtractSpec, extract};
use crate::failsafe::{FailsafeInputs, failsafe_numbers};
use crate::output::{global_output, included_line, pooled_variance_line};
use crate::stats::{
    mean_of, normal_interval, pooled_var_no_structure, random_weights, reciprocal,
    weighted_mean_var_q, weighted_median,
};
use crate::types::{AnalysisValues, GlobalValues, MeanEffect, SimpleValues};

/// Whole-sample statistics of an unstructured analysis.
#[derive(Debug, Clone)]
pub(crate) struct SimpleFit {
    pub global: GlobalValues,
    /// Fixed-effects sums, used by the fail-safe numbers.
    pub sum_w: f64,
    pub sum_ew: f64,
    pub fixed_median: f64,
}

/// Mean, heterogeneity and I² of `effects`. Under random effects the
/// pooled variance comes from a single fixed-effects pass.
pub(crate) fn simple_fit(
    ctx: &AnalysisContext<'_>,
    effects: &[f64],
    variances: &[f64],
    name: &str,
) -> Result<SimpleFit> {
    let n = effects.len();
    let df = n as f64 - 1.0;
    let w = reciprocal(variances);
    let fixed = weighted_mean_var_q(effects, &w)?;
    let fixed_median = weighted_median(effects, &w);
    let pooled_var = pooled_var_no_structure(fixed.q, fixed.sum_w, fixed.sum_w2, df);

    let (summary, median) = if ctx.options.random_effects {
        let ws = random_weights(variances, pooled_var);
        (weighted_mean_var_q(effects, &ws)?, weighted_median(effects, &ws))
    } else {
        (fixed, fixed_median)
    };
    debug!(
        "{name}: n={n}, mean={}, q={}, pooled variance={pooled_var}",
        summary.mean, summary.q
    );

    let (lower_ci, upper_ci) = ctx.interval(summary.mean, summary.variance, df);
    let bootstrap = ctx.bootstrap(effects, variances, summary.mean, pooled_var)?;
    let mean = MeanEffect {
        name: name.to_string(),
        n,
        mean: summary.mean,
        median: Some(median),
        variance: summary.variance,
        avg_var: mean_of(variances),
        lower_ci,
        upper_ci,
        bootstrap,
    };
    Ok(SimpleFit {
        global: GlobalValues {
            mean,
            pooled_var,
            total: q_test("Total", summary.q, n as i64 - 1),
            i2: ctx.i2(summary.q, n),
        },
        sum_w: fixed.sum_w,
        sum_ew: fixed.sum_ew,
        fixed_median,
    })
}

pub fn simple(data: &dyn DataSource, ctx: &AnalysisContext<'_>) -> Result<AnalysisReport> {
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
    let fit = simple_fit(ctx, &effects, &variances, "")?;
    if options.random_effects {
        output.push(pooled_variance_line(fit.global.pooled_var, ctx.decimals()));
    }

    let mut citations = global_output(&mut output, &fit.global, &ctx.global_output(true));
    let failsafe = failsafe_numbers(
        &options.failsafe,
        &FailsafeInputs {
            effects: &effects,
            variances: &variances,
            mean: fit.global.mean.mean,
            pooled_var: fit.global.pooled_var,
            sum_w: fit.sum_w,
            sum_ew: fit.sum_ew,
            random_effects: options.random_effects,
        },
        ctx.decimals(),
    )?;
    output.extend(failsafe.blocks);
    citations.extend(failsafe.citations);

    let chart = options.create_chart.then(|| {
        let mut rows = vec![MeanEffect {
            name: "Mean".to_string(),
            ..fit.global.mean.clone()
        }];
        rows.extend(extracted.observations.iter().map(|obs| {
            let (lower_ci, upper_ci) =
                normal_interval(obs.effect, obs.variance.sqrt(), options.alpha);
            MeanEffect {
                name: obs.label.clone(),
                n: 0,
                mean: obs.effect,
                median: None,
                variance: 0.0,
                avg_var: 0.0,
                lower_ci,
                upper_ci,
                bootstrap: None,
            }
        }));
        forest_plot(
            ForestKind::Basic,
            ctx.effect_label(),
            &rows,
            options.alpha,
            options.bootstrap_iterations,
        )
    });

    Ok(AnalysisReport::ok(
        output,
        chart,
        AnalysisValues::Simple(SimpleValues {
            global: fit.global,
            failsafe: failsafe.values,
        }),
        citations,
    ))
}
