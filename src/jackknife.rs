use anyhow::Result;
use tracing::{debug, info};

use crate::analysis::{AnalysisContext, AnalysisReport, FEWER_THAN_TWO_STUDIES, preamble};
use crate::chart::{ForestKind, forest_plot};
use crate::data::{DataSource, ExtractSpec, extract};
use crate::output::{
    global_output, heading, heterogeneity_table, included_line, mean_effects_table,
    pooled_variance_line,
};
use crate::simple::simple_fit;
use crate::types::{AnalysisValues, HeterogeneityTest, JackknifeValues, MeanEffect};

/// Whole-sample mean plus the mean with each study left out in turn.
pub fn jackknife(data: &dyn DataSource, ctx: &AnalysisContext<'_>) -> Result<AnalysisReport> {
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
    let global = simple_fit(ctx, &effects, &variances, "")?.global;
    if options.random_effects {
        output.push(pooled_variance_line(global.pooled_var, ctx.decimals()));
    }

    let mut means: Vec<MeanEffect> = Vec::with_capacity(n);
    let mut heterogeneity: Vec<HeterogeneityTest> = Vec::with_capacity(n);
    for (j, left_out) in extracted.observations.iter().enumerate() {
        let label = format!("w/o {}", left_out.label);
        let keep = |values: &[f64]| -> Vec<f64> {
            values
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != j)
                .map(|(_, v)| *v)
                .collect()
        };
        let fit = simple_fit(ctx, &keep(&effects), &keep(&variances), &label)?;
        debug!("jackknife {label}: mean={}", fit.global.mean.mean);
        let mut total = fit.global.total;
        total.source = format!("{label} Qtotal");
        heterogeneity.push(total);
        means.push(fit.global.mean);
    }

    let dp = ctx.decimals();
    output.push(heading("Jackknife Results"));
    output.push(heading("Heterogeneity"));
    output.push(heterogeneity_table(&heterogeneity, dp, false, None));
    output.push(heading("Mean Effect Sizes"));
    output.push(mean_effects_table(
        ctx.effect_label(),
        &means,
        dp,
        options.alpha,
        options.log_transformed,
        true,
    ));
    output.push(heading("Global Results"));
    let citations = global_output(&mut output, &global, &ctx.global_output(true));

    let chart = options.create_chart.then(|| {
        let mut rows = vec![MeanEffect {
            name: "Mean".to_string(),
            ..global.mean.clone()
        }];
        rows.extend(means.iter().cloned());
        forest_plot(
            ForestKind::Jackknife,
            ctx.effect_label(),
            &rows,
            options.alpha,
            options.bootstrap_iterations,
        )
    });

    Ok(AnalysisReport::ok(
        output,
        chart,
        AnalysisValues::Jackknife(JackknifeValues {
            global,
            means,
            heterogeneity,
        }),
        citations,
    ))
}
