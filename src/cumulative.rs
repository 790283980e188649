use anyhow::Result;
use tracing::{debug, info};

use crate::analysis::{AnalysisContext, AnalysisReport, FEWER_THAN_TWO_STUDIES, preamble};
use crate::chart::{ForestKind, forest_plot};
use crate::data::{DataSource, ExtractSpec, Observation, extract};
use crate::output::{heading, heterogeneity_table, included_line, mean_effects_table};
use crate::simple::simple_fit;
use crate::types::{AnalysisValues, Column, CumulativeValues, HeterogeneityTest, MeanEffect};

/// Order by the sort column, breaking ties by effect then variance.
fn sort_observations(observations: &mut [Observation]) {
    observations.sort_by(|a, b| {
        let key = match (&a.order, &b.order) {
            (Some(ka), Some(kb)) => ka.compare(kb),
            _ => std::cmp::Ordering::Equal,
        };
        key.then(a.effect.total_cmp(&b.effect))
            .then(a.variance.total_cmp(&b.variance))
    });
}

/// Means of the first 2, 3, ..., n studies in the order of `order`.
pub fn cumulative(
    data: &dyn DataSource,
    ctx: &AnalysisContext<'_>,
    order: &Column,
) -> Result<AnalysisReport> {
    let options = ctx.options;
    let mut extracted = extract(
        data,
        options.effect.index,
        options.variance.index,
        &ExtractSpec {
            order: Some(order.index),
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

    sort_observations(&mut extracted.observations);
    let effects = extracted.effects();
    let variances = extracted.variances();

    let mut means: Vec<MeanEffect> = Vec::with_capacity(n - 1);
    let mut heterogeneity: Vec<HeterogeneityTest> = Vec::with_capacity(n - 1);
    for ns in 2..=n {
        let label = format!("{ns} studies");
        let fit = simple_fit(ctx, &effects[..ns], &variances[..ns], &label)?;
        debug!("cumulative {label}: mean={}", fit.global.mean.mean);
        let mut total = fit.global.total;
        total.source = format!("{label} Qtotal");
        heterogeneity.push(total);
        means.push(MeanEffect {
            median: Some(fit.fixed_median),
            ..fit.global.mean
        });
    }

    let dp = ctx.decimals();
    output.push(heading("Cumulative Results"));
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

    let chart = options.create_chart.then(|| {
        forest_plot(
            ForestKind::Cumulative {
                order_label: order.label.clone(),
            },
            ctx.effect_label(),
            &means,
            options.alpha,
            options.bootstrap_iterations,
        )
    });

    Ok(AnalysisReport::ok(
        output,
        chart,
        AnalysisValues::Cumulative(CumulativeValues {
            means,
            heterogeneity,
        }),
        Vec::new(),
    ))
}
