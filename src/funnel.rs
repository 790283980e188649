use anyhow::Result;
use tracing::info;

use crate::analysis::{AnalysisContext, AnalysisReport, FEWER_THAN_TWO_STUDIES, preamble};
use crate::chart::{FunnelOverlays, funnel_plot};
use crate::data::{DataSource, ExtractSpec, Observation, extract};
use crate::output::included_line;
use crate::stats::{reciprocal, weighted_mean};
use crate::types::{AnalysisValues, Column, FunnelAxis, FunnelValues};

/// Vertical position of a study on the funnel.
pub fn funnel_y(obs: &Observation, axis: FunnelAxis) -> f64 {
    match axis {
        FunnelAxis::Variance => obs.variance,
        FunnelAxis::InverseVariance => 1.0 / obs.variance,
        FunnelAxis::StandardError => obs.variance.sqrt(),
        FunnelAxis::Precision => 1.0 / obs.variance.sqrt(),
        FunnelAxis::SampleSize => obs.sample_size.unwrap_or(f64::NAN),
    }
}

/// Funnel plot data. The chart is always built, since it is the whole
/// result of this analysis.
pub fn funnel(
    data: &dyn DataSource,
    ctx: &AnalysisContext<'_>,
    axis: FunnelAxis,
    sample_size: Option<&Column>,
    overlays: FunnelOverlays,
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
    let mean = weighted_mean(&effects, &reciprocal(&extracted.variances()));
    let y: Vec<f64> = extracted
        .observations
        .iter()
        .map(|obs| funnel_y(obs, axis))
        .collect();
    let chart = funnel_plot(
        ctx.effect_label(),
        &effects,
        &y,
        mean,
        axis,
        options.alpha,
        overlays,
    );

    Ok(AnalysisReport::ok(
        output,
        Some(chart),
        AnalysisValues::Funnel(FunnelValues {
            n,
            mean,
            axis,
            effects,
            y,
        }),
        vec!["Light_Pillemer_1984", "Sterne_Egger_2001"],
    ))
}
