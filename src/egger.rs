use anyhow::Result;
use tracing::{debug, info};

use crate::analysis::{AnalysisContext, AnalysisReport, FEWER_THAN_THREE_STUDIES, preamble};
use crate::chart::{RegressionLine, regression_plot};
use crate::data::{DataSource, ExtractSpec, extract};
use crate::output::{Table, ci_header, included_line, interval_to_str};
use crate::stats::{
    pooled_var_no_structure, prob_t_score, random_weights, reciprocal, t_interval,
    weighted_mean_var_q,
};
use crate::types::{AnalysisValues, EggerCoefficient, EggerValues};

/// Ordinary least-squares line with coefficient variances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OlsFit {
    pub slope: f64,
    pub intercept: f64,
    pub var_slope: f64,
    pub var_intercept: f64,
}

/// Least squares of `y` on `x`; the residual variance uses `n - 2` degrees
/// of freedom.
pub fn ols(x: &[f64], y: &[f64]) -> OlsFit {
    let n = x.len() as f64;
    let x_mean = x.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (a, b) in x.iter().zip(y) {
        sxx += (a - x_mean).powi(2);
        sxy += (a - x_mean) * (b - y_mean);
    }
    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    let sse: f64 = x
        .iter()
        .zip(y)
        .map(|(a, b)| (b - intercept - slope * a).powi(2))
        .sum();
    let s2 = sse / (n - 2.0);
    OlsFit {
        slope,
        intercept,
        var_slope: s2 / sxx,
        var_intercept: s2 * (1.0 / n + x_mean.powi(2) / sxx),
    }
}

fn coefficient(value: f64, variance: f64, alpha: f64, df: f64) -> EggerCoefficient {
    let se = variance.sqrt();
    let (lower_ci, upper_ci) = t_interval(value, se, alpha, df);
    EggerCoefficient {
        value,
        se,
        lower_ci,
        upper_ci,
        p_t: prob_t_score(value / se, df),
    }
}

/// Egger's regression of standardized effect on precision. A non-zero
/// intercept indicates funnel asymmetry.
pub fn egger(data: &dyn DataSource, ctx: &AnalysisContext<'_>) -> Result<AnalysisReport> {
    let options = ctx.options;
    let extracted = extract(
        data,
        options.effect.index,
        options.variance.index,
        &ExtractSpec::default(),
    )?;
    let mut output = preamble(&extracted);
    let n = extracted.len();
    if n < 3 {
        return Ok(AnalysisReport::insufficient(output, FEWER_THAN_THREE_STUDIES));
    }
    info!("{n} studies will be included in this analysis");
    output.push(included_line(n));

    let effects = extracted.effects();
    let variances = extracted.variances();
    let w = reciprocal(&variances);
    let mut citations = Vec::new();
    let weights = if options.random_effects {
        let fixed = weighted_mean_var_q(&effects, &w)?;
        let pooled = pooled_var_no_structure(fixed.q, fixed.sum_w, fixed.sum_w2, n as f64 - 1.0);
        citations.push("Lin_Chu_2018");
        random_weights(&variances, pooled)
    } else {
        w
    };
    let x: Vec<f64> = weights.iter().map(|w| w.sqrt()).collect();
    let y: Vec<f64> = effects.iter().zip(&x).map(|(e, xi)| e * xi).collect();
    let fit = ols(&x, &y);
    debug!("egger: intercept={}, slope={}", fit.intercept, fit.slope);

    let df = n - 2;
    let intercept = coefficient(fit.intercept, fit.var_intercept, options.alpha, df as f64);
    let slope = coefficient(fit.slope, fit.var_slope, options.alpha, df as f64);

    let dp = ctx.decimals();
    let mut table = Table::new(
        [
            "Predictor".to_string(),
            "Value".to_string(),
            "SE".to_string(),
            "df".to_string(),
            ci_header(options.alpha),
            "P(t)".to_string(),
        ],
        dp,
    );
    for (name, c) in [("Intercept", &intercept), ("Slope", &slope)] {
        table.push(vec![
            name.into(),
            c.value.into(),
            c.se.into(),
            df.into(),
            interval_to_str(c.lower_ci, c.upper_ci, dp).into(),
            c.p_t.into(),
        ]);
    }
    output.push(table.render());

    let chart = options.create_chart.then(|| {
        regression_plot(
            &RegressionLine {
                x_label: "precision",
                y_label: "standardized effect size",
                slope: fit.slope,
                intercept: fit.intercept,
                random_effects: options.random_effects,
                citations: &["Egger_et_1997"],
            },
            &x,
            &y,
        )
    });

    Ok(AnalysisReport::ok(
        output,
        chart,
        AnalysisValues::Egger(EggerValues {
            n,
            df,
            intercept,
            slope,
        }),
        citations,
    ))
}
