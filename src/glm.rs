use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use nalgebra::{DMatrix, DVector};
use tracing::{debug, info};

use crate::analysis::{
    AnalysisContext, AnalysisReport, FEWER_THAN_TWO_STUDIES, fewer_than_two_groups,
    fewer_than_two_in_group, preamble, q_test,
};
use crate::data::{DataSource, ExtractSpec, Observation, extract};
use crate::error::LinalgFailure;
use crate::matrix::{GlmFit, calculate_glm, diagonal, from_rows, pooled_var_glm};
use crate::output::{
    global_output, heading, heterogeneity_table, included_line, pooled_variance_line,
    predictor_table,
};
use crate::stats::{
    mean_of, prob_z_score, random_weights, reciprocal, weighted_mean_var_q, weighted_median,
};
use crate::types::{
    AnalysisValues, Column, GlmValues, GlobalValues, HeterogeneityTest, MeanEffect, PredictorTest,
};

/// Design matrix of a linear model over the extracted observations.
///
/// Column 0 is the intercept, then one column per continuous predictor,
/// then for each categorical predictor one contrast column per level after
/// the first (sorted) level: `1` for rows at that level, `-1` for rows at
/// the reference level and `0` otherwise.
#[derive(Debug, Clone)]
pub struct Design {
    pub x: DMatrix<f64>,
    pub labels: Vec<String>,
    /// False when the model is the intercept alone.
    pub has_model: bool,
}

pub fn design_matrix(
    observations: &[Observation],
    continuous: &[Column],
    categorical: &[Column],
) -> Design {
    let has_model = !continuous.is_empty() || !categorical.is_empty();
    let mut labels = vec![if has_model { "intercept" } else { "mean" }.to_string()];
    labels.extend(continuous.iter().map(|c| c.label.clone()));

    let mut rows: Vec<Vec<f64>> = observations
        .iter()
        .map(|obs| {
            let mut row = Vec::with_capacity(1 + obs.covariates.len());
            row.push(1.0);
            row.extend(&obs.covariates);
            row
        })
        .collect();

    for (c, column) in categorical.iter().enumerate() {
        let levels: Vec<&str> = observations
            .iter()
            .map(|obs| obs.groups[c].as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let Some((reference, others)) = levels.split_first() else {
            continue;
        };
        if others.is_empty() {
            continue;
        }
        for (row, obs) in rows.iter_mut().zip(observations) {
            let value = obs.groups[c].as_str();
            for level in others {
                row.push(if value == *level {
                    1.0
                } else if value == *reference {
                    -1.0
                } else {
                    0.0
                });
            }
        }
        if others.len() == 1 {
            labels.push(column.label.clone());
        } else {
            labels.extend((1..=others.len()).map(|i| format!("{}_{i}", column.label)));
        }
    }

    Design {
        x: from_rows(&rows),
        labels,
        has_model,
    }
}

/// Categorical predictors each need two levels, with two studies per level.
pub(crate) fn categorical_violations(
    observations: &[Observation],
    categorical: &[Column],
) -> Vec<String> {
    let mut violations = Vec::new();
    for (c, column) in categorical.iter().enumerate() {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for obs in observations {
            *counts.entry(obs.groups[c].as_str()).or_default() += 1;
        }
        if counts.len() < 2 {
            violations.push(fewer_than_two_groups(&column.label));
            continue;
        }
        violations.extend(
            counts
                .iter()
                .filter(|(_, count)| **count < 2)
                .map(|(level, _)| fewer_than_two_in_group(level, &column.label)),
        );
    }
    violations
}

/// Coefficient rows of a fitted model, labelled `β{index} ({label})`.
pub(crate) fn coefficient_tests(fit: &GlmFit, labels: &[String]) -> Vec<PredictorTest> {
    fit.beta
        .iter()
        .zip(labels)
        .enumerate()
        .map(|(b, (value, label))| {
            let se = fit.sigma_b[(b, b)].sqrt();
            PredictorTest {
                predictor: format!("β{b} ({label})"),
                value: *value,
                se,
                p_norm: prob_z_score(value / se),
            }
        })
        .collect()
}

/// Model, error and total tests of a fit with `n` rows.
pub(crate) fn model_tests(
    fit: &GlmFit,
    n: usize,
    columns: usize,
) -> (HeterogeneityTest, HeterogeneityTest, HeterogeneityTest) {
    let dfm = columns as i64 - 1;
    let dfe = n as i64 - dfm - 1;
    (
        q_test("Model", fit.qm, dfm),
        q_test("Error", fit.qe, dfe),
        q_test("Total", fit.qm + fit.qe, n as i64 - 1),
    )
}

struct FittedGlm {
    fit: GlmFit,
    pooled_var: f64,
    weights: Vec<f64>,
}

fn fit_glm(
    ctx: &AnalysisContext<'_>,
    e: &DVector<f64>,
    x: &DMatrix<f64>,
    variances: &[f64],
) -> Result<FittedGlm, LinalgFailure> {
    let w = reciprocal(variances);
    let w_matrix = diagonal(&w);
    let fixed = calculate_glm(e, x, &w_matrix)?;
    let pooled_var = pooled_var_glm(fixed.qe, &w_matrix, x)?;
    if !ctx.options.random_effects {
        return Ok(FittedGlm {
            fit: fixed,
            pooled_var,
            weights: w,
        });
    }
    let ws = random_weights(variances, pooled_var);
    let fit = calculate_glm(e, x, &diagonal(&ws))?;
    Ok(FittedGlm {
        fit,
        pooled_var,
        weights: ws,
    })
}

pub fn glm(
    data: &dyn DataSource,
    ctx: &AnalysisContext<'_>,
    continuous: &[Column],
    categorical: &[Column],
) -> Result<AnalysisReport> {
    let options = ctx.options;
    let extracted = extract(
        data,
        options.effect.index,
        options.variance.index,
        &ExtractSpec {
            categories: categorical.iter().map(|c| c.index).collect(),
            numbers: continuous.iter().map(|c| c.index).collect(),
            ..ExtractSpec::default()
        },
    )?;
    let mut output = preamble(&extracted);
    let n = extracted.len();
    if n < 2 {
        return Ok(AnalysisReport::insufficient(output, FEWER_THAN_TWO_STUDIES));
    }
    let violations = categorical_violations(&extracted.observations, categorical);
    if !violations.is_empty() {
        return Ok(AnalysisReport::violations(output, violations, None));
    }
    info!("{n} studies will be included in this analysis");
    output.push(included_line(n));

    let effects = extracted.effects();
    let variances = extracted.variances();
    let design = design_matrix(&extracted.observations, continuous, categorical);
    let e = DVector::from_column_slice(&effects);
    let fitted = match fit_glm(ctx, &e, &design.x, &variances) {
        Ok(fitted) => fitted,
        Err(failure) => return Ok(AnalysisReport::singular(output, failure)),
    };
    let FittedGlm {
        fit,
        pooled_var,
        weights,
    } = fitted;
    if options.random_effects {
        output.push(pooled_variance_line(pooled_var, ctx.decimals()));
    }
    let (mut model, error, total) = model_tests(&fit, n, design.x.ncols());
    debug!("glm: qm={}, qe={}, dfm={}", fit.qm, fit.qe, model.df);

    let summary = weighted_mean_var_q(&effects, &weights)?;
    let (lower_ci, upper_ci) = ctx.interval(summary.mean, summary.variance, n as f64 - 1.0);
    let bootstrap = ctx.bootstrap(&effects, &variances, summary.mean, pooled_var)?;
    let global = GlobalValues {
        mean: MeanEffect {
            name: "Global".to_string(),
            n,
            mean: summary.mean,
            median: Some(weighted_median(&effects, &weights)),
            variance: summary.variance,
            avg_var: mean_of(&variances),
            lower_ci,
            upper_ci,
            bootstrap,
        },
        pooled_var,
        i2: ctx.i2(total.q, n),
        total,
    };

    if let (true, Some(iterations)) = (design.has_model, options.randomization_iterations) {
        let w_matrix = diagonal(&weights);
        model.p_randomization = Some(ctx.resampler.permutation_test(
            iterations,
            &effects,
            fit.qm,
            |permuted| {
                calculate_glm(&DVector::from_column_slice(permuted), &design.x, &w_matrix)
                    .map(|f| f.qm)
                    .unwrap_or(f64::NAN)
            },
        )?);
    }

    let predictors = coefficient_tests(&fit, &design.labels);
    let dp = ctx.decimals();
    output.push(heading("Model Results"));
    output.push(heading("Predictors"));
    output.push(predictor_table(&predictors, dp, options.alpha));
    if design.has_model {
        output.push(heading("Heterogeneity"));
        output.push(heterogeneity_table(
            &[model.clone(), error.clone(), global.total.clone()],
            dp,
            true,
            options.randomization_iterations,
        ));
    }
    output.push(heading("Global Results"));
    let citations = global_output(&mut output, &global, &ctx.global_output(true));

    let (model, error) = if design.has_model {
        (Some(model), Some(error))
    } else {
        (None, None)
    };
    Ok(AnalysisReport::ok(
        output,
        None,
        AnalysisValues::Glm(GlmValues {
            global,
            model,
            error,
            predictors,
        }),
        citations,
    ))
}
