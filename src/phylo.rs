//! Phylogenetic generalized least squares.
//!
//! Studies are correlated through the tree: the covariance of studies `i`
//! and `j` is `p_ij * sqrt(v_i * v_j)` where `p_ij` is the share of history
//! their tips have in common. The analysis is experimental: resampling
//! options are accepted but not applied.

use std::collections::BTreeSet;

use anyhow::Result;
use nalgebra::{DMatrix, DVector};
use phylotree::{PhyloTree, phylogenetic_correlation};
use tracing::{debug, info, warn};

use crate::analysis::{AnalysisContext, AnalysisReport, FEWER_THAN_TWO_STUDIES, preamble};
use crate::data::{DataSource, ExtractSpec, extract};
use crate::error::LinalgFailure;
use crate::glm::{categorical_violations, coefficient_tests, design_matrix, model_tests};
use crate::matrix::{GlmFit, calculate_glm, invert, pooled_var_glm};
use crate::output::{
    Block, global_output, heading, heterogeneity_table, included_line, pooled_variance_line,
    predictor_table,
};
use crate::stats::{mean_of, t_interval};
use crate::types::{AnalysisValues, Column, GlobalValues, MeanEffect, PhylogeneticValues};

pub const EXPERIMENTAL_WARNING: &str = "Warning: The phylogenetic glm meta-analysis is still experimental and has some kinks that have not definitively been worked out yet. Not all of the intended output from this analysis is included at this time and the randomization tests have not been activated.";

/// Covariance matrix with `variances` on the diagonal and tree-scaled
/// covariances elsewhere.
pub fn phylogenetic_covariance(correlation: &[Vec<f64>], variances: &[f64]) -> DMatrix<f64> {
    let n = variances.len();
    DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            variances[i]
        } else {
            correlation[i][j] * variances[i].sqrt() * variances[j].sqrt()
        }
    })
}

fn phylogenetic_weights(correlation: &[Vec<f64>], variances: &[f64]) -> Result<DMatrix<f64>, LinalgFailure> {
    invert(&phylogenetic_covariance(correlation, variances))
}

fn fit_phylogenetic(
    random_effects: bool,
    e: &DVector<f64>,
    x: &DMatrix<f64>,
    correlation: &[Vec<f64>],
    variances: &[f64],
) -> Result<(GlmFit, f64), LinalgFailure> {
    let w = phylogenetic_weights(correlation, variances)?;
    let fixed = calculate_glm(e, x, &w)?;
    let pooled_var = pooled_var_glm(fixed.qe, &w, x)?;
    if !random_effects {
        return Ok((fixed, pooled_var));
    }
    let shifted: Vec<f64> = variances.iter().map(|v| v + pooled_var).collect();
    let ws = phylogenetic_weights(correlation, &shifted)?;
    Ok((calculate_glm(e, x, &ws)?, pooled_var))
}

pub fn phylogenetic(
    data: &dyn DataSource,
    ctx: &AnalysisContext<'_>,
    tree: &PhyloTree,
    tips: &Column,
    continuous: &[Column],
    categorical: &[Column],
) -> Result<AnalysisReport> {
    let options = ctx.options;
    let tree_tips: BTreeSet<String> = tree.tip_names().into_iter().collect();
    let extracted = extract(
        data,
        options.effect.index,
        options.variance.index,
        &ExtractSpec {
            categories: categorical.iter().map(|c| c.index).collect(),
            numbers: continuous.iter().map(|c| c.index).collect(),
            tips: Some((tips.index, &tree_tips)),
            ..ExtractSpec::default()
        },
    )?;
    let mut output: Vec<Block> = preamble(&extracted);
    warn!("phylogenetic meta-analysis is experimental; resampling is not applied");
    output.push(vec![EXPERIMENTAL_WARNING.to_string()]);

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

    let tip_names: Vec<String> = extracted
        .observations
        .iter()
        .filter_map(|obs| obs.tip.clone())
        .collect();
    let correlation = phylogenetic_correlation(tree, &tip_names)?;
    let effects = extracted.effects();
    let variances = extracted.variances();
    let design = design_matrix(&extracted.observations, continuous, categorical);
    let e = DVector::from_column_slice(&effects);

    let (fit, pooled_var) = match fit_phylogenetic(
        options.random_effects,
        &e,
        &design.x,
        &correlation,
        &variances,
    ) {
        Ok(result) => result,
        Err(failure) => return Ok(AnalysisReport::singular(output, failure)),
    };
    if options.random_effects {
        output.push(pooled_variance_line(pooled_var, ctx.decimals()));
    }
    let (model, error, total) = model_tests(&fit, n, design.x.ncols());
    debug!(
        "phylogenetic glm: qm={}, qe={}, pooled variance={pooled_var}",
        fit.qm, fit.qe
    );

    let predictors = coefficient_tests(&fit, &design.labels);
    let dp = ctx.decimals();
    output.push(heading("Model Results"));
    output.push(heading("Predictors"));
    output.push(predictor_table(&predictors, dp, options.alpha));

    let mut citations = Vec::new();
    let values = if design.has_model {
        output.push(heading("Heterogeneity"));
        output.push(heterogeneity_table(
            &[model.clone(), error.clone(), total.clone()],
            dp,
            true,
            None,
        ));
        PhylogeneticValues {
            total,
            model: Some(model),
            error: Some(error),
            predictors,
            pooled_var,
            mean: None,
            i2: None,
            experimental: true,
        }
    } else {
        let mean = fit.beta[0];
        let variance = fit.sigma_b[(0, 0)];
        let (lower_ci, upper_ci) =
            t_interval(mean, variance.sqrt(), options.alpha, n as f64 - 1.0);
        let global = GlobalValues {
            mean: MeanEffect {
                name: "Global".to_string(),
                n,
                mean,
                median: None,
                variance,
                avg_var: mean_of(&variances),
                lower_ci,
                upper_ci,
                bootstrap: None,
            },
            pooled_var,
            i2: ctx.i2(total.q, n),
            total,
        };
        output.push(heading("Global Results"));
        citations = global_output(&mut output, &global, &ctx.global_output(false));
        PhylogeneticValues {
            total: global.total,
            model: None,
            error: None,
            predictors,
            pooled_var,
            mean: Some(global.mean),
            i2: Some(global.i2),
            experimental: true,
        }
    };

    Ok(AnalysisReport::ok(
        output,
        None,
        AnalysisValues::Phylogenetic(values),
        citations,
    ))
}
