//! Entry point for every meta-analysis and the pieces the analyzers share.

use anyhow::{Result, anyhow};
use phylotree::PhyloTree;
use tracing::{info, warn};

use crate::chart::ChartData;
use crate::cumulative::cumulative;
use crate::data::{DataSource, Extracted};
use crate::egger::egger;
use crate::error::LinalgFailure;
use crate::funnel::funnel;
use crate::glm::glm;
use crate::grouped::grouped;
use crate::jackknife::jackknife;
use crate::nested::nested;
use crate::output::{Block, GlobalOutput, filtered_invalid_blocks};
use crate::phylo::phylogenetic;
use crate::qc::{effect_reuse_violations, validate_request};
use crate::rank_cor::rank_correlation;
use crate::regression::regression;
use crate::resampling::{Progress, Resampler};
use crate::simple::simple;
use crate::stats::{chi_square_p, confidence_interval, i_squared};
use crate::trim_fill::trim_and_fill;
use crate::types::{
    AnalysisOptions, AnalysisOutcome, AnalysisRequest, AnalysisValues, BootstrapCi,
    HeterogeneityTest, I2, Structure,
};

pub const FEWER_THAN_TWO_STUDIES: &str = "Fewer than two studies were valid for analysis";
pub const FEWER_THAN_THREE_STUDIES: &str = "Fewer than three studies were valid for analysis";
pub const FILTER_PROBLEM_DATA: &str = "Please filter problematic data to continue";

pub fn fewer_than_two_groups(column: &str) -> String {
    format!("Fewer than two valid groups were identified in column {column}")
}

pub fn fewer_than_two_in_group(group: &str, column: &str) -> String {
    format!("Fewer than two valid studies were identified for group {group} of column {column}.")
}

/// Report text, optional chart, outcome and citation keys of one analysis.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub output: Vec<Block>,
    pub chart: Option<ChartData>,
    pub outcome: AnalysisOutcome,
    pub citations: Vec<&'static str>,
}

impl AnalysisReport {
    pub(crate) fn ok(
        output: Vec<Block>,
        chart: Option<ChartData>,
        values: AnalysisValues,
        citations: Vec<&'static str>,
    ) -> Self {
        Self {
            output,
            chart,
            outcome: AnalysisOutcome::Ok(Box::new(values)),
            citations,
        }
    }

    pub(crate) fn insufficient(mut output: Vec<Block>, message: &str) -> Self {
        warn!("{message}");
        output.push(vec![message.to_string()]);
        Self {
            output,
            chart: None,
            outcome: AnalysisOutcome::InsufficientData(message.to_string()),
            citations: Vec::new(),
        }
    }

    /// Every violation goes into one block, followed by `trailer` if given.
    pub(crate) fn violations(
        mut output: Vec<Block>,
        violations: Vec<String>,
        trailer: Option<&str>,
    ) -> Self {
        for v in &violations {
            warn!("{v}");
        }
        let mut block = violations.clone();
        block.extend(trailer.map(str::to_string));
        output.push(block);
        Self {
            output,
            chart: None,
            outcome: AnalysisOutcome::StructuralViolation(violations),
            citations: Vec::new(),
        }
    }

    pub(crate) fn singular(mut output: Vec<Block>, failure: LinalgFailure) -> Self {
        warn!("model could not be fit: {failure}");
        let detail = match failure {
            LinalgFailure::Singular => {
                "The design matrix is singular; the model cannot be estimated. Check for predictors that are constant or collinear."
            }
            LinalgFailure::NonFinite => {
                "An unknown error occurred while fitting the model. Check the data for extreme values."
            }
        };
        output.push(vec![
            "Analysis Error Encountered".to_string(),
            detail.to_string(),
        ]);
        Self {
            output,
            chart: None,
            outcome: AnalysisOutcome::SingularModel(failure),
            citations: Vec::new(),
        }
    }
}

/// Options and resampling machinery for one analysis call.
pub struct AnalysisContext<'a> {
    pub options: &'a AnalysisOptions,
    pub resampler: Resampler<'a>,
}

impl<'a> AnalysisContext<'a> {
    pub fn new(options: &'a AnalysisOptions, progress: &'a Progress<'a>) -> Self {
        Self {
            options,
            resampler: Resampler::new(options.resampling, progress),
        }
    }

    pub(crate) fn interval(&self, mean: f64, variance: f64, df: f64) -> (f64, f64) {
        confidence_interval(
            mean,
            variance,
            self.options.alpha,
            self.options.ci_distribution,
            df,
        )
    }

    pub(crate) fn bootstrap(
        &self,
        effects: &[f64],
        variances: &[f64],
        mean: f64,
        pooled_var: f64,
    ) -> Result<Option<BootstrapCi>> {
        let samples: Vec<(f64, f64)> = effects
            .iter()
            .copied()
            .zip(variances.iter().copied())
            .collect();
        self.resampler.bootstrap_mean_ci(
            self.options.bootstrap_iterations,
            &samples,
            mean,
            pooled_var,
            self.options.random_effects,
            self.options.alpha,
        )
    }

    pub(crate) fn i2(&self, q: f64, n: usize) -> I2 {
        i_squared(q, n, self.options.alpha)
    }

    pub(crate) fn global_output(&self, include_median: bool) -> GlobalOutput<'a> {
        GlobalOutput {
            effect_label: &self.options.effect.label,
            decimals: self.options.decimal_places,
            alpha: self.options.alpha,
            log_transformed: self.options.log_transformed,
            include_median,
        }
    }

    pub(crate) fn decimals(&self) -> usize {
        self.options.decimal_places
    }

    pub(crate) fn effect_label(&self) -> &'a str {
        &self.options.effect.label
    }
}

/// Chi-square heterogeneity test with no randomization result.
pub(crate) fn q_test(source: impl Into<String>, q: f64, df: i64) -> HeterogeneityTest {
    HeterogeneityTest {
        source: source.into(),
        q,
        df,
        p_chi: chi_square_p(q, df),
        p_randomization: None,
    }
}

/// Report preamble: excluded rows, then the study count when there are
/// enough studies to go on.
pub(crate) fn preamble(extracted: &Extracted) -> Vec<Block> {
    filtered_invalid_blocks(&extracted.filtered, &extracted.invalid)
}

/// Validate `request`, then run the analysis it names against `data`.
/// Phylogenetic analyses need `tree`.
pub fn run_analysis(
    data: &dyn DataSource,
    request: &AnalysisRequest,
    tree: Option<&PhyloTree>,
    progress: &Progress<'_>,
) -> Result<AnalysisReport> {
    validate_request(request)?;
    let reused = effect_reuse_violations(request);
    if !reused.is_empty() {
        return Ok(AnalysisReport::violations(Vec::new(), reused, None));
    }

    let ctx = AnalysisContext::new(&request.options, progress);
    info!(
        "Running {} analysis of {}",
        request.structure.name(),
        request.options.effect.label
    );
    match &request.structure {
        Structure::Simple => simple(data, &ctx),
        Structure::Grouped { group } => grouped(data, &ctx, group),
        Structure::Nested { levels } => nested(data, &ctx, levels),
        Structure::Regression { predictor } => regression(data, &ctx, predictor),
        Structure::Glm {
            continuous,
            categorical,
        } => glm(data, &ctx, continuous, categorical),
        Structure::Cumulative { order } => cumulative(data, &ctx, order),
        Structure::Jackknife => jackknife(data, &ctx),
        Structure::Phylogenetic {
            tips,
            continuous,
            categorical,
        } => {
            let tree =
                tree.ok_or_else(|| anyhow!("a phylogeny is required for a phylogenetic analysis"))?;
            phylogenetic(data, &ctx, tree, tips, continuous, categorical)
        }
        Structure::TrimFill { estimator } => trim_and_fill(data, &ctx, *estimator),
        Structure::RankCorrelation {
            method,
            sample_size,
        } => rank_correlation(data, &ctx, *method, sample_size.as_ref()),
        Structure::Funnel {
            axis,
            sample_size,
            pseudo_ci,
            contours,
            power,
        } => funnel(
            data,
            &ctx,
            *axis,
            sample_size.as_ref(),
            crate::chart::FunnelOverlays {
                pseudo_ci: *pseudo_ci,
                contours: *contours,
                power: *power,
            },
        ),
        Structure::Egger => egger(data, &ctx),
    }
}
