use serde::Serialize;

use crate::error::LinalgFailure;

/// A data column chosen for an analysis role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub index: usize,
    pub label: String,
}

impl Column {
    pub fn new(index: usize, label: impl Into<String>) -> Self {
        Self {
            index,
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum CiDistribution {
    #[default]
    Normal,
    T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TrimFillEstimator {
    R0,
    #[default]
    L0,
    Q0,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RankCorrelationMethod {
    #[default]
    KendallTau,
    SpearmanRho,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum FunnelAxis {
    Variance,
    InverseVariance,
    #[default]
    StandardError,
    Precision,
    SampleSize,
}

impl FunnelAxis {
    pub fn label(self) -> &'static str {
        match self {
            FunnelAxis::Variance => "variance",
            FunnelAxis::InverseVariance => "inverse variance",
            FunnelAxis::StandardError => "standard error",
            FunnelAxis::Precision => "precision",
            FunnelAxis::SampleSize => "sample size",
        }
    }
}

/// Fail-safe numbers to report alongside a simple analysis.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailsafeOptions {
    /// Significance level for Rosenberg's fail-safe number.
    pub rosenberg: Option<f64>,
    /// Significance level for Rosenthal's fail-safe number.
    pub rosenthal: Option<f64>,
    /// Minimal meaningful effect for Orwin's fail-safe number.
    pub orwin: Option<f64>,
}

/// Random number and threading setup for bootstrap and permutation loops.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResampleConfig {
    pub seed: Option<u64>,
    pub parallel: bool,
    pub cores: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub effect: Column,
    pub variance: Column,
    pub random_effects: bool,
    pub log_transformed: bool,
    pub bootstrap_iterations: Option<usize>,
    pub randomization_iterations: Option<usize>,
    pub failsafe: FailsafeOptions,
    pub alpha: f64,
    pub ci_distribution: CiDistribution,
    pub decimal_places: usize,
    pub create_chart: bool,
    pub resampling: ResampleConfig,
}

impl AnalysisOptions {
    pub fn new(effect: Column, variance: Column) -> Self {
        Self {
            effect,
            variance,
            random_effects: false,
            log_transformed: false,
            bootstrap_iterations: None,
            randomization_iterations: None,
            failsafe: FailsafeOptions::default(),
            alpha: 0.05,
            ci_distribution: CiDistribution::Normal,
            decimal_places: 4,
            create_chart: false,
            resampling: ResampleConfig::default(),
        }
    }
}

/// The analysis to run and the columns it needs beyond effect and variance.
#[derive(Debug, Clone)]
pub enum Structure {
    Simple,
    Grouped {
        group: Column,
    },
    Nested {
        levels: Vec<Column>,
    },
    Regression {
        predictor: Column,
    },
    Glm {
        continuous: Vec<Column>,
        categorical: Vec<Column>,
    },
    Cumulative {
        order: Column,
    },
    Jackknife,
    Phylogenetic {
        tips: Column,
        continuous: Vec<Column>,
        categorical: Vec<Column>,
    },
    TrimFill {
        estimator: TrimFillEstimator,
    },
    RankCorrelation {
        method: RankCorrelationMethod,
        sample_size: Option<Column>,
    },
    Funnel {
        axis: FunnelAxis,
        sample_size: Option<Column>,
        pseudo_ci: bool,
        contours: bool,
        power: bool,
    },
    Egger,
}

impl Structure {
    pub fn name(&self) -> &'static str {
        match self {
            Structure::Simple => "simple",
            Structure::Grouped { .. } => "grouped",
            Structure::Nested { .. } => "nested",
            Structure::Regression { .. } => "regression",
            Structure::Glm { .. } => "complex",
            Structure::Cumulative { .. } => "cumulative",
            Structure::Jackknife => "jackknife",
            Structure::Phylogenetic { .. } => "phylogenetic",
            Structure::TrimFill { .. } => "trim and fill",
            Structure::RankCorrelation { .. } => "rank correlation",
            Structure::Funnel { .. } => "funnel plot",
            Structure::Egger => "Egger regression",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub options: AnalysisOptions,
    pub structure: Structure,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BootstrapCi {
    pub lower: f64,
    pub upper: f64,
    pub lower_bias_corrected: f64,
    pub upper_bias_corrected: f64,
}

/// A weighted mean with its interval estimates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeanEffect {
    pub name: String,
    pub n: usize,
    pub mean: f64,
    pub median: Option<f64>,
    pub variance: f64,
    /// Average within-study variance.
    pub avg_var: f64,
    pub lower_ci: f64,
    pub upper_ci: f64,
    pub bootstrap: Option<BootstrapCi>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeterogeneityTest {
    pub source: String,
    pub q: f64,
    pub df: i64,
    pub p_chi: f64,
    pub p_randomization: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictorTest {
    pub predictor: String,
    pub value: f64,
    pub se: f64,
    pub p_norm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct I2 {
    pub i2: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct I2Row {
    pub source: String,
    pub value: I2,
}

/// Whole-sample summary shared by most analyses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalValues {
    pub mean: MeanEffect,
    pub pooled_var: f64,
    pub total: HeterogeneityTest,
    pub i2: I2,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RosenbergFixed {
    pub k_normal: f64,
    pub k_one_study: f64,
    pub k_n_studies: f64,
    pub converged: bool,
}

/// Random-effects Rosenberg numbers; `None` where a re-estimated pooled
/// variance dropped to zero or below.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum RosenbergRandom {
    NonPositivePooledVariance,
    Estimated {
        k_one_study: Option<f64>,
        k_n_studies: Option<f64>,
        converged: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum RosenbergResult {
    Fixed(RosenbergFixed),
    Random(RosenbergRandom),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FailsafeValues {
    pub rosenberg: Option<RosenbergResult>,
    pub rosenthal: Option<f64>,
    pub orwin: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimpleValues {
    pub global: GlobalValues,
    pub failsafe: FailsafeValues,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupedValues {
    pub global: GlobalValues,
    pub group_means: Vec<MeanEffect>,
    pub group_heterogeneity: Vec<HeterogeneityTest>,
    pub group_i2: Vec<I2Row>,
    pub model: HeterogeneityTest,
    pub error: HeterogeneityTest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NestedValues {
    pub global: GlobalValues,
    pub group_means: Vec<MeanEffect>,
    pub group_heterogeneity: Vec<HeterogeneityTest>,
    /// One model test per nesting level, top level first.
    pub models: Vec<HeterogeneityTest>,
    pub error: HeterogeneityTest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressionValues {
    pub global: GlobalValues,
    pub model: HeterogeneityTest,
    pub error: HeterogeneityTest,
    pub predictors: Vec<PredictorTest>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlmValues {
    pub global: GlobalValues,
    pub model: Option<HeterogeneityTest>,
    pub error: Option<HeterogeneityTest>,
    pub predictors: Vec<PredictorTest>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhylogeneticValues {
    pub total: HeterogeneityTest,
    pub model: Option<HeterogeneityTest>,
    pub error: Option<HeterogeneityTest>,
    pub predictors: Vec<PredictorTest>,
    pub pooled_var: f64,
    /// Present only when no predictors were given.
    pub mean: Option<MeanEffect>,
    pub i2: Option<I2>,
    /// Resampling is not wired into this analysis.
    pub experimental: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CumulativeValues {
    pub means: Vec<MeanEffect>,
    pub heterogeneity: Vec<HeterogeneityTest>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JackknifeValues {
    pub global: GlobalValues,
    pub means: Vec<MeanEffect>,
    pub heterogeneity: Vec<HeterogeneityTest>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrimFillValues {
    pub original: MeanEffect,
    pub adjusted: MeanEffect,
    pub missing: usize,
    pub skew_right: bool,
    pub iterations: usize,
    pub converged: bool,
    /// Inferred studies as (effect, variance).
    pub inferred: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankCorrelationValues {
    pub method: RankCorrelationMethod,
    pub n: usize,
    pub correlation: f64,
    pub p_randomization: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelValues {
    pub n: usize,
    pub mean: f64,
    pub axis: FunnelAxis,
    pub effects: Vec<f64>,
    pub y: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EggerCoefficient {
    pub value: f64,
    pub se: f64,
    pub lower_ci: f64,
    pub upper_ci: f64,
    pub p_t: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EggerValues {
    pub n: usize,
    pub df: usize,
    pub intercept: EggerCoefficient,
    pub slope: EggerCoefficient,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AnalysisValues {
    Simple(SimpleValues),
    Grouped(GroupedValues),
    Nested(NestedValues),
    Regression(RegressionValues),
    Glm(GlmValues),
    Phylogenetic(PhylogeneticValues),
    Cumulative(CumulativeValues),
    Jackknife(JackknifeValues),
    TrimFill(TrimFillValues),
    RankCorrelation(RankCorrelationValues),
    Funnel(FunnelValues),
    Egger(EggerValues),
}

/// How an analysis call ended. Only `Ok` carries computed values.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Ok(Box<AnalysisValues>),
    InsufficientData(String),
    StructuralViolation(Vec<String>),
    SingularModel(LinalgFailure),
}

impl AnalysisOutcome {
    pub fn values(&self) -> Option<&AnalysisValues> {
        match self {
            AnalysisOutcome::Ok(values) => Some(values),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, AnalysisOutcome::Ok(_))
    }
}
