use std::io::{self, BufWriter};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};

use metastat::analysis::run_analysis;
use metastat::io::{read_table, read_tree, write_chart_json, write_report};
use metastat::logging::{init_tracing, log_blocks, warn_line};
use metastat::qc::check_file_exists;
use metastat::resampling::Progress;
use metastat::schema::{resolve_column, resolve_columns};
use metastat::types::{
    AnalysisOptions, AnalysisOutcome, AnalysisRequest, CiDistribution, FailsafeOptions,
    FunnelAxis, RankCorrelationMethod, ResampleConfig, Structure, TrimFillEstimator,
};

#[derive(Parser)]
#[command(name = "metastat")]
#[command(about = "Meta-analysis of effect sizes from a study table", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Common {
    /// Study table (CSV/TSV, optionally .gz or .bz2).
    #[arg(long, required = true)]
    data: PathBuf,
    #[arg(long, required = true)]
    effect: String,
    #[arg(long, required = true)]
    variance: String,
    #[arg(long)]
    random_effects: bool,
    #[arg(long)]
    log_transformed: bool,
    #[arg(long)]
    bootstrap: Option<usize>,
    #[arg(long)]
    randomization: Option<usize>,
    #[arg(long)]
    rosenberg: Option<f64>,
    #[arg(long)]
    rosenthal: Option<f64>,
    #[arg(long)]
    orwin: Option<f64>,
    #[arg(long, default_value_t = 0.05)]
    alpha: f64,
    /// Use Student's t rather than the normal for confidence intervals.
    #[arg(long)]
    t_dist: bool,
    #[arg(long, default_value_t = 4)]
    decimals: usize,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    parallel: bool,
    #[arg(long)]
    cores: Option<usize>,
    #[arg(long)]
    report: Option<PathBuf>,
    /// Write chart data as JSON.
    #[arg(long)]
    chart: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum EstimatorArg {
    R0,
    L0,
    Q0,
}

#[derive(Clone, Copy, ValueEnum)]
enum MethodArg {
    Tau,
    Rho,
}

#[derive(Clone, Copy, ValueEnum)]
enum AxisArg {
    Variance,
    InverseVariance,
    StandardError,
    Precision,
    SampleSize,
}

#[derive(Subcommand)]
enum Command {
    Simple {
        #[command(flatten)]
        common: Common,
    },
    Grouped {
        #[command(flatten)]
        common: Common,
        #[arg(long, required = true)]
        group: String,
    },
    Nested {
        #[command(flatten)]
        common: Common,
        /// Grouping columns, outermost first.
        #[arg(long, required = true, num_args = 2..)]
        levels: Vec<String>,
    },
    Regression {
        #[command(flatten)]
        common: Common,
        #[arg(long, required = true)]
        predictor: String,
    },
    Glm {
        #[command(flatten)]
        common: Common,
        #[arg(long, num_args = 1..)]
        continuous: Vec<String>,
        #[arg(long, num_args = 1..)]
        categorical: Vec<String>,
    },
    Cumulative {
        #[command(flatten)]
        common: Common,
        #[arg(long, required = true)]
        order: String,
    },
    Jackknife {
        #[command(flatten)]
        common: Common,
    },
    Phylogenetic {
        #[command(flatten)]
        common: Common,
        /// Newick tree file.
        #[arg(long, required = true)]
        tree: PathBuf,
        #[arg(long, required = true)]
        tips: String,
        #[arg(long, num_args = 1..)]
        continuous: Vec<String>,
        #[arg(long, num_args = 1..)]
        categorical: Vec<String>,
    },
    TrimFill {
        #[command(flatten)]
        common: Common,
        #[arg(long, value_enum, default_value = "r0")]
        estimator: EstimatorArg,
    },
    RankCorrelation {
        #[command(flatten)]
        common: Common,
        #[arg(long, value_enum, default_value = "tau")]
        method: MethodArg,
        #[arg(long)]
        sample_size: Option<String>,
    },
    Funnel {
        #[command(flatten)]
        common: Common,
        #[arg(long, value_enum, default_value = "standard-error")]
        axis: AxisArg,
        #[arg(long)]
        sample_size: Option<String>,
        #[arg(long)]
        pseudo_ci: bool,
        #[arg(long)]
        contours: bool,
        #[arg(long)]
        power: bool,
    },
    Egger {
        #[command(flatten)]
        common: Common,
    },
}

impl From<EstimatorArg> for TrimFillEstimator {
    fn from(arg: EstimatorArg) -> Self {
        match arg {
            EstimatorArg::R0 => TrimFillEstimator::R0,
            EstimatorArg::L0 => TrimFillEstimator::L0,
            EstimatorArg::Q0 => TrimFillEstimator::Q0,
        }
    }
}

impl From<MethodArg> for RankCorrelationMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Tau => RankCorrelationMethod::KendallTau,
            MethodArg::Rho => RankCorrelationMethod::SpearmanRho,
        }
    }
}

impl From<AxisArg> for FunnelAxis {
    fn from(arg: AxisArg) -> Self {
        match arg {
            AxisArg::Variance => FunnelAxis::Variance,
            AxisArg::InverseVariance => FunnelAxis::InverseVariance,
            AxisArg::StandardError => FunnelAxis::StandardError,
            AxisArg::Precision => FunnelAxis::Precision,
            AxisArg::SampleSize => FunnelAxis::SampleSize,
        }
    }
}

fn build_options(common: &Common, headers: &[String]) -> anyhow::Result<AnalysisOptions> {
    let mut options = AnalysisOptions::new(
        resolve_column(headers, &common.effect)?,
        resolve_column(headers, &common.variance)?,
    );
    options.random_effects = common.random_effects;
    options.log_transformed = common.log_transformed;
    options.bootstrap_iterations = common.bootstrap;
    options.randomization_iterations = common.randomization;
    options.failsafe = FailsafeOptions {
        rosenberg: common.rosenberg,
        rosenthal: common.rosenthal,
        orwin: common.orwin,
    };
    options.alpha = common.alpha;
    options.ci_distribution = if common.t_dist {
        CiDistribution::T
    } else {
        CiDistribution::Normal
    };
    options.decimal_places = common.decimals;
    options.create_chart = common.chart.is_some();
    options.resampling = ResampleConfig {
        seed: common.seed,
        parallel: common.parallel,
        cores: common.cores,
    };
    Ok(options)
}

impl Command {
    fn common(&self) -> &Common {
        match self {
            Command::Simple { common }
            | Command::Grouped { common, .. }
            | Command::Nested { common, .. }
            | Command::Regression { common, .. }
            | Command::Glm { common, .. }
            | Command::Cumulative { common, .. }
            | Command::Jackknife { common }
            | Command::Phylogenetic { common, .. }
            | Command::TrimFill { common, .. }
            | Command::RankCorrelation { common, .. }
            | Command::Funnel { common, .. }
            | Command::Egger { common } => common,
        }
    }

    fn structure(&self, headers: &[String]) -> anyhow::Result<Structure> {
        let optional = |name: &Option<String>| {
            name.as_deref()
                .map(|name| resolve_column(headers, name))
                .transpose()
        };
        Ok(match self {
            Command::Simple { .. } => Structure::Simple,
            Command::Grouped { group, .. } => Structure::Grouped {
                group: resolve_column(headers, group)?,
            },
            Command::Nested { levels, .. } => Structure::Nested {
                levels: resolve_columns(headers, levels)?,
            },
            Command::Regression { predictor, .. } => Structure::Regression {
                predictor: resolve_column(headers, predictor)?,
            },
            Command::Glm {
                continuous,
                categorical,
                ..
            } => Structure::Glm {
                continuous: resolve_columns(headers, continuous)?,
                categorical: resolve_columns(headers, categorical)?,
            },
            Command::Cumulative { order, .. } => Structure::Cumulative {
                order: resolve_column(headers, order)?,
            },
            Command::Jackknife { .. } => Structure::Jackknife,
            Command::Phylogenetic {
                tips,
                continuous,
                categorical,
                ..
            } => Structure::Phylogenetic {
                tips: resolve_column(headers, tips)?,
                continuous: resolve_columns(headers, continuous)?,
                categorical: resolve_columns(headers, categorical)?,
            },
            Command::TrimFill { estimator, .. } => Structure::TrimFill {
                estimator: (*estimator).into(),
            },
            Command::RankCorrelation {
                method,
                sample_size,
                ..
            } => Structure::RankCorrelation {
                method: (*method).into(),
                sample_size: optional(sample_size)?,
            },
            Command::Funnel {
                axis,
                sample_size,
                pseudo_ci,
                contours,
                power,
                ..
            } => Structure::Funnel {
                axis: (*axis).into(),
                sample_size: optional(sample_size)?,
                pseudo_ci: *pseudo_ci,
                contours: *contours,
                power: *power,
            },
            Command::Egger { .. } => Structure::Egger,
        })
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let common = cli.command.common();

    check_file_exists(&common.data, "--data")?;
    let table = read_table(&common.data)?;
    let headers = table.column_labels().to_vec();
    let request = AnalysisRequest {
        options: build_options(common, &headers)?,
        structure: cli.command.structure(&headers)?,
    };
    let tree = match &cli.command {
        Command::Phylogenetic { tree, .. } => {
            check_file_exists(tree, "--tree")?;
            Some(read_tree(tree)?)
        }
        _ => None,
    };

    let progress = Progress::none();
    let report = run_analysis(&table, &request, tree.as_ref(), &progress)?;

    let mut stdout = BufWriter::new(io::stdout().lock());
    log_blocks(&mut stdout, &report.output, false)?;
    if !report.citations.is_empty() {
        log_blocks(&mut stdout, &[vec![report.citations.join(", ")]], false)?;
    }
    match &report.outcome {
        AnalysisOutcome::Ok(_) => {}
        AnalysisOutcome::InsufficientData(detail) => {
            warn_line(&mut io::stderr(), &format!("analysis not run: {detail}"))?;
        }
        AnalysisOutcome::StructuralViolation(details) => {
            warn_line(
                &mut io::stderr(),
                &format!("analysis not run: {}", details.join("; ")),
            )?;
        }
        AnalysisOutcome::SingularModel(failure) => {
            warn_line(&mut io::stderr(), &format!("model could not be fit: {failure}"))?;
        }
    }

    if let Some(path) = &common.report {
        write_report(&report.output, path)
            .with_context(|| format!("write report {}", path.display()))?;
    }
    if let (Some(path), Some(chart)) = (&common.chart, &report.chart) {
        write_chart_json(chart, path)?;
    }
    Ok(())
}
