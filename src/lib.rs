//! Meta-analysis engine: pooled effect sizes, heterogeneity, structured
//! models, resampling and publication-bias diagnostics over tabular study
//! data.

pub mod error;
pub mod logging;
pub mod types;

pub mod data;
pub mod io;
pub mod matrix;
pub mod parallel;
pub mod qc;
pub mod schema;
pub mod stats;

pub mod chart;
pub mod failsafe;
pub mod output;
pub mod resampling;

pub mod analysis;
pub mod cumulative;
pub mod egger;
pub mod funnel;
pub mod glm;
pub mod grouped;
pub mod jackknife;
pub mod nested;
pub mod phylo;
pub mod rank_cor;
pub mod regression;
pub mod simple;
pub mod trim_fill;

pub use analysis::{AnalysisContext, AnalysisReport, run_analysis};
pub use phylotree;
