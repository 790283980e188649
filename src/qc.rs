use std::path::Path;

use crate::error::{MetaError, Result};
use crate::types::{AnalysisRequest, Column, FunnelAxis, Structure};

pub fn check_equal_length(
    left_len: usize,
    right_len: usize,
    left_name: &str,
    right_name: &str,
) -> Result<()> {
    if left_len != right_len {
        return Err(MetaError::InvalidArgument(format!(
            "Length of {left_name} and {right_name} should be equal"
        )));
    }
    Ok(())
}

/// With `exclusive` the bounds themselves are rejected.
pub fn check_range_f64(value: f64, min: f64, max: f64, exclusive: bool, name: &str) -> Result<()> {
    if !value.is_finite() {
        return Err(MetaError::InvalidArgument(format!(
            "Value of {name} should be finite"
        )));
    }
    if exclusive {
        if value <= min {
            return Err(MetaError::InvalidArgument(format!(
                "Value of {name} should be above {min}"
            )));
        }
        if value >= max {
            return Err(MetaError::InvalidArgument(format!(
                "Value of {name} should be below {max}"
            )));
        }
    } else {
        if value < min {
            return Err(MetaError::InvalidArgument(format!(
                "Value of {name} should be at least {min}"
            )));
        }
        if value > max {
            return Err(MetaError::InvalidArgument(format!(
                "Value of {name} should be at most {max}"
            )));
        }
    }
    Ok(())
}

pub fn check_positive_count(value: Option<usize>, name: &str) -> Result<()> {
    if value == Some(0) {
        return Err(MetaError::InvalidArgument(format!(
            "Number of {name} should be positive"
        )));
    }
    Ok(())
}

pub fn check_file_exists(path: &Path, name: &str) -> Result<()> {
    if !path.exists() {
        return Err(MetaError::InvalidArgument(format!(
            "File {path:?} passed to {name} does not exist"
        )));
    }
    Ok(())
}

/// Option bounds checked before an analysis runs.
pub fn validate_request(request: &AnalysisRequest) -> Result<()> {
    let options = &request.options;
    check_range_f64(options.alpha, 0.0, 1.0, true, "alpha")?;
    check_positive_count(options.bootstrap_iterations, "bootstrap iterations")?;
    check_positive_count(options.randomization_iterations, "randomization iterations")?;
    for alpha in [options.failsafe.rosenberg, options.failsafe.rosenthal]
        .into_iter()
        .flatten()
    {
        check_range_f64(alpha, 0.0, 1.0, true, "fail-safe alpha")?;
    }
    if let Some(min) = options.failsafe.orwin
        && min == 0.0
    {
        return Err(MetaError::InvalidArgument(
            "Minimal effect size for Orwin's fail-safe number should be non-zero".to_string(),
        ));
    }
    if let Structure::Funnel {
        axis: FunnelAxis::SampleSize,
        sample_size: None,
        ..
    } = request.structure
    {
        return Err(MetaError::InvalidArgument(
            "A sample size column is required to plot against sample size".to_string(),
        ));
    }
    Ok(())
}

fn independent_columns(structure: &Structure) -> Vec<&Column> {
    match structure {
        Structure::Grouped { group } => vec![group],
        Structure::Nested { levels } => levels.iter().collect(),
        Structure::Regression { predictor } => vec![predictor],
        Structure::Glm {
            continuous,
            categorical,
        } => continuous.iter().chain(categorical).collect(),
        Structure::Phylogenetic {
            tips,
            continuous,
            categorical,
        } => std::iter::once(tips)
            .chain(continuous)
            .chain(categorical)
            .collect(),
        Structure::Cumulative { order } => vec![order],
        Structure::RankCorrelation {
            sample_size: Some(col),
            ..
        }
        | Structure::Funnel {
            sample_size: Some(col),
            ..
        } => vec![col],
        _ => Vec::new(),
    }
}

/// Columns that reuse the effect size as an independent variable.
pub fn effect_reuse_violations(request: &AnalysisRequest) -> Vec<String> {
    let effect = &request.options.effect;
    independent_columns(&request.structure)
        .into_iter()
        .filter(|col| col.index == effect.index)
        .map(|col| {
            format!(
                "The effect size column ({}) cannot also be used as an independent variable",
                col.label
            )
        })
        .collect()
}
