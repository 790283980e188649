use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::error::LinalgFailure;

pub fn diagonal(values: &[f64]) -> DMatrix<f64> {
    DMatrix::from_diagonal(&DVector::from_column_slice(values))
}

/// Row-major rows into a matrix; rows must share one length.
pub fn from_rows(rows: &[Vec<f64>]) -> DMatrix<f64> {
    let n = rows.len();
    let m = rows.first().map(|row| row.len()).unwrap_or(0);
    let data: Vec<f64> = rows.iter().flat_map(|row| row.iter().copied()).collect();
    DMatrix::from_row_slice(n, m, &data)
}

pub fn invert(matrix: &DMatrix<f64>) -> Result<DMatrix<f64>, LinalgFailure> {
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(LinalgFailure::NonFinite);
    }
    let inv = matrix
        .clone()
        .try_inverse()
        .ok_or(LinalgFailure::Singular)?;
    if inv.iter().any(|v| !v.is_finite()) {
        return Err(LinalgFailure::Singular);
    }
    Ok(inv)
}

/// Generalized least-squares fit of `e = X b` under weight matrix `W`.
#[derive(Debug, Clone)]
pub struct GlmFit {
    pub qm: f64,
    pub qe: f64,
    pub beta: DVector<f64>,
    /// `(X'WX)^-1`, the coefficient covariance.
    pub sigma_b: DMatrix<f64>,
}

pub fn calculate_glm(
    e: &DVector<f64>,
    x: &DMatrix<f64>,
    w: &DMatrix<f64>,
) -> Result<GlmFit, LinalgFailure> {
    let xt = x.transpose();
    let xtw = &xt * w;
    let sigma_b = invert(&(&xtw * x))?;
    let beta = &sigma_b * &xtw * e;

    let p = beta.len();
    let qm = if p > 1 {
        let red_beta = beta.rows(1, p - 1).into_owned();
        let red_sigma = sigma_b.view((1, 1), (p - 1, p - 1)).into_owned();
        let red_inv = invert(&red_sigma)?;
        (red_beta.transpose() * red_inv * &red_beta)[(0, 0)]
    } else {
        0.0
    };
    let residual = e - x * &beta;
    let qe = (residual.transpose() * w * &residual)[(0, 0)];
    if !qm.is_finite() || !qe.is_finite() {
        return Err(LinalgFailure::NonFinite);
    }
    debug!("glm: qm={qm}, qe={qe}, beta={:?}", beta.as_slice());
    Ok(GlmFit {
        qm,
        qe,
        beta,
        sigma_b,
    })
}

/// Pooled variance under a GLM structure, clamped at zero.
pub fn pooled_var_glm(qe: f64, w: &DMatrix<f64>, x: &DMatrix<f64>) -> Result<f64, LinalgFailure> {
    let n = x.nrows() as f64;
    let np = x.ncols() as f64 - 1.0;
    let numerator = qe - (n - np - 1.0);
    let xt = x.transpose();
    let xtwx_inv = invert(&(&xt * w * x))?;
    let val = w * x * xtwx_inv * xt * w;
    let pooled = numerator / (w.trace() - val.trace());
    Ok(pooled.max(0.0))
}
