use nalgebra::DMatrix;

use crate::error::{Result, SpilloverError};

#[derive(Debug, Clone)]
pub struct OlsFit {
    /// k × m, one column per equation.
    pub coefficients: DMatrix<f64>,
    /// T × m.
    pub residuals: DMatrix<f64>,
}

pub fn matrix_from_rows(rows: &[Vec<f64>]) -> DMatrix<f64> {
    let cols = rows.first().map(|r| r.len()).unwrap_or(0);
    DMatrix::from_fn(rows.len(), cols, |i, j| rows[i][j])
}

/// Equation-by-equation least squares through a Cholesky solve of X'X.
pub fn ols(x: &DMatrix<f64>, y: &DMatrix<f64>) -> Result<OlsFit> {
    if x.nrows() != y.nrows() {
        return Err(SpilloverError::InvalidInput(format!(
            "regressor rows {} != target rows {}",
            x.nrows(),
            y.nrows()
        )));
    }
    if x.nrows() <= x.ncols() {
        return Err(SpilloverError::InsufficientObservations {
            observations: x.nrows(),
            required: x.ncols() + 1,
        });
    }
    let xt = x.transpose();
    let chol = (&xt * x).cholesky().ok_or_else(|| {
        SpilloverError::NonConvergent("regressor cross-product is not positive definite".to_string())
    })?;
    let coefficients = chol.solve(&(&xt * y));
    if coefficients.iter().any(|v| !v.is_finite()) {
        return Err(SpilloverError::NonConvergent(
            "least-squares coefficients are not finite".to_string(),
        ));
    }
    let residuals = y - x * &coefficients;
    Ok(OlsFit {
        coefficients,
        residuals,
    })
}

/// Maximum-likelihood residual covariance (divides by T).
pub fn residual_covariance(residuals: &DMatrix<f64>) -> DMatrix<f64> {
    let t = residuals.nrows().max(1) as f64;
    residuals.transpose() * residuals / t
}

pub fn log_det_spd(m: &DMatrix<f64>) -> Result<f64> {
    let chol = m.clone().cholesky().ok_or_else(|| {
        SpilloverError::NonConvergent("covariance matrix is not positive definite".to_string())
    })?;
    Ok(2.0 * chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>())
}
