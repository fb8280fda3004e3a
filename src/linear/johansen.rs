use nalgebra::SymmetricEigen;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpilloverError};
use crate::linalg::{matrix_from_rows, ols};

pub const SUPPORTED_LEVELS: [f64; 3] = [0.10, 0.05, 0.01];

/// Trace-test critical values (unrestricted constant) indexed by the number of
/// non-cointegrated directions under the null, columns 90% / 95% / 99%.
const TRACE_CRITICAL: [[f64; 3]; 2] = [[2.7055, 3.8415, 6.6349], [13.4294, 15.4943, 19.9349]];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CointegrationResult {
    pub rank: usize,
    /// Trace statistic for H0: rank <= r, r = 0, 1.
    pub trace_statistics: Vec<f64>,
    pub critical_values: Vec<f64>,
    pub eigenvalues: Vec<f64>,
    /// Leading cointegrating vector as (β_a, β_b).
    pub leading_vector: [f64; 2],
}

impl CointegrationResult {
    /// θ in rate_b ≈ θ · rate_a over the long run, from the leading vector.
    pub fn long_run_pass_through(&self) -> Result<f64> {
        let [beta_a, beta_b] = self.leading_vector;
        if beta_b.abs() <= 1e-12 || !beta_a.is_finite() {
            return Err(SpilloverError::NonConvergent(
                "cointegrating vector cannot be normalised on the dependent rate".to_string(),
            ));
        }
        Ok(-beta_a / beta_b)
    }
}

/// Rank test over a two-rate level series. Implementations are interchangeable
/// as long as they agree on what "rank" means.
pub trait CointegrationTest: Send + Sync {
    fn rank(&self, levels: &[[f64; 2]], k_ar_diff: usize) -> Result<CointegrationResult>;
}

#[derive(Debug, Clone, Copy)]
pub struct JohansenTrace {
    pub significance: f64,
}

impl Default for JohansenTrace {
    fn default() -> Self {
        Self { significance: 0.05 }
    }
}

impl JohansenTrace {
    pub fn new(significance: f64) -> Self {
        Self { significance }
    }

    fn critical_column(&self) -> Result<usize> {
        SUPPORTED_LEVELS
            .iter()
            .position(|lvl| (self.significance - lvl).abs() < 1e-12)
            .ok_or_else(|| {
                SpilloverError::Config(format!(
                    "no trace critical values for significance {}",
                    self.significance
                ))
            })
    }
}

impl CointegrationTest for JohansenTrace {
    fn rank(&self, levels: &[[f64; 2]], k_ar_diff: usize) -> Result<CointegrationResult> {
        let column = self.critical_column()?;
        let n = levels.len();
        let required = 3 * k_ar_diff + 10;
        if n < required {
            return Err(SpilloverError::InsufficientObservations {
                observations: n,
                required,
            });
        }

        let delta = |t: usize, j: usize| levels[t][j] - levels[t - 1][j];
        let mut z_rows = Vec::new();
        let mut dy_rows = Vec::new();
        let mut ly_rows = Vec::new();
        for t in (k_ar_diff + 1)..n {
            let mut z = Vec::with_capacity(1 + 2 * k_ar_diff);
            z.push(1.0);
            for lag in 1..=k_ar_diff {
                z.push(delta(t - lag, 0));
                z.push(delta(t - lag, 1));
            }
            z_rows.push(z);
            dy_rows.push(vec![delta(t, 0), delta(t, 1)]);
            ly_rows.push(vec![levels[t - 1][0], levels[t - 1][1]]);
        }
        let t_eff = z_rows.len() as f64;
        let z = matrix_from_rows(&z_rows);
        let r0 = ols(&z, &matrix_from_rows(&dy_rows))?.residuals;
        let r1 = ols(&z, &matrix_from_rows(&ly_rows))?.residuals;

        let s00 = r0.transpose() * &r0 / t_eff;
        let s11 = r1.transpose() * &r1 / t_eff;
        let s01 = r0.transpose() * &r1 / t_eff;
        let s10 = s01.transpose();

        let s00_inv = s00.try_inverse().ok_or_else(|| {
            SpilloverError::NonConvergent("S00 moment matrix is singular".to_string())
        })?;
        let l = s11
            .cholesky()
            .ok_or_else(|| {
                SpilloverError::NonConvergent("S11 moment matrix is not positive definite".to_string())
            })?
            .l();
        let l_inv = l.try_inverse().ok_or_else(|| {
            SpilloverError::NonConvergent("S11 Cholesky factor is singular".to_string())
        })?;
        let m = &l_inv * &s10 * &s00_inv * &s01 * l_inv.transpose();
        let sym = (&m + m.transpose()) * 0.5;
        let eig = SymmetricEigen::new(sym);

        let mut order: Vec<usize> = (0..eig.eigenvalues.len()).collect();
        order.sort_by(|&a, &b| {
            eig.eigenvalues[b]
                .partial_cmp(&eig.eigenvalues[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let eigenvalues: Vec<f64> = order
            .iter()
            .map(|&i| eig.eigenvalues[i].clamp(0.0, 1.0 - 1e-12))
            .collect();
        if eigenvalues.iter().any(|v| !v.is_finite()) {
            return Err(SpilloverError::NonConvergent(
                "Johansen eigenvalues are not finite".to_string(),
            ));
        }

        let v = eig.eigenvectors.column(order[0]).into_owned();
        let beta = l_inv.transpose() * v;
        let leading_vector = [beta[0], beta[1]];

        let mut trace_statistics = Vec::with_capacity(2);
        let mut critical_values = Vec::with_capacity(2);
        let mut rank = 2;
        for r0 in 0..2 {
            let stat = -t_eff
                * eigenvalues[r0..]
                    .iter()
                    .map(|lambda| (1.0 - lambda).ln())
                    .sum::<f64>();
            let crit = TRACE_CRITICAL[1 - r0][column];
            trace_statistics.push(stat);
            critical_values.push(crit);
            if rank == 2 && stat < crit {
                rank = r0;
            }
        }

        tracing::debug!(
            rank,
            trace_r0 = trace_statistics[0],
            trace_r1 = trace_statistics[1],
            k_ar_diff,
            "Johansen trace test"
        );

        Ok(CointegrationResult {
            rank,
            trace_statistics,
            critical_values,
            eigenvalues,
            leading_vector,
        })
    }
}
