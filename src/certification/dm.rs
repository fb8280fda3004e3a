use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::config::CertificationConfig;
use crate::error::{Result, SpilloverError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComparisonOutcome {
    /// Positive when the model's losses are smaller than the baseline's.
    pub statistic: f64,
    pub p_value: f64,
    pub mean_differential: f64,
    pub n: usize,
}

/// Equal-predictive-accuracy test over two aligned loss series.
pub trait ForecastComparison: Send + Sync {
    fn compare(&self, model_losses: &[f64], baseline_losses: &[f64]) -> Result<ComparisonOutcome>;
}

/// Diebold-Mariano test with optional Harvey-Leybourne-Newbold small-sample
/// correction and a Student-t reference distribution.
#[derive(Debug, Clone, Copy)]
pub struct DieboldMariano {
    pub horizon: usize,
    pub harvey_correction: bool,
}

impl Default for DieboldMariano {
    fn default() -> Self {
        Self {
            horizon: 1,
            harvey_correction: true,
        }
    }
}

impl DieboldMariano {
    pub fn from_config(cfg: &CertificationConfig) -> Self {
        Self {
            horizon: cfg.dm_horizon.max(1),
            harvey_correction: cfg.harvey_correction,
        }
    }
}

impl ForecastComparison for DieboldMariano {
    fn compare(&self, model_losses: &[f64], baseline_losses: &[f64]) -> Result<ComparisonOutcome> {
        if model_losses.len() != baseline_losses.len() {
            return Err(SpilloverError::InvalidInput(format!(
                "loss series differ in length: {} vs {}",
                model_losses.len(),
                baseline_losses.len()
            )));
        }
        let n = model_losses.len();
        if n < 3 {
            return Err(SpilloverError::InvalidInput(format!(
                "need at least 3 paired losses, got {n}"
            )));
        }
        let d: Vec<f64> = baseline_losses
            .iter()
            .zip(model_losses)
            .map(|(b, m)| b - m)
            .collect();
        if d.iter().any(|v| !v.is_finite()) {
            return Err(SpilloverError::InvalidInput(
                "loss differential contains non-finite values".to_string(),
            ));
        }
        let t = n as f64;
        let mean = d.iter().sum::<f64>() / t;
        let autocov = |k: usize| {
            (k..n)
                .map(|i| (d[i] - mean) * (d[i - k] - mean))
                .sum::<f64>()
                / t
        };

        let h = self.horizon.max(1);
        let gamma0 = autocov(0);
        let mut lrv = gamma0;
        for k in 1..h.min(n) {
            lrv += 2.0 * (1.0 - k as f64 / h as f64) * autocov(k);
        }
        if lrv <= 0.0 {
            lrv = gamma0;
        }
        if !(lrv > f64::MIN_POSITIVE) {
            return Ok(ComparisonOutcome {
                statistic: 0.0,
                p_value: 1.0,
                mean_differential: mean,
                n,
            });
        }

        let mut statistic = mean / (lrv / t).sqrt();
        if self.harvey_correction {
            let hf = h as f64;
            let factor = (t + 1.0 - 2.0 * hf + hf * (hf - 1.0) / t) / t;
            statistic *= factor.max(0.0).sqrt();
        }
        let dist = StudentsT::new(0.0, 1.0, t - 1.0)
            .map_err(|e| SpilloverError::InvalidInput(format!("student-t reference: {e}")))?;
        let p_value = (2.0 * (1.0 - dist.cdf(statistic.abs()))).clamp(0.0, 1.0);
        Ok(ComparisonOutcome {
            statistic,
            p_value,
            mean_differential: mean,
            n,
        })
    }
}
