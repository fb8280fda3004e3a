use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

use crate::bootstrap::replicate_seed;
use crate::certification::ForecastComparison;
use crate::config::StudyConfig;
use crate::error::{Result, SpilloverError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StudyPoint {
    pub effect_size: f64,
    pub rejection_rate: f64,
    pub mean_statistic: f64,
    pub replications: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyReport {
    pub sample_size: usize,
    pub ar_coefficient: f64,
    pub significance: f64,
    pub points: Vec<StudyPoint>,
}

impl StudyReport {
    /// Rejection rate under the null, if the sweep included effect 0.
    pub fn size(&self) -> Option<f64> {
        self.points
            .iter()
            .find(|p| p.effect_size == 0.0)
            .map(|p| p.rejection_rate)
    }
}

/// Rejection frequency of `comparison` on simulated loss differentials
/// `d_t = effect + u_t`, `u_t = φ·u_{t-1} + √(1-φ²)·ε_t`, with unit-variance `u`.
pub fn run_study(cfg: &StudyConfig, comparison: &dyn ForecastComparison) -> Result<StudyReport> {
    let phi = cfg.ar_coefficient;
    let innovation = Normal::new(0.0, (1.0 - phi * phi).sqrt())
        .map_err(|e| SpilloverError::Config(format!("study innovation distribution: {e}")))?;
    let stationary = Normal::new(0.0, 1.0)
        .map_err(|e| SpilloverError::Config(format!("study initial distribution: {e}")))?;

    let mut points = Vec::with_capacity(cfg.effect_sizes.len());
    for (e_idx, &effect) in cfg.effect_sizes.iter().enumerate() {
        let outcomes: Vec<Result<(bool, f64)>> = (0..cfg.replications)
            .into_par_iter()
            .map(|r| {
                let index = (e_idx * cfg.replications + r) as u64;
                let mut rng = StdRng::seed_from_u64(replicate_seed(cfg.seed, index));
                let mut u = stationary.sample(&mut rng);
                let model_losses = vec![1.0; cfg.sample_size];
                let baseline_losses: Vec<f64> = (0..cfg.sample_size)
                    .map(|_| {
                        let loss = 1.0 + effect + u;
                        u = phi * u + innovation.sample(&mut rng);
                        loss
                    })
                    .collect();
                let out = comparison.compare(&model_losses, &baseline_losses)?;
                Ok((out.p_value < cfg.significance, out.statistic))
            })
            .collect();
        let outcomes = outcomes.into_iter().collect::<Result<Vec<_>>>()?;
        let n = outcomes.len().max(1) as f64;
        let rejections = outcomes.iter().filter(|(reject, _)| *reject).count();
        let point = StudyPoint {
            effect_size: effect,
            rejection_rate: rejections as f64 / n,
            mean_statistic: outcomes.iter().map(|(_, s)| s).sum::<f64>() / n,
            replications: outcomes.len(),
        };
        tracing::info!(
            effect = point.effect_size,
            rejection_rate = point.rejection_rate,
            "study point done"
        );
        points.push(point);
    }
    Ok(StudyReport {
        sample_size: cfg.sample_size,
        ar_coefficient: phi,
        significance: cfg.significance,
        points,
    })
}
