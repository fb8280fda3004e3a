pub mod dm;
pub mod sanity;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bootstrap::{block_indices, default_block_length, percentile, replicate_seed, sort_finite};
use crate::config::{CertificationConfig, GateConfig};
use crate::error::{Result, SpilloverError};
use crate::model::{CertificationReport, FoldSummary};
use crate::validation::metrics::rmse;
use crate::validation::CvRun;

pub use dm::{ComparisonOutcome, DieboldMariano, ForecastComparison};

/// Which per-fold quantity the stability metric disperses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityBasis {
    Rmse,
    MeanSpillover,
}

/// Sample coefficient of variation, with the mean floored away from zero.
pub fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(var.sqrt() / mean.abs().max(1e-12))
}

pub struct Certifier {
    cfg: CertificationConfig,
    comparison: Box<dyn ForecastComparison>,
}

impl Certifier {
    pub fn new(cfg: CertificationConfig) -> Self {
        Self {
            comparison: Box::new(DieboldMariano::from_config(&cfg)),
            cfg,
        }
    }

    pub fn with_comparison(mut self, comparison: Box<dyn ForecastComparison>) -> Self {
        self.comparison = comparison;
        self
    }

    /// Build the report for one cross-validation run. Deterministic for a
    /// fixed run and seed.
    pub fn certify(&self, run: &CvRun) -> Result<CertificationReport> {
        let points = run.pooled_points();
        let errors: Vec<f64> = points.iter().map(|p| p.error()).collect();
        let model_losses: Vec<f64> = errors.iter().map(|e| e * e).collect();
        let baseline_losses: Vec<f64> = points.iter().map(|p| p.baseline_error().powi(2)).collect();
        let comparison = self.comparison.compare(&model_losses, &baseline_losses)?;
        let rmse_ci = self.rmse_interval(&errors)?;

        let folds: Vec<FoldSummary> = run
            .folds
            .iter()
            .map(|o| FoldSummary {
                fold_index: o.fold.fold_index,
                points: o.points.len(),
                rmse: o.rmse().unwrap_or(0.0),
                mean_prediction: o.mean_prediction().unwrap_or(0.0),
                pass_through: o.pass_through,
                corrector_fallback: o.corrector_fallback.is_some(),
            })
            .collect();
        let basis: Vec<f64> = match self.cfg.stability_basis {
            StabilityBasis::Rmse => folds.iter().map(|f| f.rmse).collect(),
            StabilityBasis::MeanSpillover => folds.iter().map(|f| f.mean_prediction).collect(),
        };
        let stability_metric = coefficient_of_variation(&basis).unwrap_or(0.0);
        let economic_flags = sanity::evaluate(&run.folds, &self.cfg);
        let mean_spillover = if points.is_empty() {
            0.0
        } else {
            points.iter().map(|p| p.predicted).sum::<f64>() / points.len() as f64
        };
        let improves_on_baseline =
            comparison.p_value < self.cfg.dm_significance && comparison.statistic > 0.0;

        tracing::info!(
            rmse = run.pooled.rmse,
            dm_statistic = comparison.statistic,
            dm_p_value = comparison.p_value,
            improves_on_baseline,
            stability = stability_metric,
            violations = economic_flags.len(),
            "certification report built"
        );
        Ok(CertificationReport {
            rmse: run.pooled.rmse,
            rmse_ci,
            r_squared: run.pooled.r2,
            baseline_rmse: run.pooled.baseline_rmse,
            dm_statistic: comparison.statistic,
            dm_p_value: comparison.p_value,
            improves_on_baseline,
            economic_flags,
            stability_metric,
            mean_spillover,
            pooled_points: points.len(),
            folds,
            excluded_folds: run.excluded.clone(),
        })
    }

    /// Percentile interval of RMSE over moving-block resamples of the pooled errors.
    fn rmse_interval(&self, errors: &[f64]) -> Result<(f64, f64)> {
        let point = rmse(errors.iter().copied()).ok_or_else(|| {
            SpilloverError::InvalidInput("no pooled errors to certify".to_string())
        })?;
        if self.cfg.bootstrap_resamples == 0 {
            return Ok((point, point));
        }
        let n = errors.len();
        let block_len = self.cfg.block_length.unwrap_or_else(|| default_block_length(n));
        let mut draws: Vec<f64> = (0..self.cfg.bootstrap_resamples)
            .into_par_iter()
            .filter_map(|i| {
                let mut rng = StdRng::seed_from_u64(replicate_seed(self.cfg.seed, i as u64));
                rmse(block_indices(n, block_len, &mut rng).into_iter().map(|k| errors[k]))
            })
            .collect();
        sort_finite(&mut draws);
        let tail = (1.0 - self.cfg.bootstrap_confidence) / 2.0;
        let lower = percentile(&draws, tail).unwrap_or(point);
        let upper = percentile(&draws, 1.0 - tail).unwrap_or(point);
        Ok((lower, upper))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub approved: bool,
    pub reasons: Vec<String>,
}

/// Thresholds a certification report must clear before its model may serve.
#[derive(Debug, Clone, Copy)]
pub struct PromotionPolicy {
    gate: GateConfig,
}

impl From<GateConfig> for PromotionPolicy {
    fn from(gate: GateConfig) -> Self {
        Self { gate }
    }
}

impl PromotionPolicy {
    pub fn evaluate(&self, report: &CertificationReport) -> GateDecision {
        let g = &self.gate;
        let mut reasons = Vec::new();
        if !(report.rmse <= g.max_rmse) {
            reasons.push(format!("rmse {:.4} above ceiling {:.4}", report.rmse, g.max_rmse));
        }
        if !(report.dm_p_value < g.max_dm_p_value) || report.dm_statistic <= 0.0 {
            reasons.push(format!(
                "no significant improvement on baseline (dm {:.3}, p {:.4})",
                report.dm_statistic, report.dm_p_value
            ));
        }
        if report.sanity_violations() > g.max_sanity_violations {
            reasons.push(format!(
                "sanity violations [{}] exceed {}",
                report.flag_ids().join(", "),
                g.max_sanity_violations
            ));
        }
        if !(report.stability_metric <= g.max_stability) {
            reasons.push(format!(
                "stability {:.3} above {:.3}",
                report.stability_metric, g.max_stability
            ));
        }
        let approved = reasons.is_empty();
        if approved {
            tracing::info!("promotion gate approved");
        } else {
            tracing::warn!(reasons = ?reasons, "promotion gate rejected");
        }
        GateDecision { approved, reasons }
    }
}
