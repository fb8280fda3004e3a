use serde::{Deserialize, Serialize};

use crate::anomaly::IsolationForest;
use crate::bootstrap::{percentile, sort_finite};
use crate::config::{PredictorConfig, PredictorSettings};
use crate::corrector::CorrectorState;
use crate::error::{Result, SpilloverError};
use crate::linear::{classify, BaselineChoice, CointegrationTest, JohansenTrace, LinearModelState};
use crate::model::{Prediction, RateObservation, RatePair, UncertaintyBand};
use crate::transform::transform;

/// Linear baseline plus learned residual correction, with everything a query
/// needs retained from training: the conditioning tail, the anomaly detector
/// and the reference interval width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridModel {
    linear: LinearModelState,
    corrector: Option<CorrectorState>,
    fallback_reason: Option<String>,
    detector: IsolationForest,
    history: Vec<[f64; 2]>,
    mean_band_width: f64,
    epsilon: f64,
    settings: PredictorSettings,
}

impl HybridModel {
    pub fn fit(observations: &[RateObservation], cfg: &PredictorConfig) -> Result<Self> {
        Self::fit_with(observations, cfg, &JohansenTrace::new(cfg.linear.significance))
    }

    /// Fit with an explicit rank test.
    pub fn fit_with(
        observations: &[RateObservation],
        cfg: &PredictorConfig,
        test: &dyn CointegrationTest,
    ) -> Result<Self> {
        let pair = RatePair::new(observations.to_vec())?;
        transform(&pair, &cfg.transform)?;
        let levels: Vec<[f64; 2]> = observations.iter().map(RateObservation::levels).collect();
        let epsilon = cfg.transform.epsilon;

        let choice = classify(&levels, &cfg.linear, test)?;
        let linear = match choice {
            BaselineChoice::InsufficientData {
                observations,
                required,
            } => {
                return Err(SpilloverError::InsufficientObservations {
                    observations,
                    required,
                })
            }
            BaselineChoice::Stationary {
                differenced,
                lag_order,
                rank,
            } => {
                tracing::debug!(differenced, lag_order, rank, "no cointegration correction");
                LinearModelState::fit(&levels, &choice, &cfg.linear)?
            }
            BaselineChoice::Cointegrated {
                lag_order,
                long_run_pass_through,
                ..
            } => {
                tracing::debug!(lag_order, long_run_pass_through, "error-correction baseline");
                LinearModelState::fit(&levels, &choice, &cfg.linear)?
            }
        };

        let (corrector, fallback_reason) = if cfg.corrector.enabled {
            match CorrectorState::train(&linear, &levels, &cfg.corrector, epsilon) {
                Ok(c) => (Some(c), None),
                Err(e) => {
                    tracing::warn!(error = %e, "residual corrector unavailable, using linear-only predictions");
                    (None, Some(e.to_string()))
                }
            }
        } else {
            (None, Some("corrector disabled".to_string()))
        };

        let anomaly_rows: Vec<Vec<f64>> = levels
            .windows(2)
            .map(|w| anomaly_features(w[0], w[1][0]))
            .collect();
        let s = &cfg.settings;
        let detector = IsolationForest::fit(
            &anomaly_rows,
            s.anomaly_trees,
            s.anomaly_subsample,
            s.anomaly_contamination,
            s.anomaly_seed,
        )?;

        let mean_band_width = training_band_width(&linear, &levels, epsilon, s.confidence);
        let keep = s
            .history_tail
            .max(linear.min_history() + cfg.corrector.lag_window + 2)
            .min(levels.len());
        let history = levels[levels.len() - keep..].to_vec();

        Ok(Self {
            linear,
            corrector,
            fallback_reason,
            detector,
            history,
            mean_band_width,
            epsilon,
            settings: cfg.settings,
        })
    }

    /// Spillover of the dependent rate when the driving rate is newly set to
    /// `rate_a` while the dependent rate stands at `rate_b`.
    pub fn predict(&self, rate_a: f64, rate_b: f64) -> Result<Prediction> {
        if !rate_a.is_finite() || !rate_b.is_finite() {
            return Err(SpilloverError::InvalidInput(format!(
                "rates must be finite, got ({rate_a}, {rate_b})"
            )));
        }
        let mut history = self.history.clone();
        if let Some(last) = history.last_mut() {
            last[1] = rate_b;
        }
        self.predict_step(&history, rate_a)
    }

    /// Same computation against an explicit history whose last element is the
    /// state in force when the driving rate moves to `next_rate_a`.
    pub fn predict_step(&self, history: &[[f64; 2]], next_rate_a: f64) -> Result<Prediction> {
        let (d_a, last) = self.driving_move(history, next_rate_a)?;
        let linear_component = self.linear_component(history, d_a)?;
        let correction_component = match &self.corrector {
            Some(c) => c.correction(&self.linear, history, next_rate_a, self.epsilon)?,
            None => 0.0,
        };
        let point_estimate = linear_component + correction_component;

        let mut replicates = self.linear.replicate_spillovers(history, d_a);
        sort_finite(&mut replicates);
        let tail = (1.0 - self.settings.confidence) / 2.0;
        let lower = percentile(&replicates, tail).map_or(point_estimate, |v| v + correction_component);
        let upper =
            percentile(&replicates, 1.0 - tail).map_or(point_estimate, |v| v + correction_component);
        let band = UncertaintyBand {
            lower,
            upper,
            confidence: self.settings.confidence,
        };

        let is_outlier = self.detector.is_anomaly(&anomaly_features(last, next_rate_a));
        let high_uncertainty = self.mean_band_width > 0.0
            && band.width() > self.settings.high_uncertainty_multiple * self.mean_band_width;
        let out_of_bounds = point_estimate < self.settings.plausible_min
            || point_estimate > self.settings.plausible_max;
        if out_of_bounds {
            tracing::warn!(
                point_estimate,
                min = self.settings.plausible_min,
                max = self.settings.plausible_max,
                "prediction outside plausible spillover range"
            );
        }

        Ok(Prediction {
            point_estimate,
            uncertainty: band.width() / 2.0,
            band,
            linear_component,
            correction_component,
            is_outlier,
            high_uncertainty,
            out_of_bounds,
        })
    }

    /// Linear component alone, the baseline the corrector has to beat.
    pub fn predict_linear(&self, history: &[[f64; 2]], next_rate_a: f64) -> Result<f64> {
        let (d_a, _) = self.driving_move(history, next_rate_a)?;
        self.linear_component(history, d_a)
    }

    fn driving_move(&self, history: &[[f64; 2]], next_rate_a: f64) -> Result<(f64, [f64; 2])> {
        let last = *history
            .last()
            .ok_or_else(|| SpilloverError::InvalidInput("empty conditioning history".to_string()))?;
        let d_a = next_rate_a - last[0];
        if !d_a.is_finite() {
            return Err(SpilloverError::InvalidInput(format!(
                "non-finite driving move to {next_rate_a}"
            )));
        }
        if d_a.abs() <= self.epsilon {
            return Err(SpilloverError::DegenerateDenominator {
                excluded: 1,
                total: 1,
                max_fraction: 0.0,
            });
        }
        Ok((d_a, last))
    }

    fn linear_component(&self, history: &[[f64; 2]], d_a: f64) -> Result<f64> {
        self.linear
            .spillover(history, d_a)
            .ok_or(SpilloverError::InsufficientObservations {
                observations: history.len(),
                required: self.linear.min_history(),
            })
    }

    /// Checks that the corrector, if any, belongs to this linear state.
    pub fn validate(&self) -> Result<()> {
        if let Some(c) = &self.corrector {
            if !c.is_paired_with(&self.linear) {
                return Err(SpilloverError::InvalidInput(
                    "corrector was trained against a different linear state".to_string(),
                ));
            }
        }
        if self.history.len() < self.linear.min_history() {
            return Err(SpilloverError::InsufficientObservations {
                observations: self.history.len(),
                required: self.linear.min_history(),
            });
        }
        Ok(())
    }

    pub fn linear(&self) -> &LinearModelState {
        &self.linear
    }

    pub fn corrector(&self) -> Option<&CorrectorState> {
        self.corrector.as_ref()
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        self.fallback_reason.as_deref()
    }

    pub fn is_linear_only(&self) -> bool {
        self.corrector.is_none()
    }

    pub fn history(&self) -> &[[f64; 2]] {
        &self.history
    }

    pub fn mean_band_width(&self) -> f64 {
        self.mean_band_width
    }

    pub fn anomaly_detector(&self) -> &IsolationForest {
        &self.detector
    }
}

fn anomaly_features(last: [f64; 2], next_rate_a: f64) -> Vec<f64> {
    vec![next_rate_a, last[1], next_rate_a - last[0]]
}

/// Mean replicate interval width over the training steps with a usable move.
fn training_band_width(
    linear: &LinearModelState,
    levels: &[[f64; 2]],
    epsilon: f64,
    confidence: f64,
) -> f64 {
    let tail = (1.0 - confidence) / 2.0;
    let mut total = 0.0;
    let mut count = 0usize;
    for t in linear.min_history().saturating_sub(1)..levels.len().saturating_sub(1) {
        let d_a = levels[t + 1][0] - levels[t][0];
        if d_a.abs() <= epsilon {
            continue;
        }
        let mut reps = linear.replicate_spillovers(&levels[..=t], d_a);
        sort_finite(&mut reps);
        if let (Some(lo), Some(hi)) = (percentile(&reps, tail), percentile(&reps, 1.0 - tail)) {
            total += hi - lo;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}
