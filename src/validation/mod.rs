pub mod folds;
pub mod metrics;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{Config, LinearConfig, PredictorConfig, ValidationConfig};
use crate::error::{Result, SpilloverError};
use crate::linear::{fit_linear, LinearModelState};
use crate::model::{ExcludedFold, FoldOutcome, RateObservation, RatePair, ScoredPoint, ValidationFold};
use crate::predictor::HybridModel;
use crate::transform::transform;

pub use folds::rolling_schedule;
pub use metrics::{ForecastMetrics, PooledMetrics};

/// What the hybrid is compared against on every test step.
#[derive(Debug, Clone, Copy, Default)]
pub enum BaselineSpec {
    /// The hybrid's own linear component.
    #[default]
    LinearOnly,
    /// A separately fitted linear model, fitted per fold on the same train window.
    Linear(LinearConfig),
}

/// Cooperative cancellation, checked at fold boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CvState {
    Init,
    FitTrain(usize),
    ScoreTest(usize),
    Aggregate,
    Done,
}

#[derive(Debug, Clone)]
pub struct CvRun {
    pub folds: Vec<FoldOutcome>,
    pub excluded: Vec<ExcludedFold>,
    pub pooled: PooledMetrics,
    pub production: Option<HybridModel>,
    pub trace: Vec<CvState>,
}

impl CvRun {
    pub fn pooled_points(&self) -> Vec<ScoredPoint> {
        metrics::pooled_points(&self.folds)
    }
}

#[derive(Debug, Clone)]
pub struct CrossValidator {
    predictor: PredictorConfig,
    validation: ValidationConfig,
    baseline: BaselineSpec,
    cancel: CancelToken,
}

impl CrossValidator {
    pub fn new(cfg: &Config) -> Self {
        Self::from_parts(cfg.predictor(), cfg.validation)
    }

    pub fn from_parts(predictor: PredictorConfig, validation: ValidationConfig) -> Self {
        Self {
            predictor,
            validation,
            baseline: BaselineSpec::LinearOnly,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_baseline(mut self, baseline: BaselineSpec) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn schedule(&self, n: usize) -> Result<Vec<ValidationFold>> {
        rolling_schedule(n, &self.validation)
    }

    pub fn run(&self, pair: &RatePair) -> Result<CvRun> {
        let mut trace = vec![CvState::Init];
        transform(pair, &self.predictor.transform)?;
        let schedule = self.schedule(pair.len())?;
        tracing::info!(
            observations = pair.len(),
            folds = schedule.len(),
            parallel = self.validation.parallel,
            "cross-validation started"
        );

        let results: Vec<(ValidationFold, Result<FoldOutcome>)> = if self.validation.parallel {
            schedule
                .into_par_iter()
                .map(|fold| {
                    let res = self.run_fold(pair, &fold);
                    (fold, res)
                })
                .collect()
        } else {
            run_until_fatal(schedule, |fold| self.run_fold(pair, fold))
        };

        let mut outcomes = Vec::new();
        let mut excluded = Vec::new();
        for (fold, res) in results {
            trace.push(CvState::FitTrain(fold.fold_index));
            match res {
                Ok(outcome) => {
                    trace.push(CvState::ScoreTest(fold.fold_index));
                    outcomes.push(outcome);
                }
                Err(e) if e.is_fold_local() => {
                    tracing::warn!(fold = fold.fold_index, error = %e, "fold excluded");
                    excluded.push(ExcludedFold {
                        fold_index: fold.fold_index,
                        error_kind: e.kind().as_str().to_string(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        if outcomes.len() < self.validation.min_successful_folds {
            return Err(SpilloverError::InsufficientFolds {
                succeeded: outcomes.len(),
                required: self.validation.min_successful_folds,
            });
        }

        trace.push(CvState::Aggregate);
        let pooled = PooledMetrics::from_outcomes(&outcomes).ok_or(SpilloverError::InsufficientFolds {
            succeeded: 0,
            required: self.validation.min_successful_folds,
        })?;

        let production = if self.validation.fit_production {
            if self.cancel.is_cancelled() {
                return Err(SpilloverError::Cancelled {
                    next_fold: outcomes.len() + excluded.len(),
                });
            }
            let obs = pair.observations();
            let start = obs.len().saturating_sub(self.validation.train_window);
            Some(HybridModel::fit(&obs[start..], &self.predictor)?)
        } else {
            None
        };
        trace.push(CvState::Done);

        tracing::info!(
            succeeded = outcomes.len(),
            excluded = excluded.len(),
            rmse = pooled.rmse,
            baseline_rmse = pooled.baseline_rmse,
            points = pooled.points,
            "cross-validation complete"
        );
        Ok(CvRun {
            folds: outcomes,
            excluded,
            pooled,
            production,
            trace,
        })
    }

    fn run_fold(&self, pair: &RatePair, fold: &ValidationFold) -> Result<FoldOutcome> {
        if self.cancel.is_cancelled() {
            return Err(SpilloverError::Cancelled {
                next_fold: fold.fold_index,
            });
        }
        let i = fold.fold_index;
        tracing::debug!(fold = i, state = ?CvState::FitTrain(i), train = ?fold.train_range);
        let train: &[RateObservation] = pair.window(fold.train_range.clone());
        let model = HybridModel::fit(train, &self.predictor)?;
        let baseline_model: Option<LinearModelState> = match &self.baseline {
            BaselineSpec::LinearOnly => None,
            BaselineSpec::Linear(cfg) => {
                let levels: Vec<[f64; 2]> = train.iter().map(RateObservation::levels).collect();
                Some(fit_linear(&levels, cfg)?)
            }
        };

        tracing::debug!(fold = i, state = ?CvState::ScoreTest(i), test = ?fold.test_range);
        let obs = pair.observations();
        let levels: Vec<[f64; 2]> = obs[..fold.test_range.end]
            .iter()
            .map(RateObservation::levels)
            .collect();
        let epsilon = self.predictor.transform.epsilon;
        let mut points = Vec::with_capacity(fold.test_range.len());
        let mut skipped_points = 0;
        for t in fold.test_range.clone() {
            let history = &levels[fold.train_range.start..t];
            let prev = levels[t - 1];
            let d_a = levels[t][0] - prev[0];
            if d_a.abs() <= epsilon {
                skipped_points += 1;
                continue;
            }
            let realized = (levels[t][1] - prev[1]) / d_a;
            let prediction = model.predict_step(history, levels[t][0])?;
            let baseline = match &baseline_model {
                None => prediction.linear_component,
                Some(m) => m.spillover(history, d_a).ok_or(
                    SpilloverError::InsufficientObservations {
                        observations: history.len(),
                        required: m.min_history(),
                    },
                )?,
            };
            points.push(ScoredPoint {
                timestamp_ms: obs[t].timestamp_ms,
                realized,
                predicted: prediction.point_estimate,
                baseline,
                linear_component: prediction.linear_component,
                correction_component: prediction.correction_component,
                is_outlier: prediction.is_outlier,
                high_uncertainty: prediction.high_uncertainty,
            });
        }
        if points.is_empty() {
            return Err(SpilloverError::InsufficientObservations {
                observations: 0,
                required: 1,
            });
        }

        let linear = model.linear();
        let outcome = FoldOutcome {
            fold: fold.clone(),
            form: linear.form(),
            lag_order: linear.lag_order(),
            points,
            skipped_points,
            pass_through: linear.pass_through(),
            long_run_pass_through: linear.long_run_pass_through(),
            error_correction_speed: linear.error_correction_speed(),
            corrector_fallback: model.fallback_reason().map(str::to_string),
        };
        tracing::debug!(
            fold = i,
            form = outcome.form.as_str(),
            lag_order = outcome.lag_order,
            rmse = outcome.rmse().unwrap_or(f64::NAN),
            skipped = skipped_points,
            "fold scored"
        );
        Ok(outcome)
    }
}

/// Runs folds in order, stopping after the first error that would abort the run.
fn run_until_fatal<F>(
    schedule: Vec<ValidationFold>,
    mut run_fold: F,
) -> Vec<(ValidationFold, Result<FoldOutcome>)>
where
    F: FnMut(&ValidationFold) -> Result<FoldOutcome>,
{
    let mut out = Vec::with_capacity(schedule.len());
    for fold in schedule {
        let res = run_fold(&fold);
        let fatal = matches!(&res, Err(e) if !e.is_fold_local());
        out.push((fold, res));
        if fatal {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> Vec<ValidationFold> {
        rolling_schedule(400, &ValidationConfig::default()).unwrap()
    }

    #[test]
    fn sequential_folds_stop_at_the_first_fatal_error() {
        let mut calls = 0;
        let out = run_until_fatal(schedule(), |fold| {
            calls += 1;
            Err(if fold.fold_index == 1 {
                SpilloverError::InvalidInput("bad fold".to_string())
            } else {
                SpilloverError::NonConvergent("singular".to_string())
            })
        });
        assert_eq!(calls, 2);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[1].1, Err(SpilloverError::InvalidInput(_))));
    }

    #[test]
    fn fold_local_errors_do_not_stop_the_run() {
        let mut calls = 0;
        let out = run_until_fatal(schedule(), |_| {
            calls += 1;
            Err(SpilloverError::NonConvergent("singular".to_string()))
        });
        assert_eq!(calls, 5);
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn cancellation_stops_the_run() {
        let out = run_until_fatal(schedule(), |fold| {
            Err(SpilloverError::Cancelled {
                next_fold: fold.fold_index,
            })
        });
        assert_eq!(out.len(), 1);
    }
}
