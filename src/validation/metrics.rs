use serde::{Deserialize, Serialize};

use crate::model::{FoldOutcome, ScoredPoint};

pub const R2_MIN_SAMPLES: usize = 3;

/// Root mean squared error; `None` for an empty input.
pub fn rmse<I: IntoIterator<Item = f64>>(errors: I) -> Option<f64> {
    let (sum, n) = errors
        .into_iter()
        .fold((0.0, 0usize), |(s, n), e| (s + e * e, n + 1));
    (n > 0).then(|| (sum / n as f64).sqrt())
}

/// Realised-vs-predicted pairs with the usual accuracy summaries.
#[derive(Debug, Clone, Default)]
pub struct ForecastMetrics {
    pairs: Vec<(f64, f64)>,
}

impl ForecastMetrics {
    pub fn observe(&mut self, y_real: f64, y_pred: f64) {
        if !y_real.is_finite() || !y_pred.is_finite() {
            return;
        }
        self.pairs.push((y_real, y_pred));
    }

    pub fn sample_count(&self) -> usize {
        self.pairs.len()
    }

    pub fn rmse(&self) -> Option<f64> {
        rmse(self.pairs.iter().map(|(y, yhat)| y - yhat))
    }

    pub fn mae(&self) -> Option<f64> {
        let n = self.pairs.len();
        if n == 0 {
            return None;
        }
        let sum_abs = self
            .pairs
            .iter()
            .map(|(y, yhat)| (y - yhat).abs())
            .sum::<f64>();
        Some(sum_abs / n as f64)
    }

    pub fn r2(&self) -> Option<f64> {
        let n = self.pairs.len();
        if n < R2_MIN_SAMPLES {
            return None;
        }
        let mean_y = self.pairs.iter().map(|(y, _)| *y).sum::<f64>() / n as f64;
        let mut sse = 0.0;
        let mut sst = 0.0;
        for (y, yhat) in &self.pairs {
            let err = y - yhat;
            sse += err * err;
            let d = y - mean_y;
            sst += d * d;
        }
        if sst <= 1e-18 {
            return Some(0.0);
        }
        Some(1.0 - sse / sst)
    }
}

/// Error metrics pooled over every scored point of every successful fold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PooledMetrics {
    pub rmse: f64,
    pub r2: f64,
    pub baseline_rmse: f64,
    pub points: usize,
}

impl PooledMetrics {
    pub fn from_outcomes(outcomes: &[FoldOutcome]) -> Option<Self> {
        let mut model = ForecastMetrics::default();
        let mut baseline = ForecastMetrics::default();
        for p in outcomes.iter().flat_map(|o| &o.points) {
            model.observe(p.realized, p.predicted);
            baseline.observe(p.realized, p.baseline);
        }
        Some(Self {
            rmse: model.rmse()?,
            r2: model.r2().unwrap_or(0.0),
            baseline_rmse: baseline.rmse()?,
            points: model.sample_count(),
        })
    }
}

pub fn pooled_points(outcomes: &[FoldOutcome]) -> Vec<ScoredPoint> {
    outcomes.iter().flat_map(|o| o.points.iter().copied()).collect()
}
