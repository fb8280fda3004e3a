use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::linear::BaselineForm;

/// Observation-index windows of one rolling fold. `train.end <= test.start` always.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFold {
    pub fold_index: usize,
    pub train_range: Range<usize>,
    pub test_range: Range<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub timestamp_ms: i64,
    pub realized: f64,
    pub predicted: f64,
    pub baseline: f64,
    pub linear_component: f64,
    pub correction_component: f64,
    pub is_outlier: bool,
    pub high_uncertainty: bool,
}

impl ScoredPoint {
    pub fn error(&self) -> f64 {
        self.realized - self.predicted
    }

    pub fn baseline_error(&self) -> f64 {
        self.realized - self.baseline
    }
}

/// Everything a successful fold hands to aggregation and certification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldOutcome {
    pub fold: ValidationFold,
    pub form: BaselineForm,
    pub lag_order: usize,
    pub points: Vec<ScoredPoint>,
    /// Test steps skipped because the realised Δrate_a was within epsilon.
    pub skipped_points: usize,
    pub pass_through: f64,
    pub long_run_pass_through: Option<f64>,
    pub error_correction_speed: Option<f64>,
    pub corrector_fallback: Option<String>,
}

impl FoldOutcome {
    pub fn rmse(&self) -> Option<f64> {
        crate::validation::metrics::rmse(self.points.iter().map(ScoredPoint::error))
    }

    pub fn mean_prediction(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        Some(self.points.iter().map(|p| p.predicted).sum::<f64>() / self.points.len() as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedFold {
    pub fold_index: usize,
    pub error_kind: String,
    pub reason: String,
}
