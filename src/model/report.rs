use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::model::fold::ExcludedFold;

/// Stable identifiers for the economic plausibility rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EconomicRule {
    MeanSpilloverOutOfRange,
    PersistentFullPassThrough,
    PredictionOutOfRangeShare,
    LongRunSignReversal,
    ErrorCorrectionDivergent,
}

impl EconomicRule {
    pub const ALL: [EconomicRule; 5] = [
        Self::MeanSpilloverOutOfRange,
        Self::PersistentFullPassThrough,
        Self::PredictionOutOfRangeShare,
        Self::LongRunSignReversal,
        Self::ErrorCorrectionDivergent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MeanSpilloverOutOfRange => "mean_spillover_out_of_range",
            Self::PersistentFullPassThrough => "persistent_full_pass_through",
            Self::PredictionOutOfRangeShare => "prediction_out_of_range_share",
            Self::LongRunSignReversal => "long_run_sign_reversal",
            Self::ErrorCorrectionDivergent => "error_correction_divergent",
        }
    }

    /// Rule violations are recorded, never raised.
    pub fn error_kind(self) -> ErrorKind {
        ErrorKind::AssertionViolation
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldSummary {
    pub fold_index: usize,
    pub points: usize,
    pub rmse: f64,
    pub mean_prediction: f64,
    pub pass_through: f64,
    pub corrector_fallback: bool,
}

/// Outcome of one full cross-validation run. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificationReport {
    pub rmse: f64,
    pub rmse_ci: (f64, f64),
    pub r_squared: f64,
    pub baseline_rmse: f64,
    pub dm_statistic: f64,
    pub dm_p_value: f64,
    pub improves_on_baseline: bool,
    pub economic_flags: Vec<EconomicRule>,
    pub stability_metric: f64,
    pub mean_spillover: f64,
    pub pooled_points: usize,
    pub folds: Vec<FoldSummary>,
    pub excluded_folds: Vec<ExcludedFold>,
}

impl CertificationReport {
    pub fn sanity_violations(&self) -> usize {
        self.economic_flags.len()
    }

    pub fn flag_ids(&self) -> Vec<&'static str> {
        self.economic_flags.iter().map(|r| r.as_str()).collect()
    }
}
