use serde::{Deserialize, Serialize};

use crate::error::SpilloverError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyBand {
    pub lower: f64,
    pub upper: f64,
    pub confidence: f64,
}

impl UncertaintyBand {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub point_estimate: f64,
    /// Half-width of `band`.
    pub uncertainty: f64,
    pub band: UncertaintyBand,
    pub linear_component: f64,
    pub correction_component: f64,
    pub is_outlier: bool,
    pub high_uncertainty: bool,
    /// Point estimate fell outside the plausible range. Reported, never suppressed.
    pub out_of_bounds: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictRequest {
    #[serde(alias = "rate_a")]
    pub fed_rate: f64,
    #[serde(alias = "rate_b")]
    pub selic: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub spillover_prediction: f64,
    pub uncertainty: f64,
    pub var_component: f64,
    pub nn_component: f64,
    pub is_outlier: bool,
    pub high_uncertainty: bool,
}

impl From<&Prediction> for PredictResponse {
    fn from(p: &Prediction) -> Self {
        Self {
            spillover_prediction: p.point_estimate,
            uncertainty: p.uncertainty,
            var_component: p.linear_component,
            nn_component: p.correction_component,
            is_outlier: p.is_outlier,
            high_uncertainty: p.high_uncertainty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_kind: String,
    pub message: String,
}

impl From<&SpilloverError> for ErrorResponse {
    fn from(e: &SpilloverError) -> Self {
        Self {
            error_kind: e.kind().as_str().to_string(),
            message: e.to_string(),
        }
    }
}
