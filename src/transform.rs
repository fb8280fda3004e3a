use crate::config::TransformConfig;
use crate::error::{Result, SpilloverError};
use crate::model::{RateObservation, RatePair, SpilloverPoint, SpilloverSeries};

/// Derive Δrate_b / Δrate_a for each consecutive pair of observations.
///
/// Steps whose driving move is within `epsilon` are excluded and listed, never
/// mapped to zero or infinity. Too many of them means the input is unusable.
pub fn transform(pair: &RatePair, cfg: &TransformConfig) -> Result<SpilloverSeries> {
    let series = spillover_steps(pair.observations(), cfg.epsilon);
    let excluded = series.excluded();
    if series.total_steps > 0
        && excluded as f64 / series.total_steps as f64 > cfg.max_degenerate_fraction
    {
        return Err(SpilloverError::DegenerateDenominator {
            excluded,
            total: series.total_steps,
            max_fraction: cfg.max_degenerate_fraction,
        });
    }
    Ok(series)
}

/// The derivation alone, without the degenerate-fraction ceiling.
pub fn spillover_steps(observations: &[RateObservation], epsilon: f64) -> SpilloverSeries {
    let mut points = Vec::with_capacity(observations.len().saturating_sub(1));
    let mut excluded_timestamps = Vec::new();
    for (i, w) in observations.windows(2).enumerate() {
        let d_a = w[1].rate_a - w[0].rate_a;
        let d_b = w[1].rate_b - w[0].rate_b;
        match spillover_ratio(d_a, d_b, epsilon) {
            Some(value) => points.push(SpilloverPoint {
                timestamp_ms: w[1].timestamp_ms,
                index: i + 1,
                value,
            }),
            None => excluded_timestamps.push(w[1].timestamp_ms),
        }
    }
    SpilloverSeries {
        points,
        excluded_timestamps,
        total_steps: observations.len().saturating_sub(1),
    }
}

pub fn spillover_ratio(d_a: f64, d_b: f64, epsilon: f64) -> Option<f64> {
    if !d_a.is_finite() || !d_b.is_finite() || d_a.abs() <= epsilon {
        return None;
    }
    Some(d_b / d_a)
}
