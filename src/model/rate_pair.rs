use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpilloverError};

/// One observation of the driving rate (`rate_a`) and the dependent rate (`rate_b`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateObservation {
    pub timestamp_ms: i64,
    pub rate_a: f64,
    pub rate_b: f64,
}

impl RateObservation {
    pub fn new(timestamp_ms: i64, rate_a: f64, rate_b: f64) -> Self {
        Self {
            timestamp_ms,
            rate_a,
            rate_b,
        }
    }

    pub fn levels(&self) -> [f64; 2] {
        [self.rate_a, self.rate_b]
    }
}

/// Time-ordered rate observations. Gap policy belongs to whoever supplies the data;
/// this type only guarantees strict ordering and finite values.
#[derive(Debug, Clone, PartialEq)]
pub struct RatePair {
    observations: Vec<RateObservation>,
}

impl RatePair {
    pub fn new(observations: Vec<RateObservation>) -> Result<Self> {
        if observations.len() < 2 {
            return Err(SpilloverError::InsufficientObservations {
                observations: observations.len(),
                required: 2,
            });
        }
        for (i, obs) in observations.iter().enumerate() {
            if !obs.rate_a.is_finite() || !obs.rate_b.is_finite() {
                return Err(SpilloverError::InvalidInput(format!(
                    "non-finite rate at index {} (timestamp {})",
                    i, obs.timestamp_ms
                )));
            }
        }
        if let Some(w) = observations
            .windows(2)
            .find(|w| w[1].timestamp_ms <= w[0].timestamp_ms)
        {
            return Err(SpilloverError::InvalidInput(format!(
                "timestamps must be strictly increasing: {} followed by {}",
                w[0].timestamp_ms, w[1].timestamp_ms
            )));
        }
        Ok(Self { observations })
    }

    pub fn observations(&self) -> &[RateObservation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn window(&self, range: Range<usize>) -> &[RateObservation] {
        &self.observations[range]
    }
}
