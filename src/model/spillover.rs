use serde::{Deserialize, Serialize};

/// Spillover over the step ending at observation `index`: Δrate_b / Δrate_a.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpilloverPoint {
    pub timestamp_ms: i64,
    pub index: usize,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpilloverSeries {
    pub points: Vec<SpilloverPoint>,
    /// Step end timestamps dropped because Δrate_a was within epsilon.
    pub excluded_timestamps: Vec<i64>,
    pub total_steps: usize,
}

impl SpilloverSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn excluded(&self) -> usize {
        self.excluded_timestamps.len()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        Some(self.points.iter().map(|p| p.value).sum::<f64>() / self.points.len() as f64)
    }
}
