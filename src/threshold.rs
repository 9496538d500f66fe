//! Temperature to duty value mapping

use crate::errors::{FanControlError, Result};
use serde::{Deserialize, Serialize};

/// One half-open temperature interval `[min, max)` and its duty value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    pub min: i32,
    pub max: i32,
    pub duty: u8,
}

impl Threshold {
    pub fn new(min: i32, max: i32, duty: u8) -> Self {
        Self { min, max, duty }
    }

    pub fn contains(&self, temp: i32) -> bool {
        self.min <= temp && temp < self.max
    }
}

/// Ordered, contiguous, non-overlapping set of thresholds.
///
/// Only constructed through [`ThresholdTable::new`], so every table in the
/// program has passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdTable {
    intervals: Vec<Threshold>,
}

impl ThresholdTable {
    /// Build a table, rejecting empty, inverted, unordered or gapped intervals
    pub fn new(intervals: Vec<Threshold>) -> Result<Self> {
        if intervals.is_empty() {
            return Err(FanControlError::Config(
                "threshold table must contain at least one interval".to_string(),
            ));
        }

        for (i, interval) in intervals.iter().enumerate() {
            if interval.min >= interval.max {
                return Err(FanControlError::Config(format!(
                    "threshold {} has min {} >= max {}",
                    i, interval.min, interval.max
                )));
            }
        }

        for pair in intervals.windows(2) {
            if pair[1].min != pair[0].max {
                return Err(FanControlError::Config(format!(
                    "thresholds [{}, {}) and [{}, {}) are not contiguous",
                    pair[0].min, pair[0].max, pair[1].min, pair[1].max
                )));
            }
        }

        Ok(Self { intervals })
    }

    /// The default table for HP ProLiant Gen8/Gen9 chassis
    pub fn standard() -> Self {
        Self {
            intervals: vec![
                Threshold::new(0, 55, 50),
                Threshold::new(55, 60, 70),
                Threshold::new(60, 65, 100),
                Threshold::new(65, 70, 150),
                Threshold::new(70, 100, 255),
            ],
        }
    }

    pub fn intervals(&self) -> &[Threshold] {
        &self.intervals
    }

    /// Duty value for a temperature, or 0 when no interval contains it
    pub fn duty_for(&self, temp: i32) -> u8 {
        // Intervals are sorted and contiguous, so the candidate is the last
        // one starting at or below `temp`.
        let idx = self.intervals.partition_point(|t| t.min <= temp);
        match idx.checked_sub(1).map(|i| &self.intervals[i]) {
            Some(interval) if interval.contains(temp) => interval.duty,
            _ => 0,
        }
    }
}
