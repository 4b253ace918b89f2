//! Run sizing and replay-window settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::params::TimeWindow;

fn default_batch_size() -> usize {
    10
}

// 2024-01-01T00:00:00Z
fn default_start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_704_067_200, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

// 2025-01-01T00:00:00Z
fn default_stop() -> DateTime<Utc> {
    DateTime::from_timestamp(1_735_689_600, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Sizing and window settings for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    /// Workers launched concurrently per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Cap on scheduled simulations per run (0 = unbounded).
    #[serde(default)]
    pub max_iterations: usize,

    /// Inclusive replay start.
    #[serde(default = "default_start")]
    pub start_time: DateTime<Utc>,

    /// Exclusive replay stop.
    #[serde(default = "default_stop")]
    pub stop_time: DateTime<Utc>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_iterations: 0,
            start_time: default_start(),
            stop_time: default_stop(),
        }
    }
}

impl RunSettings {
    /// The replay window these settings describe.
    #[must_use]
    pub const fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start_time,
            stop: self.stop_time,
        }
    }
}
