//! Structured logging for run-level events.
//!
//! Typed, serializable event records with thin helpers over `tracing`, so
//! log consumers see consistent fields for every run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A run was accepted and sized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStartedEvent {
    /// Jobs scheduled after truncation.
    pub jobs_scheduled: usize,
    /// Total batches the run will execute.
    pub total_batches: usize,
    /// Workers launched concurrently per batch.
    pub batch_size: usize,
    /// Replay window start.
    pub window_start: DateTime<Utc>,
    /// Replay window stop.
    pub window_stop: DateTime<Utc>,
}

/// A batch's workers were constructed and started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchLaunchedEvent {
    /// 0-based batch index.
    pub batch_index: usize,
    /// Jobs in this batch.
    pub batch_jobs: usize,
    /// Jobs still waiting in later batches.
    pub remaining_jobs: usize,
}

/// A run reached its terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCompletedEvent {
    /// Batches actually launched.
    pub batches_run: usize,
    /// Whether the run ended via cancellation rather than exhaustion.
    pub cancelled: bool,
    /// Wall-clock duration of the run in milliseconds.
    pub duration_ms: u64,
}

/// Log a run start.
pub fn log_run_started(event: &RunStartedEvent) {
    info!(
        jobs = event.jobs_scheduled,
        batches = event.total_batches,
        batch_size = event.batch_size,
        window_start = %event.window_start,
        window_stop = %event.window_stop,
        "Run started"
    );
}

/// Log a batch launch.
pub fn log_batch_launched(event: &BatchLaunchedEvent) {
    info!(
        batch = event.batch_index,
        jobs = event.batch_jobs,
        remaining = event.remaining_jobs,
        "Batch launched"
    );
}

/// Log run completion.
pub fn log_run_completed(event: &RunCompletedEvent) {
    info!(
        batches = event.batches_run,
        cancelled = event.cancelled,
        duration_ms = event.duration_ms,
        "Run completed"
    );
}
