//! Error types for the batch orchestrator.

use thiserror::Error;

use super::state::RunState;

/// Errors rejected synchronously from `start`, before any state transition
/// or worker creation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// No simulation jobs were supplied.
    #[error("no simulation jobs provided")]
    NoJobs,

    /// The requested iteration count must be positive.
    #[error("iteration count must be greater than zero")]
    InvalidIterationCount,

    /// The configured batch size must be positive.
    #[error("batch size must be greater than zero")]
    InvalidBatchSize,

    /// Run sizing resolved to zero batches.
    #[error("run resolves to zero batches (iterations {iterations}, batch size {batch_size})")]
    ZeroBatches {
        /// Effective iteration count after truncation.
        iterations: usize,
        /// Configured batch size.
        batch_size: usize,
    },

    /// A run is already in flight on this orchestrator.
    #[error("a run is already in flight (state {state:?})")]
    RunInProgress {
        /// Observed run state.
        state: RunState,
    },
}
