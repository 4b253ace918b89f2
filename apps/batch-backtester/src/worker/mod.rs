//! Worker boundary: isolated simulation execution contexts.
//!
//! The orchestrator never looks inside a worker. It drives the lifecycle
//! (`connect`/`start`/`suspend`/`disconnect`) and consumes the progress and
//! state events the worker posts onto the run's event channel. A worker that
//! fails internally is still expected to reach [`WorkerState::Stopped`] so
//! the run does not hang.

mod scripted;

pub use scripted::{
    NamedStrategy, ScriptedWorker, ScriptedWorkerFactory, WorkerScript, demo_reference_data,
    demo_storage,
};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::orchestrator::SlotCaches;
use crate::params::{EmulationSettings, StorageBinding, TimeWindow};

/// Identity of one worker within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(Uuid);

impl WorkerId {
    /// Allocate a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Created but not yet connected.
    Created,
    /// Connected to its data session, not yet running.
    Connected,
    /// Replaying data and driving its strategy.
    Running,
    /// Paused by a run-level suspend.
    Suspended,
    /// Terminal state; the worker emits nothing further.
    Stopped,
}

impl WorkerState {
    /// Whether the state counts as active or transitional for a run-level
    /// stop (everything short of terminal).
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

/// Event a worker posts onto the run's ordering channel.
#[derive(Debug, Clone, Copy)]
pub enum WorkerEvent {
    /// The worker advanced to a new native progress step.
    Progress {
        /// Reporting worker.
        worker: WorkerId,
        /// New step in percent (0-100).
        percent: u8,
    },
    /// The worker changed lifecycle state.
    StateChanged {
        /// Reporting worker.
        worker: WorkerId,
        /// New state.
        state: WorkerState,
    },
}

/// Sender half handed to every worker at creation.
pub type WorkerEventSender = mpsc::UnboundedSender<WorkerEvent>;

/// Worker-level failures surfaced by lifecycle calls.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Lifecycle call is invalid in the worker's current state.
    #[error("invalid worker transition from {state:?} via {operation}")]
    InvalidTransition {
        /// State the worker was in.
        state: WorkerState,
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// The underlying data session failed.
    #[error("worker session error: {message}")]
    Session {
        /// Error details.
        message: String,
    },
}

/// One isolated simulation execution context bound to one strategy.
///
/// Implementations must emit [`WorkerState::Stopped`] through their event
/// sender exactly once, whether the replay finishes, fails, or is
/// disconnected mid-flight.
#[async_trait]
pub trait SimulationWorker: Send + Sync {
    /// Identity of this worker.
    fn id(&self) -> WorkerId;

    /// Current lifecycle state.
    fn state(&self) -> WorkerState;

    /// Open the worker's data session.
    async fn connect(&self) -> Result<(), WorkerError>;

    /// Begin (or resume) replaying data and driving the strategy.
    async fn start(&self) -> Result<(), WorkerError>;

    /// Pause replay; a subsequent `start` resumes it.
    async fn suspend(&self) -> Result<(), WorkerError>;

    /// Tear the session down, driving the worker toward `Stopped`.
    async fn disconnect(&self) -> Result<(), WorkerError>;
}

/// A strategy instance to be simulated once.
pub trait Strategy: Send + Sync {
    /// Stable identifier used in progress notifications.
    fn id(&self) -> &str;

    /// Clear state left over from any previous run.
    fn reset(&self);

    /// Arm the strategy against its execution context.
    fn start(&self);
}

/// Security/instrument reference data source.
pub trait SecurityProvider: Send + Sync {}

/// Portfolio/account reference data source.
pub trait PortfolioProvider: Send + Sync {}

/// Exchange and trading-calendar reference data source.
pub trait ExchangeInfoProvider: Send + Sync {}

/// Reference data injected at orchestrator construction, immutable for its
/// lifetime, and passed through to every worker untouched.
#[derive(Clone)]
pub struct ReferenceData {
    /// Instrument lookup.
    pub securities: Arc<dyn SecurityProvider>,
    /// Account lookup.
    pub portfolios: Arc<dyn PortfolioProvider>,
    /// Exchange boards and calendars.
    pub exchanges: Arc<dyn ExchangeInfoProvider>,
}

impl fmt::Debug for ReferenceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceData").finish_non_exhaustive()
    }
}

/// Everything a factory needs to build one worker.
pub struct WorkerSpec {
    /// Slot position within the batch (0-based).
    pub slot: usize,
    /// Replay window for the run.
    pub window: TimeWindow,
    /// Storage pass-through configuration.
    pub storage: StorageBinding,
    /// Private snapshot of the emulation parameters.
    pub emulation: EmulationSettings,
    /// Cache pair owned by the slot.
    pub caches: SlotCaches,
    /// Strategy bound as the worker's execution context.
    pub strategy: Arc<dyn Strategy>,
    /// Reference data set.
    pub reference: ReferenceData,
}

impl fmt::Debug for WorkerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerSpec")
            .field("slot", &self.slot)
            .field("window", &self.window)
            .field("strategy", &self.strategy.id())
            .finish_non_exhaustive()
    }
}

/// Builds workers, one per job, at batch launch.
pub trait WorkerFactory: Send + Sync {
    /// Create a worker for `spec`, reporting through `events`.
    fn create(&self, spec: WorkerSpec, events: WorkerEventSender) -> Arc<dyn SimulationWorker>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_uniqueness() {
        let a = WorkerId::new();
        let b = WorkerId::new();

        assert_ne!(a, b);
    }

    #[test]
    fn test_worker_state_activity() {
        assert!(WorkerState::Created.is_active());
        assert!(WorkerState::Connected.is_active());
        assert!(WorkerState::Running.is_active());
        assert!(WorkerState::Suspended.is_active());
        assert!(!WorkerState::Stopped.is_active());
    }
}
