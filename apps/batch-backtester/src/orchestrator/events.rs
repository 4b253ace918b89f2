//! Observable surface of the orchestrator.
//!
//! All notifications are fire-and-forget with no acknowledgment; publishing
//! with no subscriber attached is not an error.

use std::time::Duration;

use tokio::sync::broadcast;

use super::state::RunState;

/// Notifications emitted during a run.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// The run's lifecycle state changed.
    RunStateChanged {
        /// State before the transition.
        previous: RunState,
        /// State after the transition.
        current: RunState,
    },

    /// Whole-run progress advanced (strictly increasing, never repeated).
    TotalProgress {
        /// Overall completion percentage.
        percent: u64,
        /// Wall-clock time since run start.
        elapsed: Duration,
        /// Extrapolated total run duration.
        estimated_total: Duration,
    },

    /// A single job reported a native progress step, or its terminal 100.
    StrategyProgress {
        /// Strategy identifier of the job.
        strategy: String,
        /// Step in percent (0-100).
        percent: u8,
    },
}

/// Broadcast hub for orchestrator events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    /// Create a hub with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to the event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }

    /// Publish an event, ignoring the no-subscriber case.
    pub fn publish(&self, event: OrchestratorEvent) {
        let _ = self.tx.send(event);
    }
}
