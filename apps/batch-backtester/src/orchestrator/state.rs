//! Run lifecycle state machine.
//!
//! The run's lifecycle is independent of any individual worker's lifecycle.
//! Legal edges:
//!
//! ```text
//! Stopped -> Starting -> Started -> {Suspending -> Suspended -> Starting -> Started}*
//!         -> Stopping -> Stopped
//! ```
//!
//! Transitions are serialized by the run-wide lock; reads go through a
//! lock-free atomic cell.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Lifecycle of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RunState {
    /// No run in flight.
    Stopped = 0,
    /// `start` accepted; first batch not yet running.
    Starting = 1,
    /// Batches are running.
    Started = 2,
    /// Suspend in progress.
    Suspending = 3,
    /// All active workers suspended.
    Suspended = 4,
    /// Finalizing after cancellation or exhaustion.
    Stopping = 5,
}

impl From<u8> for RunState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Started,
            3 => Self::Suspending,
            4 => Self::Suspended,
            5 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

impl RunState {
    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Stopped, Self::Starting)
                | (Self::Starting, Self::Started | Self::Stopping)
                | (Self::Started, Self::Suspending | Self::Stopping)
                | (Self::Suspending, Self::Suspended)
                | (Self::Suspended, Self::Starting | Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }
}

/// Lock-free cell holding the current [`RunState`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// New cell in `Stopped`.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU8::new(RunState::Stopped as u8))
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> RunState {
        RunState::from(self.0.load(Ordering::Acquire))
    }

    /// Store a new state.
    pub fn set(&self, state: RunState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
