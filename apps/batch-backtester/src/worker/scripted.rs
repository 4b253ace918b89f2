//! Scripted worker used by the demo binary and the test-suite.
//!
//! Replays a fixed progress trace on a background task instead of replaying
//! real market data, honoring suspend and disconnect between steps. This is
//! the in-crate stand-in for a full history-replay worker, the way an
//! in-memory data source stands in for a storage-backed one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use super::{
    ExchangeInfoProvider, PortfolioProvider, ReferenceData, SecurityProvider, SimulationWorker,
    Strategy, WorkerError, WorkerEvent, WorkerEventSender, WorkerFactory, WorkerId, WorkerSpec,
    WorkerState,
};
use crate::params::{StorageBinding, StorageDrive, StorageFormat, StorageRegistry};

/// Progress trace a scripted worker replays once started.
#[derive(Debug, Clone)]
pub struct WorkerScript {
    /// Progress steps to report, in order. A script ending below 100 models
    /// a worker whose native progress never reached completion.
    pub steps: Vec<u8>,
    /// Pause between steps.
    pub step_delay: Duration,
}

impl Default for WorkerScript {
    fn default() -> Self {
        Self {
            steps: vec![25, 50, 75, 100],
            step_delay: Duration::from_millis(5),
        }
    }
}

impl WorkerScript {
    /// Script with the given steps and a short fixed delay.
    #[must_use]
    pub fn with_steps(steps: Vec<u8>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }
}

/// In-process worker that replays a scripted progress trace.
pub struct ScriptedWorker {
    id: WorkerId,
    script: WorkerScript,
    events: WorkerEventSender,
    state: Arc<watch::Sender<WorkerState>>,
    stopped_emitted: Arc<AtomicBool>,
}

impl ScriptedWorker {
    /// Create a worker in the `Created` state.
    #[must_use]
    pub fn new(script: WorkerScript, events: WorkerEventSender) -> Self {
        let (state, _) = watch::channel(WorkerState::Created);
        Self {
            id: WorkerId::new(),
            script,
            events,
            state: Arc::new(state),
            stopped_emitted: Arc::new(AtomicBool::new(false)),
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
        let _ = self.events.send(WorkerEvent::StateChanged {
            worker: self.id,
            state,
        });
    }

    /// Emit the terminal state exactly once, from whichever path gets
    /// there first (script exhaustion or disconnect).
    fn emit_stopped(
        id: WorkerId,
        events: &WorkerEventSender,
        state: &watch::Sender<WorkerState>,
        stopped_emitted: &AtomicBool,
    ) {
        if stopped_emitted.swap(true, Ordering::AcqRel) {
            return;
        }
        state.send_replace(WorkerState::Stopped);
        let _ = events.send(WorkerEvent::StateChanged {
            worker: id,
            state: WorkerState::Stopped,
        });
    }

    fn spawn_drive(&self) {
        let id = self.id;
        let script = self.script.clone();
        let events = self.events.clone();
        let state = Arc::clone(&self.state);
        let stopped_emitted = Arc::clone(&self.stopped_emitted);

        tokio::spawn(async move {
            let mut rx = state.subscribe();

            for step in script.steps {
                // Hold between steps while suspended; bail out once stopped.
                loop {
                    let current = *rx.borrow();
                    match current {
                        WorkerState::Running => break,
                        WorkerState::Stopped => return,
                        _ => {
                            if rx.changed().await.is_err() {
                                return;
                            }
                        }
                    }
                }

                tokio::time::sleep(script.step_delay).await;
                if *rx.borrow() == WorkerState::Stopped {
                    return;
                }

                let _ = events.send(WorkerEvent::Progress {
                    worker: id,
                    percent: step.min(100),
                });
            }

            debug!(worker = %id, "script exhausted, stopping worker");
            Self::emit_stopped(id, &events, &state, &stopped_emitted);
        });
    }
}

#[async_trait]
impl SimulationWorker for ScriptedWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    async fn connect(&self) -> Result<(), WorkerError> {
        let current = self.state();
        if current != WorkerState::Created {
            return Err(WorkerError::InvalidTransition {
                state: current,
                operation: "connect",
            });
        }
        self.set_state(WorkerState::Connected);
        Ok(())
    }

    async fn start(&self) -> Result<(), WorkerError> {
        let current = self.state();
        match current {
            WorkerState::Connected => {
                self.set_state(WorkerState::Running);
                self.spawn_drive();
                Ok(())
            }
            // Resume: the drive task observes the state flip and continues.
            WorkerState::Suspended => {
                self.set_state(WorkerState::Running);
                Ok(())
            }
            _ => Err(WorkerError::InvalidTransition {
                state: current,
                operation: "start",
            }),
        }
    }

    async fn suspend(&self) -> Result<(), WorkerError> {
        let current = self.state();
        if current != WorkerState::Running {
            return Err(WorkerError::InvalidTransition {
                state: current,
                operation: "suspend",
            });
        }
        self.set_state(WorkerState::Suspended);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), WorkerError> {
        Self::emit_stopped(self.id, &self.events, &self.state, &self.stopped_emitted);
        Ok(())
    }
}

/// Factory producing scripted workers, with optional per-strategy scripts.
///
/// Records every strategy it built a worker for, in creation order, which
/// the test-suite uses to assert batch membership and launch order.
pub struct ScriptedWorkerFactory {
    default_script: WorkerScript,
    scripts: Mutex<std::collections::HashMap<String, WorkerScript>>,
    created: Mutex<Vec<String>>,
}

impl ScriptedWorkerFactory {
    /// Factory handing `default_script` to every worker.
    #[must_use]
    pub fn new(default_script: WorkerScript) -> Self {
        Self {
            default_script,
            scripts: Mutex::new(std::collections::HashMap::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Override the script for one strategy.
    pub fn set_script(&self, strategy: &str, script: WorkerScript) {
        self.scripts.lock().insert(strategy.to_string(), script);
    }

    /// Strategy identifiers in worker-creation order.
    #[must_use]
    pub fn created(&self) -> Vec<String> {
        self.created.lock().clone()
    }
}

impl WorkerFactory for ScriptedWorkerFactory {
    fn create(&self, spec: WorkerSpec, events: WorkerEventSender) -> Arc<dyn SimulationWorker> {
        let script = self
            .scripts
            .lock()
            .get(spec.strategy.id())
            .cloned()
            .unwrap_or_else(|| self.default_script.clone());
        self.created.lock().push(spec.strategy.id().to_string());
        Arc::new(ScriptedWorker::new(script, events))
    }
}

/// Minimal strategy whose whole behavior is carrying an identifier.
///
/// Counts `reset` and `start` calls so tests can assert each job was armed
/// exactly once.
pub struct NamedStrategy {
    id: String,
    resets: AtomicUsize,
    starts: AtomicUsize,
}

impl NamedStrategy {
    /// Strategy with the given identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resets: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
        }
    }

    /// Number of `reset` calls observed.
    #[must_use]
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::Acquire)
    }

    /// Number of `start` calls observed.
    #[must_use]
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::Acquire)
    }
}

impl Strategy for NamedStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::AcqRel);
    }

    fn start(&self) {
        self.starts.fetch_add(1, Ordering::AcqRel);
    }
}

struct StaticSecurityProvider;
impl SecurityProvider for StaticSecurityProvider {}

struct StaticPortfolioProvider;
impl PortfolioProvider for StaticPortfolioProvider {}

struct StaticExchangeInfoProvider;
impl ExchangeInfoProvider for StaticExchangeInfoProvider {}

struct LocalStorageRegistry;
impl StorageRegistry for LocalStorageRegistry {}

struct LocalStorageDrive;
impl StorageDrive for LocalStorageDrive {}

/// Inert reference data set for demos and tests.
#[must_use]
pub fn demo_reference_data() -> ReferenceData {
    ReferenceData {
        securities: Arc::new(StaticSecurityProvider),
        portfolios: Arc::new(StaticPortfolioProvider),
        exchanges: Arc::new(StaticExchangeInfoProvider),
    }
}

/// Inert storage binding for demos and tests.
#[must_use]
pub fn demo_storage(format: StorageFormat) -> StorageBinding {
    StorageBinding {
        registry: Arc::new(LocalStorageRegistry),
        drive: Arc::new(LocalStorageDrive),
        format,
    }
}
