//! The batch orchestrator.
//!
//! Partitions a job list into fixed-size batches, launches each batch's
//! workers concurrently against isolated execution contexts, folds their
//! progress into one monotonic whole-run signal, and sequences the next
//! batch when the last worker of the current one stops.
//!
//! Sequencing is never re-entered from worker-callback context: workers
//! post events onto a single mpsc channel consumed by one dedicated
//! event-loop task, and that task alone advances batches. `suspend`,
//! `resume`, and `stop` run on background tasks serialized against
//! sequencing by the run-wide lock, so the calling thread never blocks on
//! worker I/O.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use futures::future::join_all;
use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::params::{EmulationSettings, StorageBinding, TimeWindow};
use crate::worker::{
    ReferenceData, SimulationWorker, WorkerEvent, WorkerFactory, WorkerId, WorkerSpec, WorkerState,
};

use super::error::OrchestratorError;
use super::events::{EventBus, OrchestratorEvent};
use super::logging::{
    BatchLaunchedEvent, RunCompletedEvent, RunStartedEvent, log_batch_launched, log_run_completed,
    log_run_started,
};
use super::partition::{BatchPartitioner, Job, total_batches, truncate_jobs};
use super::progress::{BatchProgress, ProgressWatermark, estimate_total, total_percent};
use super::slots::{CacheFactory, SlotCachePool};
use super::state::{RunState, StateCell};

/// Immutable per-run configuration, set once before `start`.
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    /// Workers launched concurrently per batch (> 0).
    pub batch_size: usize,
    /// Cap on scheduled simulations per run (0 = unbounded).
    pub max_iterations: usize,
    /// Historical window every worker replays.
    pub window: TimeWindow,
    /// Storage pass-through handed verbatim to every worker.
    pub storage: StorageBinding,
}

/// The in-flight batch: progress table, job names, remaining counter.
///
/// Exactly one of these is current at any time; it is replaced atomically
/// when the next batch launches and cleared at finalization.
struct ActiveBatch {
    /// 0-based batch index, assigned at consumption time.
    index: usize,
    /// The run's fixed per-batch weight (`100 / total_batches`).
    weight: f64,
    /// Strategy identifier per worker, for per-job notifications.
    names: HashMap<WorkerId, String>,
    /// Last reported step per worker, behind the batch aggregation lock.
    progress: SyncMutex<BatchProgress>,
    /// Workers of this batch that have not yet reached the terminal state.
    remaining: AtomicUsize,
}

/// Run-wide mutable state, behind the run lock.
struct RunCore {
    batches: BatchPartitioner,
    /// Active workers of the in-flight batch; empty between runs.
    workers: Vec<Arc<dyn SimulationWorker>>,
    pool: SlotCachePool,
    /// Snapshot of the emulation parameters taken at `start`.
    emulation: EmulationSettings,
    batch_weight: f64,
    next_batch_index: usize,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
}

struct Inner {
    state: StateCell,
    cancel_requested: AtomicBool,
    was_cancelled: AtomicBool,
    watermark: ProgressWatermark,
    started_at: SyncMutex<Instant>,
    /// Current batch, readable by the progress path without the run lock.
    current: RwLock<Option<Arc<ActiveBatch>>>,
    /// The run-wide lock: sequencing, control operations, worker list.
    run: Mutex<Option<RunCore>>,
    bus: EventBus,
    factory: Arc<dyn WorkerFactory>,
    reference: ReferenceData,
    emulation_master: SyncMutex<EmulationSettings>,
    adapter_cache: Option<Arc<dyn CacheFactory>>,
    storage_cache: Option<Arc<dyn CacheFactory>>,
    config: RunConfiguration,
    shutdown: CancellationToken,
}

/// Outcome of one sequencing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Finished,
}

/// Runs simulation jobs in fixed-size batches with unified progress.
///
/// Dropping the orchestrator implies `stop`.
pub struct BatchOrchestrator {
    inner: Arc<Inner>,
}

/// Builder for [`BatchOrchestrator`].
pub struct BatchOrchestratorBuilder {
    config: RunConfiguration,
    factory: Arc<dyn WorkerFactory>,
    reference: ReferenceData,
    emulation: EmulationSettings,
    adapter_cache: Option<Arc<dyn CacheFactory>>,
    storage_cache: Option<Arc<dyn CacheFactory>>,
    event_capacity: usize,
}

impl BatchOrchestratorBuilder {
    /// Builder over the given collaborators.
    #[must_use]
    pub fn new(
        config: RunConfiguration,
        factory: Arc<dyn WorkerFactory>,
        reference: ReferenceData,
    ) -> Self {
        Self {
            config,
            factory,
            reference,
            emulation: EmulationSettings::default(),
            adapter_cache: None,
            storage_cache: None,
            event_capacity: 64,
        }
    }

    /// Master emulation parameter set.
    #[must_use]
    pub fn emulation(mut self, settings: EmulationSettings) -> Self {
        self.emulation = settings;
        self
    }

    /// Enable adapter-level per-slot caching.
    #[must_use]
    pub fn adapter_cache(mut self, factory: Arc<dyn CacheFactory>) -> Self {
        self.adapter_cache = Some(factory);
        self
    }

    /// Enable storage-level per-slot caching.
    #[must_use]
    pub fn storage_cache(mut self, factory: Arc<dyn CacheFactory>) -> Self {
        self.storage_cache = Some(factory);
        self
    }

    /// Capacity of the broadcast event channel.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Build the orchestrator.
    #[must_use]
    pub fn build(self) -> BatchOrchestrator {
        BatchOrchestrator {
            inner: Arc::new(Inner {
                state: StateCell::new(),
                cancel_requested: AtomicBool::new(false),
                was_cancelled: AtomicBool::new(false),
                watermark: ProgressWatermark::new(),
                started_at: SyncMutex::new(Instant::now()),
                current: RwLock::new(None),
                run: Mutex::new(None),
                bus: EventBus::new(self.event_capacity),
                factory: self.factory,
                reference: self.reference,
                emulation_master: SyncMutex::new(self.emulation),
                adapter_cache: self.adapter_cache,
                storage_cache: self.storage_cache,
                config: self.config,
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

impl BatchOrchestrator {
    /// Builder over the given collaborators.
    #[must_use]
    pub fn builder(
        config: RunConfiguration,
        factory: Arc<dyn WorkerFactory>,
        reference: ReferenceData,
    ) -> BatchOrchestratorBuilder {
        BatchOrchestratorBuilder::new(config, factory, reference)
    }

    /// Current run state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.inner.state.get()
    }

    /// Whether the last (or current) run ended via cancellation rather than
    /// exhaustion.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.was_cancelled.load(Ordering::Acquire)
    }

    /// Subscribe to the orchestrator's event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.bus.subscribe()
    }

    /// The run configuration this orchestrator was built with.
    #[must_use]
    pub fn config(&self) -> &RunConfiguration {
        &self.inner.config
    }

    /// Replace the master emulation parameter set.
    ///
    /// Workers receive a cloned snapshot at launch, so this never affects a
    /// run already in flight.
    pub fn set_emulation(&self, settings: EmulationSettings) {
        *self.inner.emulation_master.lock() = settings;
    }

    /// Start a run over `jobs`, scheduling at most `iteration_count` of
    /// them (further capped by the configured maximum).
    ///
    /// # Errors
    ///
    /// Returns a configuration error before any state transition or worker
    /// creation: empty jobs, zero iteration count, zero resolved batches,
    /// or a run already in flight.
    pub async fn start(
        &self,
        mut jobs: Vec<Job>,
        iteration_count: usize,
    ) -> Result<(), OrchestratorError> {
        let inner = &self.inner;

        if iteration_count == 0 {
            return Err(OrchestratorError::InvalidIterationCount);
        }
        if jobs.is_empty() {
            return Err(OrchestratorError::NoJobs);
        }
        if inner.config.batch_size == 0 {
            return Err(OrchestratorError::InvalidBatchSize);
        }

        let mut guard = inner.run.lock().await;
        let state = inner.state.get();
        if state != RunState::Stopped {
            return Err(OrchestratorError::RunInProgress { state });
        }

        let effective = truncate_jobs(&mut jobs, iteration_count, inner.config.max_iterations);
        let total = total_batches(effective, inner.config.batch_size);
        if total == 0 {
            return Err(OrchestratorError::ZeroBatches {
                iterations: effective,
                batch_size: inner.config.batch_size,
            });
        }

        let pool = SlotCachePool::allocate(
            inner.config.batch_size,
            inner.adapter_cache.as_deref(),
            inner.storage_cache.as_deref(),
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        #[allow(clippy::cast_precision_loss)]
        let core = RunCore {
            batches: BatchPartitioner::new(jobs, inner.config.batch_size),
            workers: Vec::new(),
            pool,
            emulation: inner.emulation_master.lock().clone(),
            batch_weight: 100.0 / total as f64,
            next_batch_index: 0,
            events_tx,
        };

        inner.cancel_requested.store(false, Ordering::Release);
        inner.was_cancelled.store(false, Ordering::Release);
        inner.watermark.reset();
        *inner.started_at.lock() = Instant::now();

        transition(inner, RunState::Starting);
        log_run_started(&RunStartedEvent {
            jobs_scheduled: effective,
            total_batches: total,
            batch_size: inner.config.batch_size,
            window_start: inner.config.window.start,
            window_stop: inner.config.window.stop,
        });

        *guard = Some(core);
        drop(guard);

        let loop_inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            event_loop(&loop_inner, events_rx).await;
        });

        Ok(())
    }

    /// Suspend the run; no-op unless the run state is `Started`.
    ///
    /// Runs on a background task and returns immediately.
    pub fn suspend(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            suspend_run(&inner).await;
        });
    }

    /// Resume a suspended run; no-op unless the run state is `Suspended`.
    ///
    /// Runs on a background task and returns immediately.
    pub fn resume(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            resume_run(&inner).await;
        });
    }

    /// Request cooperative cancellation; no-op unless the run state is
    /// `Started` or `Suspended`.
    ///
    /// Sets the cancellation flag and disconnects active workers; the run
    /// finalizes once every worker reaches its terminal state. Runs on a
    /// background task and returns immediately.
    pub fn stop(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            stop_run(&inner).await;
        });
    }
}

impl Drop for BatchOrchestrator {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

/// Guarded state transition; illegal edges are suppressed with a warning
/// rather than surfaced, since redundant control calls are silent no-ops.
fn transition(inner: &Inner, next: RunState) {
    let previous = inner.state.get();
    if previous == next {
        return;
    }
    if !previous.can_transition_to(next) {
        warn!(?previous, ?next, "illegal run-state transition suppressed");
        return;
    }
    inner.state.set(next);
    debug!(?previous, ?next, "run state changed");
    inner.bus.publish(OrchestratorEvent::RunStateChanged {
        previous,
        current: next,
    });
}

/// The dedicated sequencing task: launches the first batch, then reacts to
/// worker events until the run finalizes.
async fn event_loop(inner: &Arc<Inner>, mut events_rx: mpsc::UnboundedReceiver<WorkerEvent>) {
    if sequence_next(inner).await == Flow::Finished {
        return;
    }

    let mut shutdown_handled = false;
    loop {
        tokio::select! {
            maybe = events_rx.recv() => match maybe {
                Some(WorkerEvent::Progress { worker, percent }) => {
                    handle_progress(inner, worker, percent);
                }
                Some(WorkerEvent::StateChanged { worker, state }) => {
                    if handle_worker_state(inner, worker, state).await == Flow::Finished {
                        break;
                    }
                }
                None => break,
            },
            () = inner.shutdown.cancelled(), if !shutdown_handled => {
                // Orchestrator dropped mid-run: treat as stop.
                shutdown_handled = true;
                stop_run(inner).await;
            }
        }
    }
}

/// Progress notification handler: the raw per-job step is forwarded, then
/// aggregated under the batch lock, gated by threshold and watermark.
fn handle_progress(inner: &Inner, worker: WorkerId, percent: u8) {
    let Some(batch) = inner.current.read().clone() else {
        return;
    };
    let Some(name) = batch.names.get(&worker) else {
        // Stale event from a torn-down batch.
        return;
    };

    // Forward the raw per-job step immediately, unthrottled.
    inner.bus.publish(OrchestratorEvent::StrategyProgress {
        strategy: name.clone(),
        percent,
    });

    // Whole-run progress goes silent once cancellation was requested; only
    // the per-job steps of the winding-down batch still flow.
    if inner.cancel_requested.load(Ordering::Acquire) {
        return;
    }

    let Some(mean) = batch.progress.lock().record(worker, percent) else {
        return;
    };

    #[allow(clippy::cast_possible_truncation)]
    let value = total_percent(batch.index as u64, batch.weight, mean);
    if !inner.watermark.admit(value) {
        return;
    }

    let elapsed = inner.started_at.lock().elapsed();
    inner.bus.publish(OrchestratorEvent::TotalProgress {
        percent: value,
        elapsed,
        estimated_total: estimate_total(elapsed, value),
    });
}

/// State-change handler: guarantees the terminal per-job signal and hands
/// off to sequencing when the batch's last worker stops.
async fn handle_worker_state(inner: &Arc<Inner>, worker: WorkerId, state: WorkerState) -> Flow {
    if state != WorkerState::Stopped {
        return Flow::Continue;
    }
    let Some(batch) = inner.current.read().clone() else {
        return Flow::Continue;
    };
    let Some(name) = batch.names.get(&worker) else {
        return Flow::Continue;
    };

    // Every job sees a terminal 100 exactly once, even if the worker's own
    // last step fell short.
    let last = batch.progress.lock().step(worker).unwrap_or(0);
    if last != 100 {
        inner.bus.publish(OrchestratorEvent::StrategyProgress {
            strategy: name.clone(),
            percent: 100,
        });
    }

    if batch.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
        return sequence_next(inner).await;
    }
    Flow::Continue
}

/// Batch sequencing: finalize on cancellation or exhaustion, otherwise
/// construct, connect, and start the next batch's workers.
#[allow(clippy::significant_drop_tightening)]
async fn sequence_next(inner: &Arc<Inner>) -> Flow {
    let mut guard = inner.run.lock().await;
    let Some(core) = guard.as_mut() else {
        return Flow::Finished;
    };

    let cancelled = inner.cancel_requested.load(Ordering::Acquire);
    if cancelled || core.batches.remaining() == 0 {
        let batches_run = core.next_batch_index;
        inner.was_cancelled.store(cancelled, Ordering::Release);

        transition(inner, RunState::Stopping);
        transition(inner, RunState::Stopped);

        *inner.current.write() = None;
        *guard = None;

        let duration = inner.started_at.lock().elapsed();
        #[allow(clippy::cast_possible_truncation)]
        log_run_completed(&RunCompletedEvent {
            batches_run,
            cancelled,
            duration_ms: duration.as_millis() as u64,
        });
        return Flow::Finished;
    }

    let jobs = core.batches.next_batch().unwrap_or_default();
    let index = core.next_batch_index;
    core.next_batch_index += 1;

    if index == 0 {
        transition(inner, RunState::Started);
    }
    log_batch_launched(&BatchLaunchedEvent {
        batch_index: index,
        batch_jobs: jobs.len(),
        remaining_jobs: core.batches.remaining(),
    });

    // Construct every worker of the batch before connecting any of them.
    let mut progress = BatchProgress::new();
    let mut names = HashMap::new();
    let mut workers: Vec<Arc<dyn SimulationWorker>> = Vec::with_capacity(jobs.len());
    for (slot, job) in jobs.iter().enumerate() {
        let spec = WorkerSpec {
            slot,
            window: inner.config.window,
            storage: inner.config.storage.clone(),
            emulation: core.emulation.clone(),
            caches: core.pool.pair(slot),
            strategy: Arc::clone(&job.strategy),
            reference: inner.reference.clone(),
        };
        let worker = inner.factory.create(spec, core.events_tx.clone());

        job.strategy.reset();
        job.strategy.start();
        progress.register(worker.id());
        names.insert(worker.id(), job.strategy.id().to_string());
        workers.push(worker);
    }

    let batch = Arc::new(ActiveBatch {
        index,
        weight: core.batch_weight,
        names,
        progress: SyncMutex::new(progress),
        remaining: AtomicUsize::new(workers.len()),
    });
    *inner.current.write() = Some(batch);
    core.workers.clone_from(&workers);

    // Connect and start every worker concurrently; there is no ordering
    // guarantee between their completions. A batch sequenced while the run
    // is suspended stays at Connected until resume starts it.
    let launch_running = inner.state.get() != RunState::Suspended;
    join_all(workers.iter().map(|worker| async move {
        if let Err(e) = worker.connect().await {
            warn!(worker = %worker.id(), error = %e, "worker connect failed");
        }
        if launch_running && let Err(e) = worker.start().await {
            warn!(worker = %worker.id(), error = %e, "worker start failed");
        }
    }))
    .await;

    Flow::Continue
}

async fn suspend_run(inner: &Arc<Inner>) {
    let guard = inner.run.lock().await;
    if inner.state.get() != RunState::Started {
        return;
    }
    transition(inner, RunState::Suspending);

    if let Some(core) = guard.as_ref() {
        for worker in &core.workers {
            if worker.state() == WorkerState::Running
                && let Err(e) = worker.suspend().await
            {
                warn!(worker = %worker.id(), error = %e, "worker suspend failed");
            }
        }
    }

    transition(inner, RunState::Suspended);
}

async fn resume_run(inner: &Arc<Inner>) {
    let guard = inner.run.lock().await;
    if inner.state.get() != RunState::Suspended {
        return;
    }
    transition(inner, RunState::Starting);

    if let Some(core) = guard.as_ref() {
        for worker in &core.workers {
            // Connected covers a batch that was sequenced while suspended.
            if matches!(
                worker.state(),
                WorkerState::Suspended | WorkerState::Connected
            ) && let Err(e) = worker.start().await
            {
                warn!(worker = %worker.id(), error = %e, "worker resume failed");
            }
        }
    }

    transition(inner, RunState::Started);
}

async fn stop_run(inner: &Arc<Inner>) {
    let guard = inner.run.lock().await;
    let state = inner.state.get();
    if !matches!(state, RunState::Started | RunState::Suspended) {
        return;
    }

    inner.cancel_requested.store(true, Ordering::Release);
    transition(inner, RunState::Stopping);

    if let Some(core) = guard.as_ref() {
        for worker in &core.workers {
            if worker.state().is_active()
                && let Err(e) = worker.disconnect().await
            {
                warn!(worker = %worker.id(), error = %e, "worker disconnect failed");
            }
        }
    }
}
