// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Batch Backtester - Rust Core Library
//!
//! Runs trading-strategy simulations in fixed-size batches over historical
//! market data, with unified whole-run progress, suspend/resume, and
//! cooperative cancellation.
//!
//! # Architecture
//!
//! - `orchestrator`: Batch partitioning, slot cache pool, progress
//!   aggregation, run-state machine, and the sequencing engine.
//! - `worker`: The worker boundary (lifecycle trait, event channel) plus a
//!   scripted in-process worker for demos and tests.
//! - `params`: Run-scoped parameter objects distributed to workers.
//! - `config`: YAML application configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Application configuration loading and validation.
pub mod config;

/// Batch orchestration core.
pub mod orchestrator;

/// Run-scoped parameter objects.
pub mod params;

/// Worker boundary and scripted reference worker.
pub mod worker;

pub use config::{Config, ConfigError, RunSettings, load_config};
pub use orchestrator::{
    BatchOrchestrator, BatchOrchestratorBuilder, BatchPartitioner, EventBus, Job,
    OrchestratorError, OrchestratorEvent, RunConfiguration, RunState, SlotCachePool,
};
pub use params::{EmulationSettings, StorageBinding, StorageFormat, TimeWindow};
pub use worker::{
    NamedStrategy, ReferenceData, ScriptedWorkerFactory, SimulationWorker, Strategy, WorkerEvent,
    WorkerFactory, WorkerId, WorkerScript, WorkerState, demo_reference_data, demo_storage,
};
