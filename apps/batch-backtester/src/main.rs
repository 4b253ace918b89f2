//! Batch Backtester Binary
//!
//! Schedules a set of demo strategy simulations and runs them in batches,
//! printing run-state, per-job, and whole-run progress as they arrive.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin batch-backtester
//! ```
//!
//! # Environment Variables
//!
//! - `BATCH_CONFIG`: Configuration file path (default: config.yaml)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use batch_backtester::worker::{NamedStrategy, ScriptedWorkerFactory, WorkerScript};
use batch_backtester::{
    BatchOrchestrator, Job, OrchestratorEvent, RunConfiguration, RunState, demo_reference_data,
    demo_storage, load_config,
};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting batch backtester");

    let config_path = std::env::var("BATCH_CONFIG").ok();
    let config = load_config(config_path.as_deref())?;

    let run_config = RunConfiguration {
        batch_size: config.run.batch_size,
        max_iterations: config.run.max_iterations,
        window: config.run.window(),
        storage: demo_storage(config.storage_format),
    };

    let factory = Arc::new(ScriptedWorkerFactory::new(WorkerScript {
        steps: vec![10, 30, 55, 80, 100],
        step_delay: Duration::from_millis(50),
    }));

    let orchestrator = BatchOrchestrator::builder(run_config, factory, demo_reference_data())
        .event_capacity(config.event_capacity)
        .build();
    let mut events = orchestrator.subscribe();

    let jobs: Vec<Job> = (0..config.demo_jobs)
        .map(|i| Job::new(Arc::new(NamedStrategy::new(format!("sma-sweep-{i:02}")))))
        .collect();
    let job_count = jobs.len();

    orchestrator.start(jobs, job_count).await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(OrchestratorEvent::RunStateChanged { previous, current }) => {
                    tracing::info!(?previous, ?current, "run state changed");
                    if current == RunState::Stopped {
                        break;
                    }
                }
                Ok(OrchestratorEvent::TotalProgress { percent, elapsed, estimated_total }) => {
                    tracing::info!(
                        percent,
                        elapsed_ms = elapsed.as_millis() as u64,
                        estimated_total_ms = estimated_total.as_millis() as u64,
                        "total progress"
                    );
                }
                Ok(OrchestratorEvent::StrategyProgress { strategy, percent }) => {
                    tracing::info!(%strategy, percent, "strategy progress");
                }
                // Dropped events are tolerable for a console printer.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, stopping run");
                orchestrator.stop();
            }
        }
    }

    tracing::info!(
        cancelled = orchestrator.is_cancelled(),
        "Batch backtester stopped"
    );
    Ok(())
}

/// Initialize the tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
