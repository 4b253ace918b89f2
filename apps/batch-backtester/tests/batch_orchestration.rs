//! End-to-end orchestration tests over scripted workers.
//!
//! Each test subscribes before starting the run so no event is missed, and
//! drains the broadcast stream until the run reports its terminal state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::timeout;

use batch_backtester::worker::{NamedStrategy, ScriptedWorkerFactory, WorkerScript};
use batch_backtester::{
    BatchOrchestrator, Job, OrchestratorEvent, RunConfiguration, RunState, StorageFormat,
    demo_reference_data, demo_storage,
};

fn make_config(batch_size: usize, max_iterations: usize) -> RunConfiguration {
    RunConfiguration {
        batch_size,
        max_iterations,
        window: batch_backtester::TimeWindow {
            start: Utc::now() - chrono::Duration::days(365),
            stop: Utc::now(),
        },
        storage: demo_storage(StorageFormat::Binary),
    }
}

fn make_orchestrator(
    batch_size: usize,
    max_iterations: usize,
    script: WorkerScript,
) -> (BatchOrchestrator, Arc<ScriptedWorkerFactory>) {
    let factory = Arc::new(ScriptedWorkerFactory::new(script));
    let orchestrator = BatchOrchestrator::builder(
        make_config(batch_size, max_iterations),
        Arc::clone(&factory) as Arc<dyn batch_backtester::WorkerFactory>,
        demo_reference_data(),
    )
    .event_capacity(1024)
    .build();
    (orchestrator, factory)
}

fn make_jobs(n: usize) -> Vec<Job> {
    (0..n)
        .map(|i| Job::new(Arc::new(NamedStrategy::new(format!("strat-{i}")))))
        .collect()
}

/// Drain events until the run state reaches `Stopped`.
async fn collect_until_stopped(
    rx: &mut broadcast::Receiver<OrchestratorEvent>,
) -> Vec<OrchestratorEvent> {
    let mut events = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("run should reach Stopped")
            .expect("event stream should stay open");
        let done = matches!(
            event,
            OrchestratorEvent::RunStateChanged {
                current: RunState::Stopped,
                ..
            }
        );
        events.push(event);
        if done {
            return events;
        }
    }
}

fn state_transitions(events: &[OrchestratorEvent]) -> Vec<(RunState, RunState)> {
    events
        .iter()
        .filter_map(|e| match e {
            OrchestratorEvent::RunStateChanged { previous, current } => Some((*previous, *current)),
            _ => None,
        })
        .collect()
}

/// Wait for a specific run state to be announced.
async fn wait_for_state(rx: &mut broadcast::Receiver<OrchestratorEvent>, wanted: RunState) {
    loop {
        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {wanted:?}"))
            .expect("event stream should stay open");
        if matches!(
            event,
            OrchestratorEvent::RunStateChanged { current, .. } if current == wanted
        ) {
            return;
        }
    }
}

#[tokio::test]
async fn test_run_walks_legal_state_sequence() {
    let (orchestrator, _) = make_orchestrator(2, 0, WorkerScript::default());
    let mut rx = orchestrator.subscribe();

    orchestrator.start(make_jobs(5), 5).await.unwrap();
    let events = collect_until_stopped(&mut rx).await;

    assert_eq!(
        state_transitions(&events),
        vec![
            (RunState::Stopped, RunState::Starting),
            (RunState::Starting, RunState::Started),
            (RunState::Started, RunState::Stopping),
            (RunState::Stopping, RunState::Stopped),
        ]
    );
    assert_eq!(orchestrator.state(), RunState::Stopped);
    assert!(!orchestrator.is_cancelled());
}

#[tokio::test]
async fn test_total_progress_strictly_increases() {
    let (orchestrator, _) = make_orchestrator(2, 0, WorkerScript::default());
    let mut rx = orchestrator.subscribe();

    orchestrator.start(make_jobs(5), 5).await.unwrap();
    let events = collect_until_stopped(&mut rx).await;

    let totals: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            OrchestratorEvent::TotalProgress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();

    assert!(!totals.is_empty(), "a full run must report total progress");
    for pair in totals.windows(2) {
        assert!(pair[1] > pair[0], "total progress regressed: {totals:?}");
    }
    assert!(*totals.last().unwrap() <= 100);
}

#[tokio::test]
async fn test_short_script_still_gets_terminal_hundred() {
    // The script never reaches 100 natively; the orchestrator owes the job
    // a terminal signal anyway.
    let (orchestrator, _) = make_orchestrator(1, 0, WorkerScript::with_steps(vec![10, 60]));
    let mut rx = orchestrator.subscribe();

    orchestrator.start(make_jobs(1), 1).await.unwrap();
    let events = collect_until_stopped(&mut rx).await;

    let steps: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            OrchestratorEvent::StrategyProgress { strategy, percent } if strategy == "strat-0" => {
                Some(*percent)
            }
            _ => None,
        })
        .collect();

    assert_eq!(steps, vec![10, 60, 100]);
}

#[tokio::test]
async fn test_every_job_reaches_terminal_exactly_once() {
    let (orchestrator, _) = make_orchestrator(2, 0, WorkerScript::default());
    let mut rx = orchestrator.subscribe();

    orchestrator.start(make_jobs(5), 5).await.unwrap();
    let events = collect_until_stopped(&mut rx).await;

    let mut terminals: HashMap<String, usize> = HashMap::new();
    for event in &events {
        if let OrchestratorEvent::StrategyProgress { strategy, percent } = event
            && *percent == 100
        {
            *terminals.entry(strategy.clone()).or_default() += 1;
        }
    }

    assert_eq!(terminals.len(), 5, "every job must report completion");
    for (strategy, count) in &terminals {
        assert_eq!(*count, 1, "{strategy} completed {count} times");
    }
}

#[tokio::test]
async fn test_batches_never_overlap() {
    let (orchestrator, factory) = make_orchestrator(2, 0, WorkerScript::default());
    let mut rx = orchestrator.subscribe();

    orchestrator.start(make_jobs(5), 5).await.unwrap();
    let events = collect_until_stopped(&mut rx).await;

    // Workers are created in job order, so the batch of a job is its
    // creation position divided by the batch size.
    let created = factory.created();
    assert_eq!(created, vec!["strat-0", "strat-1", "strat-2", "strat-3", "strat-4"]);
    let batch_of: HashMap<&str, usize> = created
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i / 2))
        .collect();

    // Every per-job event must belong to the batch currently in flight; a
    // batch is in flight from its first event until all its jobs hit 100.
    let mut current_batch = 0usize;
    let mut completed_in_batch = 0usize;
    for event in &events {
        let OrchestratorEvent::StrategyProgress { strategy, percent } = event else {
            continue;
        };
        let batch = batch_of[strategy.as_str()];
        assert_eq!(
            batch, current_batch,
            "job of batch {batch} reported while batch {current_batch} was in flight"
        );
        if *percent == 100 {
            completed_in_batch += 1;
            let batch_len = created
                .iter()
                .filter(|name| batch_of[name.as_str()] == current_batch)
                .count();
            if completed_in_batch == batch_len {
                current_batch += 1;
                completed_in_batch = 0;
            }
        }
    }

    assert_eq!(current_batch, 3, "five jobs at batch size two is three batches");
}

#[tokio::test]
async fn test_max_iterations_truncates_schedule() {
    let (orchestrator, factory) = make_orchestrator(2, 3, WorkerScript::default());
    let mut rx = orchestrator.subscribe();

    orchestrator.start(make_jobs(5), 5).await.unwrap();
    collect_until_stopped(&mut rx).await;

    assert_eq!(factory.created().len(), 3);
}

#[tokio::test]
async fn test_iteration_count_caps_schedule() {
    let (orchestrator, factory) = make_orchestrator(2, 0, WorkerScript::default());
    let mut rx = orchestrator.subscribe();

    orchestrator.start(make_jobs(5), 2).await.unwrap();
    collect_until_stopped(&mut rx).await;

    assert_eq!(factory.created().len(), 2);
}

#[tokio::test]
async fn test_stop_cancels_between_batches() {
    let slow = WorkerScript {
        steps: vec![20, 40, 60, 80, 100],
        step_delay: Duration::from_millis(40),
    };
    let (orchestrator, factory) = make_orchestrator(2, 0, slow);
    let mut rx = orchestrator.subscribe();

    orchestrator.start(make_jobs(6), 6).await.unwrap();
    wait_for_state(&mut rx, RunState::Started).await;

    orchestrator.stop();
    let events = collect_until_stopped(&mut rx).await;

    assert!(orchestrator.is_cancelled());
    assert_eq!(orchestrator.state(), RunState::Stopped);
    // Cancellation lands during the first batch, so later batches never
    // construct workers.
    assert_eq!(factory.created().len(), 2);
    let transitions = state_transitions(&events);
    assert_eq!(
        transitions.last(),
        Some(&(RunState::Stopping, RunState::Stopped))
    );

    // Once the run leaves Started for Stopping, the whole-run progress
    // signal stays silent; only per-job steps of the winding-down batch may
    // still appear.
    let stopping_at = events
        .iter()
        .position(|e| {
            matches!(
                e,
                OrchestratorEvent::RunStateChanged {
                    current: RunState::Stopping,
                    ..
                }
            )
        })
        .expect("cancelled run must pass through Stopping");
    assert!(
        events[stopping_at..]
            .iter()
            .all(|e| !matches!(e, OrchestratorEvent::TotalProgress { .. })),
        "whole-run progress reported after cancellation"
    );
}

#[tokio::test]
async fn test_drop_stops_run() {
    let slow = WorkerScript {
        steps: vec![20, 40, 60, 80, 100],
        step_delay: Duration::from_millis(40),
    };
    let (orchestrator, factory) = make_orchestrator(2, 0, slow);
    let mut rx = orchestrator.subscribe();

    orchestrator.start(make_jobs(6), 6).await.unwrap();
    wait_for_state(&mut rx, RunState::Started).await;

    // The event stream outlives the handle; the event-loop task holds the
    // orchestrator internals alive until the run finalizes.
    drop(orchestrator);
    let events = collect_until_stopped(&mut rx).await;

    // Dropping mid-batch disconnects the active workers and finalizes; no
    // later batch constructs workers.
    assert_eq!(factory.created().len(), 2);
    let transitions = state_transitions(&events);
    assert_eq!(
        transitions.last(),
        Some(&(RunState::Stopping, RunState::Stopped))
    );
}

#[tokio::test]
async fn test_suspend_resume_roundtrip() {
    let slow = WorkerScript {
        steps: vec![25, 50, 75, 100],
        step_delay: Duration::from_millis(40),
    };
    let (orchestrator, _) = make_orchestrator(2, 0, slow);
    let mut rx = orchestrator.subscribe();

    orchestrator.start(make_jobs(2), 2).await.unwrap();
    wait_for_state(&mut rx, RunState::Started).await;

    orchestrator.suspend();
    wait_for_state(&mut rx, RunState::Suspended).await;
    assert_eq!(orchestrator.state(), RunState::Suspended);

    orchestrator.resume();
    let events = collect_until_stopped(&mut rx).await;

    let transitions = state_transitions(&events);
    assert_eq!(
        transitions,
        vec![
            (RunState::Suspended, RunState::Starting),
            (RunState::Starting, RunState::Started),
            (RunState::Started, RunState::Stopping),
            (RunState::Stopping, RunState::Stopped),
        ]
    );
    assert!(!orchestrator.is_cancelled());
}

#[tokio::test]
async fn test_orchestrator_is_reusable_after_run() {
    let (orchestrator, factory) = make_orchestrator(2, 0, WorkerScript::default());
    let mut rx = orchestrator.subscribe();

    orchestrator.start(make_jobs(2), 2).await.unwrap();
    collect_until_stopped(&mut rx).await;

    orchestrator.start(make_jobs(3), 3).await.unwrap();
    collect_until_stopped(&mut rx).await;

    assert_eq!(factory.created().len(), 5);
    assert_eq!(orchestrator.state(), RunState::Stopped);
}
