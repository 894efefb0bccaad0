//! End-to-end tests for the orchestration engine.
//!
//! These drive a real engine with deterministic scripted executors and
//! paused time, and assert the externally observable contract: queue
//! accounting, retry exhaustion, scaling bounds, priority ordering and
//! type-matched dispatch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskforge::engine::{EngineConfig, EngineEvent, Orchestrator};
use taskforge::scheduler::{BalancingStrategy, SourceKind, Task, TaskOutcome, TaskSource};
use taskforge::workers::{ExecuteError, Executor, WorkerProfile};
use taskforge::{TaskRequest, WorkerKind};

/// Succeeds instantly with a fixed quality score.
struct InstantExecutor {
    quality: f64,
}

#[async_trait]
impl Executor for InstantExecutor {
    async fn execute(
        &self,
        _task: &Task,
        _worker: &WorkerProfile,
    ) -> Result<TaskOutcome, ExecuteError> {
        Ok(TaskOutcome::new(self.quality))
    }
}

/// Fails every attempt instantly.
struct AlwaysFailExecutor;

#[async_trait]
impl Executor for AlwaysFailExecutor {
    async fn execute(
        &self,
        task: &Task,
        _worker: &WorkerProfile,
    ) -> Result<TaskOutcome, ExecuteError> {
        Err(ExecuteError::ProcessingFailed(format!(
            "scripted failure for {}",
            task.id
        )))
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_scheduler_tick(Duration::from_millis(20))
        .with_monitor_tick(Duration::from_millis(100))
        .with_adaptive_scaling(false)
}

fn request(kind: WorkerKind, priority: u8) -> TaskRequest {
    TaskRequest::new(
        kind,
        priority,
        TaskSource::new(SourceKind::Feed, "https://example.com/items", 3, 0.9),
        Duration::from_secs(10),
    )
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

// A task whose kind no worker matches stays queued indefinitely under the
// type-matching policies; it is never routed to a mismatched worker.
#[tokio::test(start_paused = true)]
async fn unmatched_task_stays_queued_under_content_type_policy() {
    let config = fast_config()
        .with_strategy(BalancingStrategy::ContentType)
        .with_distribution(vec![(WorkerKind::Validator, 3)]);
    let mut engine = Orchestrator::new(config, Arc::new(InstantExecutor { quality: 90.0 })).unwrap();
    let mut events = engine.subscribe();

    engine.start().await.unwrap();
    engine
        .add_task(request(WorkerKind::VideoProcessor, 9))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    let status = engine.status();
    assert_eq!(status.queue_length, 1, "task must remain queued");
    assert_eq!(status.completed_count, 0);

    let assigned = drain(&mut events)
        .into_iter()
        .any(|e| matches!(e, EngineEvent::TaskAssigned { .. }));
    assert!(!assigned, "mismatched workers must never receive the task");

    engine.shutdown().await.unwrap();
}

// A matching worker created later picks the task up.
#[tokio::test(start_paused = true)]
async fn unmatched_task_dispatches_once_matching_worker_exists() {
    let config = fast_config()
        .with_strategy(BalancingStrategy::ContentType)
        .with_max_workers(4)
        .with_distribution(vec![(WorkerKind::Validator, 2)])
        // Two stuck video tasks trip the high watermark, so the scaler
        // creates matching workers.
        .with_queue_watermarks(0, 1)
        .with_adaptive_scaling(true)
        .with_scaler_tick(Duration::from_millis(200));

    let mut engine = Orchestrator::new(config, Arc::new(InstantExecutor { quality: 90.0 })).unwrap();
    engine.start().await.unwrap();

    // Two queued video tasks exceed the high watermark of 1.
    engine.add_task(request(WorkerKind::VideoProcessor, 5)).unwrap();
    engine.add_task(request(WorkerKind::VideoProcessor, 5)).unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;

    let status = engine.status();
    assert_eq!(status.queue_length, 0, "scaled-up video workers drain the queue");
    assert_eq!(status.completed_count, 2);

    engine.shutdown().await.unwrap();
}

// maxRetries=2 and three consecutive failures: the third failure is
// terminal and reports retry_count=2, not 3.
#[tokio::test(start_paused = true)]
async fn retry_budget_exhaustion_is_terminal_with_final_count() {
    let config = fast_config().with_distribution(vec![(WorkerKind::StatsProcessor, 1)]);
    let mut engine = Orchestrator::new(config, Arc::new(AlwaysFailExecutor)).unwrap();
    let mut events = engine.subscribe();

    engine.start().await.unwrap();
    engine
        .add_task(request(WorkerKind::StatsProcessor, 8).with_max_retries(2))
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    engine.shutdown().await.unwrap();

    let drained = drain(&mut events);
    let retryable_failures = drained
        .iter()
        .filter(|e| matches!(e, EngineEvent::TaskFailed { .. }))
        .count();
    assert_eq!(retryable_failures, 2, "two retries precede the terminal failure");

    let terminal: Vec<_> = drained
        .iter()
        .filter_map(|e| match e {
            EngineEvent::TaskFailedPermanently { retry_count, .. } => Some(*retry_count),
            _ => None,
        })
        .collect();
    assert_eq!(terminal, vec![2], "terminal failure fires exactly once with retry_count=2");

    let status = engine.status();
    assert_eq!(status.queue_length, 0);
    assert_eq!(status.metrics.terminal_failures, 1);
}

// Queue pressure at the baseline pool size grows the pool by the configured
// step, never past the ceiling, and announces it.
#[tokio::test(start_paused = true)]
async fn queue_pressure_scales_up_within_ceiling() {
    let config = fast_config()
        .with_strategy(BalancingStrategy::ContentType)
        .with_max_workers(4)
        .with_distribution(vec![(WorkerKind::Validator, 4)])
        .with_queue_watermarks(2, 8)
        .with_adaptive_scaling(true)
        .with_scaler_tick(Duration::from_millis(200));
    let ceiling = config.worker_ceiling();

    let mut engine = Orchestrator::new(config, Arc::new(InstantExecutor { quality: 90.0 })).unwrap();
    let mut events = engine.subscribe();
    engine.start().await.unwrap();

    // Ten tasks no validator can take keep the queue above the watermark.
    for _ in 0..10 {
        engine.add_task(request(WorkerKind::VideoProcessor, 5)).unwrap();
    }

    tokio::time::sleep(Duration::from_millis(300)).await;

    let status = engine.status();
    assert!(status.worker_count > 4, "pool must have grown");
    assert!(
        status.worker_count <= ceiling,
        "pool must stay within the ceiling"
    );

    let scaled_up = drain(&mut events)
        .into_iter()
        .any(|e| matches!(e, EngineEvent::ScaledUp { .. }));
    assert!(scaled_up, "scaled-up event must fire");

    engine.shutdown().await.unwrap();
}

// Priorities 5 then 9 with a single worker under round-robin: the
// priority-9 task runs first.
#[tokio::test(start_paused = true)]
async fn higher_priority_dispatches_first() {
    let config = fast_config()
        .with_strategy(BalancingStrategy::RoundRobin)
        .with_distribution(vec![(WorkerKind::ArticleProcessor, 1)]);
    let mut engine = Orchestrator::new(config, Arc::new(InstantExecutor { quality: 90.0 })).unwrap();
    let mut events = engine.subscribe();

    let low = engine.add_task(request(WorkerKind::ArticleProcessor, 5)).unwrap();
    let high = engine.add_task(request(WorkerKind::ArticleProcessor, 9)).unwrap();

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    engine.shutdown().await.unwrap();

    let assignments: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::TaskAssigned { task_id, .. } => Some(task_id),
            _ => None,
        })
        .collect();

    assert_eq!(assignments.len(), 2);
    assert_eq!(assignments[0], high, "priority 9 must dispatch before priority 5");
    assert_eq!(assignments[1], low);
}

// A pool already at the floor with healthy idle workers is left alone by
// scale-down ticks.
#[tokio::test(start_paused = true)]
async fn scale_down_respects_floor() {
    let config = fast_config()
        .with_max_workers(8)
        // Seed exactly the floor.
        .with_distribution(vec![(WorkerKind::Validator, 4)])
        .with_adaptive_scaling(true)
        .with_scaler_tick(Duration::from_millis(100));

    let mut engine = Orchestrator::new(config, Arc::new(InstantExecutor { quality: 90.0 })).unwrap();
    let mut events = engine.subscribe();
    engine.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    let status = engine.status();
    assert_eq!(status.worker_count, 4, "floor must be respected");

    let scaled_down = drain(&mut events)
        .into_iter()
        .any(|e| matches!(e, EngineEvent::ScaledDown { .. }));
    assert!(!scaled_down, "no scale-down event may fire at the floor");

    engine.shutdown().await.unwrap();
}

// Accounting invariant: everything ever added is either queued, in flight,
// completed or terminally failed; after a drain the first two are zero.
#[tokio::test(start_paused = true)]
async fn task_accounting_balances_after_drain() {
    let config = fast_config().with_distribution(vec![
        (WorkerKind::ArticleProcessor, 2),
        (WorkerKind::StatsProcessor, 1),
        (WorkerKind::Validator, 1),
    ]);
    let mut engine = Orchestrator::new(config, Arc::new(InstantExecutor { quality: 85.0 })).unwrap();
    engine.start().await.unwrap();

    let added = 12;
    for i in 0..added {
        let kind = match i % 3 {
            0 => WorkerKind::ArticleProcessor,
            1 => WorkerKind::StatsProcessor,
            _ => WorkerKind::Validator,
        };
        engine.add_task(request(kind, (i % 10) as u8)).unwrap();
    }

    tokio::time::sleep(Duration::from_secs(3)).await;
    engine.shutdown().await.unwrap();

    let status = engine.status();
    assert_eq!(status.queue_length, 0);
    assert_eq!(
        status.completed_count + status.metrics.terminal_failures,
        added as u64
    );
    // Intelligent policy only ever pairs matching kinds.
    assert_eq!(status.completed_count, added as u64);
}

// The worker invariant (busy iff holding a task) holds at every observation
// point, and no worker is double-assigned within a tick.
#[tokio::test(start_paused = true)]
async fn worker_invariant_holds_throughout_run() {
    let config = fast_config().with_distribution(vec![(WorkerKind::Validator, 2)]);
    let mut engine = Orchestrator::new(config, Arc::new(InstantExecutor { quality: 90.0 })).unwrap();
    let mut events = engine.subscribe();
    engine.start().await.unwrap();

    for _ in 0..8 {
        engine.add_task(request(WorkerKind::Validator, 5)).unwrap();
    }

    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(30)).await;
        for worker in engine.status().workers {
            assert!(worker.holds_invariant(), "busy iff current_task held");
        }
    }

    engine.shutdown().await.unwrap();

    // Every assignment pairs a distinct task; a task id reappears only
    // after a failure, which the instant executor never produces.
    let mut seen_tasks = std::collections::HashSet::new();
    for event in drain(&mut events) {
        if let EngineEvent::TaskAssigned { task_id, .. } = event {
            assert!(seen_tasks.insert(task_id), "task assigned twice");
        }
    }
    assert_eq!(seen_tasks.len(), 8);
}

// Fail-fast recovery short-circuits the retry machine entirely.
#[tokio::test(start_paused = true)]
async fn fail_fast_skips_retries() {
    use taskforge::engine::ErrorRecovery;

    let config = fast_config()
        .with_distribution(vec![(WorkerKind::Validator, 1)])
        .with_error_recovery(ErrorRecovery::FailFast);
    let mut engine = Orchestrator::new(config, Arc::new(AlwaysFailExecutor)).unwrap();
    let mut events = engine.subscribe();

    engine.start().await.unwrap();
    engine
        .add_task(request(WorkerKind::Validator, 5).with_max_retries(3))
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    engine.shutdown().await.unwrap();

    let drained = drain(&mut events);
    assert!(
        !drained.iter().any(|e| matches!(e, EngineEvent::TaskFailed { .. })),
        "fail-fast must not retry"
    );
    let terminal: Vec<_> = drained
        .iter()
        .filter_map(|e| match e {
            EngineEvent::TaskFailedPermanently { retry_count, .. } => Some(*retry_count),
            _ => None,
        })
        .collect();
    assert_eq!(terminal, vec![0]);
}

// An explicit past... deadline is rejected at the door; a near deadline that
// lapses while queued produces a terminal failure instead of a dispatch.
#[tokio::test]
async fn expired_queued_task_fails_terminally() {
    let config = fast_config()
        .with_strategy(BalancingStrategy::ContentType)
        // No worker matches, so the task can only sit in the queue.
        .with_distribution(vec![(WorkerKind::Validator, 1)]);
    let mut engine = Orchestrator::new(config, Arc::new(InstantExecutor { quality: 90.0 })).unwrap();
    let mut events = engine.subscribe();

    let deadline = chrono::Utc::now() + chrono::Duration::milliseconds(150);
    engine
        .add_task(request(WorkerKind::VideoProcessor, 5).with_deadline(deadline))
        .unwrap();

    engine.start().await.unwrap();
    // Real time here: the deadline comparison uses the wall clock.
    tokio::time::sleep(Duration::from_millis(600)).await;
    engine.shutdown().await.unwrap();

    assert_eq!(engine.status().queue_length, 0);
    let terminal = drain(&mut events)
        .into_iter()
        .any(|e| matches!(e, EngineEvent::TaskFailedPermanently { .. }));
    assert!(terminal, "expired task must fail terminally");
}
