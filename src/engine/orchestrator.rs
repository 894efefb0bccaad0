//! The orchestration engine.
//!
//! `Orchestrator` owns the task queue, the worker pool, the metrics
//! aggregator and the event bus, and drives three independently ticking
//! loops:
//!
//! - **scheduler loop**: expires overdue tasks, pairs idle workers with
//!   pending tasks through the balancer, and dispatches executions
//! - **monitor loop**: recomputes system metrics, raises threshold alerts
//!   and restores parked workers after their cooldown
//! - **scaler loop**: resizes the pool between the configured floor and
//!   ceiling
//!
//! All shared state is lock-guarded and locks are never held across await
//! points. A dispatched execution runs as its own spawned task and owns the
//! worker's `current_task` until it settles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::{EngineConfig, ErrorRecovery};
use super::events::{EngineEvent, EventBus};
use super::scaler::{AdaptiveScaler, ScaleOutcome};
use crate::metrics::prometheus::{record_attempt, update_gauges};
use crate::metrics::{CompletionRecord, MetricsAggregator, SystemMetrics, ThresholdAlert};
use crate::scheduler::{plan_assignments, QueueError, Task, TaskQueue, TaskRequest};
use crate::workers::{Executor, Worker, WorkerPool, WorkerProfile};

/// Errors surfaced by the engine's public API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration failed validation at construction.
    #[error("Configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    /// A task request was rejected at the ingestion point.
    #[error("Invalid task: {0}")]
    InvalidTask(#[from] QueueError),

    /// The engine is already running.
    #[error("Engine is already running")]
    AlreadyRunning,

    /// The engine is not running.
    #[error("Engine is not running")]
    NotRunning,

    /// Busy workers did not drain within the shutdown timeout.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Polling surface for dashboards and ops tooling.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    /// Whether the periodic loops are running.
    pub is_running: bool,
    /// Workers currently in the pool.
    pub worker_count: usize,
    /// Tasks waiting for dispatch.
    pub queue_length: usize,
    /// Successful completions since construction.
    pub completed_count: u64,
    /// Freshly recomputed system metrics.
    pub metrics: SystemMetrics,
    /// Per-worker snapshots in creation order.
    pub workers: Vec<Worker>,
}

/// Shared engine state, owned behind an `Arc` by the orchestrator, its
/// loops and every in-flight execution.
struct EngineState {
    config: EngineConfig,
    queue: TaskQueue,
    pool: Mutex<WorkerPool>,
    aggregator: MetricsAggregator,
    events: EventBus,
    executor: Arc<dyn Executor>,
    is_running: AtomicBool,
}

impl EngineState {
    fn lock_pool(&self) -> MutexGuard<'_, WorkerPool> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validates and enqueues a task request.
    fn add_task(&self, request: TaskRequest) -> Result<Uuid, EngineError> {
        let task = self.queue.enqueue(request, self.config.default_task_ttl)?;

        debug!(
            task_id = %task.id,
            kind = %task.kind,
            priority = task.priority,
            "Task enqueued"
        );
        self.events.publish(EngineEvent::TaskAdded {
            task_id: task.id,
            kind: task.kind,
            priority: task.priority,
        });
        Ok(task.id)
    }

    /// Builds the polling snapshot.
    fn status(&self) -> SystemStatus {
        let workers = self.lock_pool().snapshot();
        let queue_length = self.queue.len();
        let metrics = self.aggregator.recompute(queue_length, &workers);

        SystemStatus {
            is_running: self.is_running.load(Ordering::SeqCst),
            worker_count: workers.len(),
            queue_length,
            completed_count: self.aggregator.completed_count(),
            metrics,
            workers,
        }
    }

    /// One scheduler tick: expire, sort, pair, dispatch.
    fn run_scheduler_tick(state: &Arc<Self>) {
        // Overdue queued tasks are failed terminally instead of dispatched.
        for task in state.queue.take_expired(Utc::now()) {
            warn!(task_id = %task.id, deadline = %task.deadline, "Task expired in queue");
            state.fail_terminally(&task, "deadline passed while queued");
        }

        let pending = state.queue.sorted_pending();
        if pending.is_empty() {
            return;
        }

        let idle = state.lock_pool().available(None);
        if idle.is_empty() {
            return;
        }

        let assignments = plan_assignments(state.config.strategy, &idle, &pending);

        for assignment in assignments {
            // Remove-then-claim keeps the pair transactional: a task or
            // worker that slipped away since the snapshot aborts just this
            // pair, and the task goes back unchanged.
            let Some(task) = state.queue.remove(assignment.task_id) else {
                continue;
            };

            let claimed = state
                .lock_pool()
                .get_mut(assignment.worker_id)
                .map(|worker| worker.begin(task.id))
                .unwrap_or(false);

            if !claimed {
                debug!(
                    task_id = %task.id,
                    worker_id = %assignment.worker_id,
                    "Dispatch aborted, worker no longer available"
                );
                state.queue.restore(task);
                continue;
            }

            state.events.publish(EngineEvent::TaskAssigned {
                task_id: task.id,
                worker_id: assignment.worker_id,
            });

            let state = Arc::clone(state);
            let worker_id = assignment.worker_id;
            tokio::spawn(async move {
                state.execute_assignment(task, worker_id).await;
            });
        }
    }

    /// Runs one dispatched execution to settlement.
    async fn execute_assignment(self: Arc<Self>, task: Task, worker_id: Uuid) {
        let profile = self
            .lock_pool()
            .get(worker_id)
            .map(|worker| WorkerProfile {
                id: worker.id,
                kind: worker.kind,
                quality_score: worker.metrics.quality_score,
            })
            .unwrap_or(WorkerProfile {
                id: worker_id,
                kind: task.kind,
                quality_score: 100.0,
            });

        let started = Instant::now();
        let result = tokio::time::timeout(
            self.config.execution_timeout,
            self.executor.execute(&task, &profile),
        )
        .await;
        let elapsed = started.elapsed();

        match result {
            Ok(Ok(outcome)) => self.settle_success(task, worker_id, outcome.quality_score, elapsed),
            Ok(Err(err)) => self.settle_failure(task, worker_id, elapsed, err.to_string(), false),
            Err(_) => {
                let message = format!(
                    "worker stopped responding after {:.0}s",
                    self.config.execution_timeout.as_secs_f64()
                );
                self.settle_failure(task, worker_id, elapsed, message, true)
            }
        }
    }

    fn settle_success(&self, task: Task, worker_id: Uuid, quality_score: f64, elapsed: Duration) {
        if let Some(worker) = self.lock_pool().get_mut(worker_id) {
            worker.complete(quality_score, elapsed);
        }

        self.aggregator.record(CompletionRecord {
            task_id: task.id,
            kind: task.kind,
            worker_id,
            completed_at: Utc::now(),
            duration: elapsed,
            quality_score,
            success: true,
        });
        record_attempt(
            &task.kind.to_string(),
            "completed",
            elapsed.as_secs_f64(),
            Some(quality_score),
        );

        info!(
            task_id = %task.id,
            worker_id = %worker_id,
            quality_score = quality_score,
            duration_ms = elapsed.as_millis() as u64,
            "Task completed"
        );
        self.events.publish(EngineEvent::TaskCompleted {
            task_id: task.id,
            worker_id,
            quality_score,
            duration_ms: elapsed.as_millis() as u64,
        });
    }

    fn settle_failure(
        &self,
        mut task: Task,
        worker_id: Uuid,
        elapsed: Duration,
        error: String,
        timed_out: bool,
    ) {
        {
            let mut pool = self.lock_pool();
            if let Some(worker) = pool.get_mut(worker_id) {
                if timed_out {
                    warn!(worker_id = %worker_id, "Worker marked offline after timeout");
                    worker.mark_offline();
                } else {
                    worker.record_failure(elapsed, self.config.worker_error_bar);
                }
            }
        }

        self.aggregator.record(CompletionRecord {
            task_id: task.id,
            kind: task.kind,
            worker_id,
            completed_at: Utc::now(),
            duration: elapsed,
            quality_score: 0.0,
            success: false,
        });
        record_attempt(&task.kind.to_string(), "failed", elapsed.as_secs_f64(), None);

        let retryable = self.config.error_recovery == ErrorRecovery::Retry && task.can_retry();
        if retryable {
            task.note_retry();
            warn!(
                task_id = %task.id,
                worker_id = %worker_id,
                retry_count = task.retry_count,
                max_retries = task.max_retries,
                error = %error,
                "Task failed, re-enqueued for retry"
            );
            self.events.publish(EngineEvent::TaskFailed {
                task_id: task.id,
                worker_id,
                retry_count: task.retry_count,
                error,
            });
            self.queue.requeue(task);
        } else {
            self.fail_terminally(&task, &error);
        }
    }

    /// Drops a task for good and announces it. Used for exhausted retry
    /// budgets and for tasks that expired while queued.
    fn fail_terminally(&self, task: &Task, error: &str) {
        self.aggregator.record_terminal_failure();
        error!(
            task_id = %task.id,
            retry_count = task.retry_count,
            error = %error,
            "Task failed permanently"
        );
        self.events.publish(EngineEvent::TaskFailedPermanently {
            task_id: task.id,
            retry_count: task.retry_count,
            error: error.to_string(),
        });
    }

    /// One monitoring tick: cooldown sweep, metric recomputation, alerts.
    fn run_monitor_tick(&self) {
        let (workers, busy, restored) = {
            let mut pool = self.lock_pool();
            let restored = pool.restore_cooled(self.config.worker_cooldown, Utc::now());
            (pool.snapshot(), pool.busy_count(), restored)
        };
        if restored > 0 {
            info!(restored = restored, "Restored parked workers to service");
        }

        let queue_length = self.queue.len();
        let metrics = self.aggregator.recompute(queue_length, &workers);
        update_gauges(queue_length, workers.len(), busy);

        for alert in self.config.thresholds.check(&metrics) {
            warn!(alert = %alert, "Performance threshold breached");
            self.events.publish(EngineEvent::PerformanceWarning { alert });
        }
    }

    /// One scaler tick.
    fn run_scaler_tick(&self, scaler: &AdaptiveScaler) {
        let workers = self.lock_pool().snapshot();
        let queue_length = self.queue.len();
        let metrics = self.aggregator.recompute(queue_length, &workers);
        let demand = self.queue.stats().depth_by_kind;

        let (outcome, worker_count) = {
            let mut pool = self.lock_pool();
            let outcome = scaler.tick(&mut pool, &metrics, &demand);
            (outcome, pool.len())
        };

        match outcome {
            ScaleOutcome::Held => {}
            ScaleOutcome::AtCeiling { current, ceiling } => {
                self.events.publish(EngineEvent::PerformanceWarning {
                    alert: ThresholdAlert::Capacity { current, ceiling },
                });
            }
            ScaleOutcome::Grew { workers } => {
                for worker in &workers {
                    self.events.publish(EngineEvent::WorkerReady {
                        worker_id: worker.id,
                        kind: worker.kind,
                    });
                }
                self.events.publish(EngineEvent::ScaledUp {
                    added: workers.len(),
                    worker_count,
                });
            }
            ScaleOutcome::Shrank { removed } => {
                self.events.publish(EngineEvent::ScaledDown {
                    removed: removed.len(),
                    worker_count,
                });
            }
        }
    }
}

/// Cheap cloneable handle for producers that only need the ingestion and
/// observation surface, such as the discovery feeder.
#[derive(Clone)]
pub struct EngineHandle {
    state: Arc<EngineState>,
    shutdown_tx: broadcast::Sender<()>,
}

impl EngineHandle {
    /// Enqueues a task. See [`Orchestrator::add_task`].
    pub fn add_task(&self, request: TaskRequest) -> Result<Uuid, EngineError> {
        self.state.add_task(request)
    }

    /// Current system status snapshot.
    pub fn status(&self) -> SystemStatus {
        self.state.status()
    }

    /// Subscribes to the engine event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.state.events.subscribe()
    }

    /// Whether the engine loops are running.
    pub fn is_running(&self) -> bool {
        self.state.is_running.load(Ordering::SeqCst)
    }

    /// Receiver that fires when the engine shuts down; lets auxiliary loops
    /// (the feeder) stop with it.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}

/// The parallel task-orchestration engine.
///
/// Construct with an [`EngineConfig`] and an [`Executor`], then [`start`]
/// the periodic loops. There is no ambient instance; whoever composes the
/// application owns the orchestrator.
///
/// [`start`]: Orchestrator::start
pub struct Orchestrator {
    state: Arc<EngineState>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Creates an engine with a validated configuration and a seeded pool.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` if the configuration fails validation.
    pub fn new(config: EngineConfig, executor: Arc<dyn Executor>) -> Result<Self, EngineError> {
        config.validate()?;

        let pool = WorkerPool::seeded(&config.worker_distribution);
        info!(
            worker_count = pool.len(),
            strategy = %config.strategy,
            "Engine constructed"
        );

        let aggregator = MetricsAggregator::new(config.throughput_window);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            state: Arc::new(EngineState {
                config,
                queue: TaskQueue::new(),
                pool: Mutex::new(pool),
                aggregator,
                events: EventBus::new(),
                executor,
                is_running: AtomicBool::new(false),
            }),
            shutdown_tx,
            handles: Vec::new(),
        })
    }

    /// The single ingestion point for all producers.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidTask` for requests that fail validation;
    /// nothing is enqueued in that case.
    pub fn add_task(&self, request: TaskRequest) -> Result<Uuid, EngineError> {
        self.state.add_task(request)
    }

    /// Subscribes to the engine event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.state.events.subscribe()
    }

    /// Current system status snapshot.
    pub fn status(&self) -> SystemStatus {
        self.state.status()
    }

    /// Cheap handle for producers and observers.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            state: Arc::clone(&self.state),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// Whether the engine loops are running.
    pub fn is_running(&self) -> bool {
        self.state.is_running.load(Ordering::SeqCst)
    }

    /// Starts the scheduler, monitor and (if enabled) scaler loops.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AlreadyRunning` if the engine is running.
    pub async fn start(&mut self) -> Result<(), EngineError> {
        if self.state.is_running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning);
        }

        self.state
            .events
            .publish(EngineEvent::SystemStarted { at: Utc::now() });
        for worker in self.state.lock_pool().snapshot() {
            self.state.events.publish(EngineEvent::WorkerReady {
                worker_id: worker.id,
                kind: worker.kind,
            });
        }

        self.spawn_scheduler_loop();
        self.spawn_monitor_loop();
        if self.state.config.adaptive_scaling {
            self.spawn_scaler_loop();
        }

        info!("Engine started");
        Ok(())
    }

    /// Gracefully shuts down: stops ticking, waits for busy workers to
    /// drain (poll with backoff), then announces the shutdown.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ShutdownTimeout` if workers stay busy past the
    /// configured timeout; the loops are stopped regardless.
    pub async fn shutdown(&mut self) -> Result<(), EngineError> {
        if !self.state.is_running.swap(false, Ordering::SeqCst) {
            return Err(EngineError::NotRunning);
        }

        info!("Engine shutdown initiated");
        // Ignore send errors, loops may have stopped already.
        let _ = self.shutdown_tx.send(());
        futures::future::join_all(self.handles.drain(..)).await;

        // In-flight executions keep running; wait for every worker to
        // settle before declaring the shutdown complete.
        let deadline = Instant::now() + self.state.config.shutdown_timeout;
        let mut backoff = Duration::from_millis(10);
        loop {
            let busy = self.state.lock_pool().busy_count();
            if busy == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!(busy = busy, "Shutdown timed out with busy workers");
                return Err(EngineError::ShutdownTimeout(
                    self.state.config.shutdown_timeout,
                ));
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_millis(500));
        }

        self.state
            .events
            .publish(EngineEvent::SystemShutdown { at: Utc::now() });
        info!("Engine shutdown complete");
        Ok(())
    }

    fn spawn_scheduler_loop(&mut self) {
        let state = Arc::clone(&self.state);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        self.handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(state.config.scheduler_tick);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => EngineState::run_scheduler_tick(&state),
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!("Scheduler loop stopped");
        }));
    }

    fn spawn_monitor_loop(&mut self) {
        let state = Arc::clone(&self.state);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        self.handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(state.config.monitor_tick);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => state.run_monitor_tick(),
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!("Monitor loop stopped");
        }));
    }

    fn spawn_scaler_loop(&mut self) {
        let state = Arc::clone(&self.state);
        let scaler = AdaptiveScaler::new(state.config.clone());
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        self.handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(state.config.scaler_tick);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first interval tick completes immediately; skip it so the
            // scaler only ever acts on a full interval of observed load.
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => state.run_scaler_tick(&scaler),
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!("Scaler loop stopped");
        }));
    }
}
