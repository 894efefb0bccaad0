//! Pluggable task execution.
//!
//! The engine never executes work itself; it hands each assignment to an
//! [`Executor`] injected at construction. Production wires in real
//! processing calls, tests substitute deterministic fakes, and the bundled
//! [`SimulatedExecutor`] drives demo runs with a realistic timing model.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::scheduler::task::{Task, TaskOutcome, WorkerKind};

/// Errors reported from a task execution attempt.
///
/// Every variant is a retryable condition from the engine's point of view;
/// the retry budget on the task decides whether another attempt happens.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The payload could not be processed.
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    /// The source behind the task's locator was unreachable.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),
}

/// Snapshot of the executing worker handed to the executor.
///
/// Carries just enough for the executor to model worker-dependent behavior
/// without sharing mutable worker state across the execution boundary.
#[derive(Debug, Clone)]
pub struct WorkerProfile {
    /// Id of the executing worker.
    pub id: Uuid,
    /// The worker's capability class.
    pub kind: WorkerKind,
    /// The worker's rolling quality score at dispatch time.
    pub quality_score: f64,
}

/// Execution seam between the engine and the actual processing code.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Processes one task on behalf of a worker.
    ///
    /// Implementations run to completion or return an error; the engine
    /// enforces its execution timeout around this call and owns all state
    /// transitions that follow.
    async fn execute(&self, task: &Task, worker: &WorkerProfile) -> Result<TaskOutcome, ExecuteError>;
}

/// Simulated executor for demo runs and load experiments.
///
/// Sleeps for a duration derived from the engine's processing-time model and
/// then draws a quality score, failing a configurable fraction of attempts.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    /// Fraction of attempts that fail, `0.0..=1.0`.
    failure_rate: f64,
    /// Multiplier applied to the modeled duration; keep below 1.0 to
    /// compress demo runs into wall-clock seconds.
    time_scale: f64,
}

impl SimulatedExecutor {
    /// Creates a simulated executor.
    pub fn new(failure_rate: f64, time_scale: f64) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            time_scale: time_scale.max(0.0),
        }
    }

    /// Per-kind base processing cost.
    fn base_cost(kind: WorkerKind) -> Duration {
        match kind {
            WorkerKind::Discovery => Duration::from_secs(5),
            WorkerKind::ArticleProcessor => Duration::from_secs(20),
            WorkerKind::VideoProcessor => Duration::from_secs(45),
            WorkerKind::StatsProcessor => Duration::from_secs(10),
            WorkerKind::Validator => Duration::from_secs(8),
            WorkerKind::QualityControl => Duration::from_secs(12),
            WorkerKind::RealtimeMonitor => Duration::from_secs(3),
        }
    }

    /// Models the expected processing time: the per-kind base cost scaled up
    /// linearly with difficulty and down linearly with worker quality.
    ///
    /// Difficulty 5 and quality 50 leave the base cost unchanged; a
    /// difficulty-10 task takes 1.5x base, a quality-100 worker finishes in
    /// half the time a quality-0 worker would need.
    pub fn expected_duration(task: &Task, worker_quality: f64) -> Duration {
        let difficulty_factor = 0.5 + 0.1 * f64::from(task.source.difficulty);
        let quality_factor = 1.5 - worker_quality.clamp(0.0, 100.0) / 100.0;
        Self::base_cost(task.kind).mul_f64(difficulty_factor * quality_factor)
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(0.1, 1.0)
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn execute(&self, task: &Task, worker: &WorkerProfile) -> Result<TaskOutcome, ExecuteError> {
        let duration = Self::expected_duration(task, worker.quality_score).mul_f64(self.time_scale);
        tokio::time::sleep(duration).await;

        use rand::RngExt;
        let mut rng = rand::rng();

        if rng.random_range(0.0..1.0) < self.failure_rate {
            return Err(ExecuteError::ProcessingFailed(format!(
                "simulated failure processing {}",
                task.source.locator
            )));
        }

        // Better sources tend to produce cleaner output.
        let floor = 55.0 + 20.0 * task.source.weight;
        Ok(TaskOutcome::new(rng.random_range(floor..100.0)))
    }
}
