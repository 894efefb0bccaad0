//! Worker model: a typed execution slot with rolling performance metrics.
//!
//! A worker holds at most one task at a time; its `status` is `Busy` exactly
//! while `current_task` is set. The rolling metrics feed the intelligent
//! balancing policy and the scaler's removal decisions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scheduler::task::WorkerKind;

/// Smoothing factor for the rolling quality score.
const QUALITY_ALPHA: f64 = 0.3;

/// Smoothing factor for the rolling error rate.
const ERROR_ALPHA: f64 = 0.25;

/// Smoothing factor for the uptime percentage.
const UPTIME_ALPHA: f64 = 0.1;

/// Execution state of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Ready for assignment.
    Idle,
    /// Executing its current task.
    Busy,
    /// Rolling error rate crossed the acceptable bar; excluded from
    /// assignment until restored.
    Error,
    /// Stopped responding (execution timed out); excluded from assignment
    /// until restored or removed.
    Offline,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Busy => write!(f, "busy"),
            WorkerStatus::Error => write!(f, "error"),
            WorkerStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Rolling per-worker performance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMetrics {
    /// Lifetime successful completions.
    pub tasks_completed: u64,
    /// Lifetime failed attempts (including timeouts).
    pub tasks_failed: u64,
    /// Rolling average processing time across attempts.
    pub avg_processing: Duration,
    /// Rolling error rate, `0.0..=1.0`.
    pub error_rate: f64,
    /// Rolling quality score, 0-100. New workers start at 100.
    pub quality_score: f64,
    /// Rolling availability percentage.
    pub uptime_pct: f64,
    /// Last time this worker settled an attempt or changed state.
    pub last_activity: DateTime<Utc>,
}

impl WorkerMetrics {
    fn neutral() -> Self {
        Self {
            tasks_completed: 0,
            tasks_failed: 0,
            avg_processing: Duration::ZERO,
            error_rate: 0.0,
            quality_score: 100.0,
            uptime_pct: 100.0,
            last_activity: Utc::now(),
        }
    }

    /// Total attempts this worker has settled.
    pub fn attempts(&self) -> u64 {
        self.tasks_completed + self.tasks_failed
    }

    fn update_avg_processing(&mut self, duration: Duration) {
        let n = self.attempts();
        if n <= 1 {
            self.avg_processing = duration;
        } else {
            // Incremental average: avg = avg + (new - avg) / n
            let old = self.avg_processing.as_secs_f64();
            let updated = old + (duration.as_secs_f64() - old) / n as f64;
            self.avg_processing = Duration::from_secs_f64(updated);
        }
    }
}

/// A typed execution slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    /// Unique worker id.
    pub id: Uuid,
    /// Capability class; only same-kind tasks are routed here under the
    /// type-matching policies.
    pub kind: WorkerKind,
    /// Current execution state.
    pub status: WorkerStatus,
    /// The task being executed, if any. Owned exclusively by this worker's
    /// execution path while set.
    pub current_task: Option<Uuid>,
    /// Rolling performance record.
    pub metrics: WorkerMetrics,
    /// Informational capability tags for this worker's kind.
    pub capabilities: Vec<String>,
    /// Creation time; pool iteration order follows it.
    pub created_at: DateTime<Utc>,
}

impl Worker {
    /// Creates an idle worker with neutral metrics.
    pub fn new(kind: WorkerKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: WorkerStatus::Idle,
            current_task: None,
            metrics: WorkerMetrics::neutral(),
            capabilities: kind.capabilities().iter().map(|c| c.to_string()).collect(),
            created_at: Utc::now(),
        }
    }

    /// Whether this worker can take an assignment right now.
    pub fn is_idle(&self) -> bool {
        self.status == WorkerStatus::Idle
    }

    /// Whether this worker is executing a task.
    pub fn is_busy(&self) -> bool {
        self.status == WorkerStatus::Busy
    }

    /// Claims a task for execution. Returns `false` without mutating if the
    /// worker is not idle, so a racing dispatch can back out cleanly.
    pub(crate) fn begin(&mut self, task_id: Uuid) -> bool {
        if !self.is_idle() {
            return false;
        }
        self.status = WorkerStatus::Busy;
        self.current_task = Some(task_id);
        self.metrics.last_activity = Utc::now();
        true
    }

    /// Settles a successful attempt: updates the rolling metrics and returns
    /// the worker to `Idle`. A success also recovers a worker that was in
    /// `Error` state.
    pub(crate) fn complete(&mut self, quality_score: f64, duration: Duration) {
        self.metrics.tasks_completed += 1;
        self.metrics.update_avg_processing(duration);
        self.metrics.quality_score = self.metrics.quality_score * (1.0 - QUALITY_ALPHA)
            + quality_score.clamp(0.0, 100.0) * QUALITY_ALPHA;
        self.metrics.error_rate *= 1.0 - ERROR_ALPHA;
        self.metrics.uptime_pct =
            self.metrics.uptime_pct * (1.0 - UPTIME_ALPHA) + 100.0 * UPTIME_ALPHA;
        self.metrics.last_activity = Utc::now();
        self.current_task = None;
        self.status = WorkerStatus::Idle;
    }

    /// Settles a failed attempt. The rolling error rate moves toward 1 and
    /// the quality score decays; if the error rate crosses `error_bar` the
    /// worker is parked in `Error` state instead of returning to `Idle`.
    pub(crate) fn record_failure(&mut self, duration: Duration, error_bar: f64) {
        self.metrics.tasks_failed += 1;
        self.metrics.update_avg_processing(duration);
        self.metrics.error_rate = self.metrics.error_rate * (1.0 - ERROR_ALPHA) + ERROR_ALPHA;
        self.metrics.quality_score *= 1.0 - QUALITY_ALPHA;
        self.metrics.uptime_pct =
            self.metrics.uptime_pct * (1.0 - UPTIME_ALPHA) + 100.0 * UPTIME_ALPHA;
        self.metrics.last_activity = Utc::now();
        self.current_task = None;
        self.status = if self.metrics.error_rate > error_bar {
            WorkerStatus::Error
        } else {
            WorkerStatus::Idle
        };
    }

    /// Marks the worker offline after it stopped responding. Abandons the
    /// current task reference; the scheduler has already taken over the
    /// task's fate.
    pub(crate) fn mark_offline(&mut self) {
        self.current_task = None;
        self.status = WorkerStatus::Offline;
        self.metrics.uptime_pct *= 1.0 - UPTIME_ALPHA;
        self.metrics.last_activity = Utc::now();
    }

    /// Returns an `Error` or `Offline` worker to service.
    pub(crate) fn restore(&mut self) {
        if self.status == WorkerStatus::Error || self.status == WorkerStatus::Offline {
            self.status = WorkerStatus::Idle;
            self.metrics.last_activity = Utc::now();
        }
    }

    /// Status/task consistency: `Busy` exactly when a task is held.
    pub fn holds_invariant(&self) -> bool {
        (self.status == WorkerStatus::Busy) == self.current_task.is_some()
    }
}
