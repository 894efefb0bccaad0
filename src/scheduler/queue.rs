//! In-process priority task queue.
//!
//! The queue accepts validated tasks and hands the scheduler a stable
//! priority ordering: higher priority first, FIFO within a priority band.
//! All mutation goes through one internal lock; the scheduler loop is the
//! only dequeuer, producers only append.
//!
//! # Ordering
//!
//! Each accepted task gets a monotonically increasing sequence number.
//! Sorting by `(priority desc, sequence asc)` yields the dispatch order.
//! Retried tasks receive a fresh sequence number (they rejoin the back of
//! their demoted band); tasks returned after a dispatch fault are restored
//! at the front of their band, unchanged.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::task::{Task, TaskRequest, MAX_PRIORITY};
use crate::workers::WorkerKind;

/// Errors raised when a task request fails validation at the ingestion
/// point. Invalid requests are rejected synchronously and never enqueued.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Priority outside the 0-10 scale.
    #[error("Invalid priority {0}: must be between 0 and 10")]
    InvalidPriority(u8),

    /// Difficulty outside the 1-10 scale.
    #[error("Invalid processing difficulty {0}: must be between 1 and 10")]
    InvalidDifficulty(u8),

    /// Source weight outside `0.0..=1.0`.
    #[error("Invalid source weight {0}: must be between 0.0 and 1.0")]
    InvalidWeight(f64),

    /// Source locator is empty.
    #[error("Source locator cannot be empty")]
    EmptyLocator,

    /// Estimated duration of zero.
    #[error("Estimated duration must be greater than zero")]
    ZeroDuration,

    /// Deadline already in the past at enqueue time.
    #[error("Deadline {0} is already in the past")]
    DeadlinePassed(DateTime<Utc>),
}

/// Point-in-time queue statistics.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Number of tasks waiting for dispatch.
    pub pending: usize,
    /// Pending tasks per worker kind, deepest backlog first.
    pub depth_by_kind: Vec<(WorkerKind, usize)>,
}

struct Slot {
    seq: i64,
    task: Task,
}

struct QueueInner {
    pending: Vec<Slot>,
    next_back: i64,
    next_front: i64,
}

/// Mutex-guarded in-process task queue.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
}

impl TaskQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                pending: Vec::new(),
                next_back: 0,
                next_front: -1,
            }),
        }
    }

    /// Validates a request, stamps it into a [`Task`] and appends it.
    ///
    /// `default_ttl` supplies the deadline for requests that carry none.
    ///
    /// # Errors
    ///
    /// Returns a [`QueueError`] describing the first invalid field; nothing
    /// is enqueued on error.
    pub fn enqueue(&self, request: TaskRequest, default_ttl: Duration) -> Result<Task, QueueError> {
        validate(&request)?;

        let task = Task::from_request(request, default_ttl);
        let mut inner = self.lock();
        let seq = inner.next_back;
        inner.next_back += 1;
        inner.pending.push(Slot {
            seq,
            task: task.clone(),
        });
        Ok(task)
    }

    /// Re-enqueues a task after a failed attempt.
    ///
    /// The caller has already updated the retry bookkeeping; the task joins
    /// the back of its (possibly demoted) priority band.
    pub fn requeue(&self, task: Task) {
        let mut inner = self.lock();
        let seq = inner.next_back;
        inner.next_back += 1;
        inner.pending.push(Slot { seq, task });
    }

    /// Returns a task to the front of its priority band, unchanged.
    ///
    /// Used when dispatch itself failed (the worker, not the task, was at
    /// fault) so the task keeps its position and retry budget.
    pub fn restore(&self, task: Task) {
        let mut inner = self.lock();
        let seq = inner.next_front;
        inner.next_front -= 1;
        inner.pending.push(Slot { seq, task });
    }

    /// Removes a specific task, typically one the balancer just assigned.
    pub fn remove(&self, id: Uuid) -> Option<Task> {
        let mut inner = self.lock();
        let index = inner.pending.iter().position(|slot| slot.task.id == id)?;
        Some(inner.pending.swap_remove(index).task)
    }

    /// Drains every queued task whose deadline has passed at `now`.
    pub fn take_expired(&self, now: DateTime<Utc>) -> Vec<Task> {
        let mut inner = self.lock();
        let mut expired = Vec::new();
        let mut index = 0;
        while index < inner.pending.len() {
            if inner.pending[index].task.is_expired(now) {
                expired.push(inner.pending.swap_remove(index).task);
            } else {
                index += 1;
            }
        }
        expired
    }

    /// Snapshot of the pending tasks in dispatch order.
    pub fn sorted_pending(&self) -> Vec<Task> {
        let inner = self.lock();
        let mut slots: Vec<(i64, Task)> = inner
            .pending
            .iter()
            .map(|slot| (slot.seq, slot.task.clone()))
            .collect();
        drop(inner);

        slots.sort_by(|a, b| b.1.priority.cmp(&a.1.priority).then(a.0.cmp(&b.0)));
        slots.into_iter().map(|(_, task)| task).collect()
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current statistics, backlog depth per kind sorted deepest first.
    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        let mut depths: HashMap<WorkerKind, usize> = HashMap::new();
        for slot in &inner.pending {
            *depths.entry(slot.task.kind).or_insert(0) += 1;
        }
        let pending = inner.pending.len();
        drop(inner);

        let mut depth_by_kind: Vec<(WorkerKind, usize)> = depths.into_iter().collect();
        depth_by_kind.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.to_string().cmp(&b.0.to_string())));

        QueueStats {
            pending,
            depth_by_kind,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        // A poisoned lock means a panic mid-mutation; the queue state is
        // still structurally sound, so recover the guard and continue.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(request: &TaskRequest) -> Result<(), QueueError> {
    if request.priority > MAX_PRIORITY {
        return Err(QueueError::InvalidPriority(request.priority));
    }
    if !(1..=10).contains(&request.source.difficulty) {
        return Err(QueueError::InvalidDifficulty(request.source.difficulty));
    }
    if !(0.0..=1.0).contains(&request.source.weight) {
        return Err(QueueError::InvalidWeight(request.source.weight));
    }
    if request.source.locator.trim().is_empty() {
        return Err(QueueError::EmptyLocator);
    }
    if request.estimated_duration.is_zero() {
        return Err(QueueError::ZeroDuration);
    }
    if let Some(deadline) = request.deadline {
        if deadline <= Utc::now() {
            return Err(QueueError::DeadlinePassed(deadline));
        }
    }
    Ok(())
}
