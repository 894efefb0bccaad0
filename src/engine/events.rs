//! Engine event stream.
//!
//! Collaborators observe the engine through an explicit publish/subscribe
//! bus rather than ambient listener registration: the engine publishes,
//! any number of subscribers receive. Slow subscribers may observe
//! `RecvError::Lagged` and miss events; the engine never blocks on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::metrics::ThresholdAlert;
use crate::scheduler::task::WorkerKind;

/// Capacity of the broadcast channel behind the bus.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything the engine reports to the outside world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EngineEvent {
    /// The engine started its periodic loops.
    SystemStarted { at: DateTime<Utc> },
    /// The engine finished draining and tore down.
    SystemShutdown { at: DateTime<Utc> },
    /// A worker joined the pool and is accepting work.
    WorkerReady { worker_id: Uuid, kind: WorkerKind },
    /// A task passed validation and joined the queue.
    TaskAdded {
        task_id: Uuid,
        kind: WorkerKind,
        priority: u8,
    },
    /// The scheduler paired a task with a worker.
    TaskAssigned { task_id: Uuid, worker_id: Uuid },
    /// An execution attempt succeeded.
    TaskCompleted {
        task_id: Uuid,
        worker_id: Uuid,
        quality_score: f64,
        duration_ms: u64,
    },
    /// An execution attempt failed; the task was re-enqueued for retry.
    TaskFailed {
        task_id: Uuid,
        worker_id: Uuid,
        retry_count: u32,
        error: String,
    },
    /// The task exhausted its retry budget (or expired while queued) and
    /// will not be reattempted.
    TaskFailedPermanently {
        task_id: Uuid,
        retry_count: u32,
        error: String,
    },
    /// A metric breached its configured threshold.
    PerformanceWarning { alert: ThresholdAlert },
    /// The scaler grew the pool.
    ScaledUp { added: usize, worker_count: usize },
    /// The scaler shrank the pool.
    ScaledDown { removed: usize, worker_count: usize },
}

/// Broadcast-backed publish/subscribe bus for [`EngineEvent`]s.
///
/// Cloning the bus is cheap; every clone publishes into the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Creates a bus with the default capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Opens a new subscription. Only events published after this call are
    /// delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event to all current subscribers.
    ///
    /// A send error only means nobody is subscribed, which is fine.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
