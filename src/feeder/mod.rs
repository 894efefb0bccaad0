//! Discovery feeder: a periodic producer that enqueues new work.
//!
//! The feeder polls a pluggable [`DiscoverySource`] on an interval and
//! pushes everything it finds through the engine's single ingestion point.
//! Collaborators implement the trait for real feeds; the bundled
//! [`SimulatedDiscoverySource`] fabricates a rotating mix of work for demo
//! runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::EngineHandle;
use crate::scheduler::{SourceKind, TaskRequest, TaskSource, WorkerKind};

/// A place new work comes from.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Name of the source, used in logs.
    fn name(&self) -> &str;

    /// Returns the next batch of task requests. An empty batch is fine.
    async fn poll(&self) -> Vec<TaskRequest>;
}

/// Periodic producer pushing a [`DiscoverySource`] into the engine.
pub struct DiscoveryFeeder {
    source: Arc<dyn DiscoverySource>,
    interval: Duration,
}

impl DiscoveryFeeder {
    /// Creates a feeder polling `source` every `interval`.
    pub fn new(source: Arc<dyn DiscoverySource>, interval: Duration) -> Self {
        Self { source, interval }
    }

    /// Spawns the feed loop. It polls until the engine shuts down; rejected
    /// requests are logged and dropped, they never stop the loop.
    pub fn spawn(&self, engine: EngineHandle) -> JoinHandle<()> {
        let source = Arc::clone(&self.source);
        let interval = self.interval;
        let mut shutdown_rx = engine.shutdown_signal();

        tokio::spawn(async move {
            info!(source = source.name(), "Discovery feeder started");
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let batch = source.poll().await;
                        for request in batch {
                            match engine.add_task(request) {
                                Ok(task_id) => {
                                    debug!(source = source.name(), task_id = %task_id, "Discovered task enqueued");
                                }
                                Err(err) => {
                                    warn!(source = source.name(), error = %err, "Discovered task rejected");
                                }
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            info!(source = source.name(), "Discovery feeder stopped");
        })
    }
}

/// Fabricates a rotating mix of work across kinds and source categories.
///
/// Kinds rotate deterministically so every worker type sees traffic;
/// priority and difficulty are drawn randomly to exercise the balancer.
pub struct SimulatedDiscoverySource {
    batch_size: usize,
    counter: AtomicUsize,
}

impl SimulatedDiscoverySource {
    /// Creates a source producing `batch_size` requests per poll.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            counter: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DiscoverySource for SimulatedDiscoverySource {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn poll(&self) -> Vec<TaskRequest> {
        use rand::RngExt;
        let mut rng = rand::rng();

        (0..self.batch_size)
            .map(|_| {
                let n = self.counter.fetch_add(1, Ordering::Relaxed);
                let kind = WorkerKind::ALL[n % WorkerKind::ALL.len()];
                let source_kind = match n % 5 {
                    0 => SourceKind::Feed,
                    1 => SourceKind::Api,
                    2 => SourceKind::Scrape,
                    3 => SourceKind::Stream,
                    _ => SourceKind::Upload,
                };

                TaskRequest::new(
                    kind,
                    rng.random_range(0..=10),
                    TaskSource::new(
                        source_kind,
                        format!("https://sources.example/{}/{}", source_kind, n),
                        rng.random_range(1..=10),
                        rng.random_range(0.3..1.0),
                    ),
                    Duration::from_secs(rng.random_range(5..60)),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_source_produces_valid_batches() {
        let source = SimulatedDiscoverySource::new(14);
        let batch = source.poll().await;

        assert_eq!(batch.len(), 14);
        for request in &batch {
            assert!(request.priority <= 10);
            assert!((1..=10).contains(&request.source.difficulty));
            assert!((0.0..=1.0).contains(&request.source.weight));
            assert!(!request.source.locator.is_empty());
            assert!(!request.estimated_duration.is_zero());
        }
    }

    #[tokio::test]
    async fn test_simulated_source_rotates_kinds() {
        let source = SimulatedDiscoverySource::new(WorkerKind::ALL.len());
        let batch = source.poll().await;

        let kinds: std::collections::HashSet<_> = batch.iter().map(|r| r.kind).collect();
        assert_eq!(kinds.len(), WorkerKind::ALL.len());
    }
}
