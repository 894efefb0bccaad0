//! Worker pool: owns worker creation, removal and availability queries.
//!
//! The pool is the only component that creates or removes workers; the
//! engine guards it with a lock and holds that lock only for the short
//! synchronous sections in here. Workers are kept in creation order, which
//! is also the balancer's tie-break order.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::worker::{Worker, WorkerStatus};
use crate::scheduler::task::WorkerKind;

/// Errors from pool lifecycle operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No worker with the given id.
    #[error("Worker {0} not found in pool")]
    WorkerNotFound(Uuid),

    /// The worker is executing a task and cannot be removed.
    #[error("Worker {0} is busy and cannot be removed")]
    WorkerBusy(Uuid),
}

/// The managed collection of workers.
#[derive(Debug, Default)]
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pool seeded according to a kind distribution.
    pub fn seeded(distribution: &[(WorkerKind, usize)]) -> Self {
        let mut pool = Self::new();
        for (kind, count) in distribution {
            for _ in 0..*count {
                pool.create_worker(*kind);
            }
        }
        pool
    }

    /// Adds a new idle worker of the given kind and returns a snapshot of it.
    pub fn create_worker(&mut self, kind: WorkerKind) -> Worker {
        let worker = Worker::new(kind);
        debug!(worker_id = %worker.id, kind = %kind, "Created worker");
        self.workers.push(worker.clone());
        worker
    }

    /// Removes a worker. Refused while the worker is busy; its current task
    /// would be orphaned otherwise.
    pub fn remove_worker(&mut self, id: Uuid) -> Result<Worker, PoolError> {
        let index = self
            .workers
            .iter()
            .position(|w| w.id == id)
            .ok_or(PoolError::WorkerNotFound(id))?;

        if self.workers[index].is_busy() {
            return Err(PoolError::WorkerBusy(id));
        }

        let worker = self.workers.remove(index);
        info!(worker_id = %id, kind = %worker.kind, "Removed worker");
        Ok(worker)
    }

    /// Snapshots the idle workers, optionally filtered by kind, in creation
    /// order.
    pub fn available(&self, kind: Option<WorkerKind>) -> Vec<Worker> {
        self.workers
            .iter()
            .filter(|w| w.is_idle() && kind.map_or(true, |k| w.kind == k))
            .cloned()
            .collect()
    }

    /// Looks up a worker by id.
    pub fn get(&self, id: Uuid) -> Option<&Worker> {
        self.workers.iter().find(|w| w.id == id)
    }

    /// Mutable lookup, used by the engine to settle execution results.
    pub(crate) fn get_mut(&mut self, id: Uuid) -> Option<&mut Worker> {
        self.workers.iter_mut().find(|w| w.id == id)
    }

    /// Total worker count.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool holds no workers.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Number of workers currently executing a task.
    pub fn busy_count(&self) -> usize {
        self.workers.iter().filter(|w| w.is_busy()).count()
    }

    /// Worker counts per kind.
    pub fn counts_by_kind(&self) -> HashMap<WorkerKind, usize> {
        let mut counts = HashMap::new();
        for worker in &self.workers {
            *counts.entry(worker.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Snapshot of every worker, in creation order.
    pub fn snapshot(&self) -> Vec<Worker> {
        self.workers.clone()
    }

    /// Workers eligible for scale-down removal: not busy, and either offline
    /// or with a rolling quality score below `quality_bar`. Offline workers
    /// are listed first, then ascending quality.
    pub(crate) fn removal_candidates(&self, quality_bar: f64) -> Vec<Uuid> {
        let mut candidates: Vec<&Worker> = self
            .workers
            .iter()
            .filter(|w| {
                !w.is_busy()
                    && (w.status == WorkerStatus::Offline
                        || w.metrics.quality_score < quality_bar)
            })
            .collect();

        candidates.sort_by(|a, b| {
            let a_offline = a.status == WorkerStatus::Offline;
            let b_offline = b.status == WorkerStatus::Offline;
            b_offline
                .cmp(&a_offline)
                .then(a.metrics.quality_score.total_cmp(&b.metrics.quality_score))
        });

        candidates.into_iter().map(|w| w.id).collect()
    }

    /// Returns `Error`/`Offline` workers to service once they have been
    /// quiet for at least `cooldown`. Returns how many were restored.
    pub(crate) fn restore_cooled(&mut self, cooldown: std::time::Duration, now: chrono::DateTime<chrono::Utc>) -> usize {
        let cooldown = match chrono::Duration::from_std(cooldown) {
            Ok(d) => d,
            Err(_) => return 0,
        };

        let mut restored = 0;
        for worker in &mut self.workers {
            let parked = worker.status == WorkerStatus::Error || worker.status == WorkerStatus::Offline;
            if parked && now - worker.metrics.last_activity >= cooldown {
                debug!(worker_id = %worker.id, status = %worker.status, "Restoring worker to service");
                worker.restore();
                restored += 1;
            }
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_distribution() {
        let pool = WorkerPool::seeded(&[
            (WorkerKind::Discovery, 2),
            (WorkerKind::ArticleProcessor, 3),
            (WorkerKind::Validator, 1),
        ]);

        assert_eq!(pool.len(), 6);
        let counts = pool.counts_by_kind();
        assert_eq!(counts[&WorkerKind::Discovery], 2);
        assert_eq!(counts[&WorkerKind::ArticleProcessor], 3);
        assert_eq!(counts[&WorkerKind::Validator], 1);
    }

    #[test]
    fn test_available_filters_by_kind_and_status() {
        let mut pool = WorkerPool::new();
        let discovery = pool.create_worker(WorkerKind::Discovery);
        let validator = pool.create_worker(WorkerKind::Validator);
        pool.get_mut(validator.id).unwrap().begin(Uuid::new_v4());

        let idle = pool.available(None);
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].id, discovery.id);

        assert!(pool.available(Some(WorkerKind::Validator)).is_empty());
        assert_eq!(pool.available(Some(WorkerKind::Discovery)).len(), 1);
    }

    #[test]
    fn test_available_preserves_creation_order() {
        let mut pool = WorkerPool::new();
        let first = pool.create_worker(WorkerKind::Validator);
        let second = pool.create_worker(WorkerKind::Validator);
        let third = pool.create_worker(WorkerKind::Validator);

        let ids: Vec<Uuid> = pool.available(None).iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
    }

    #[test]
    fn test_remove_refuses_busy_worker() {
        let mut pool = WorkerPool::new();
        let worker = pool.create_worker(WorkerKind::StatsProcessor);
        pool.get_mut(worker.id).unwrap().begin(Uuid::new_v4());

        assert!(matches!(
            pool.remove_worker(worker.id),
            Err(PoolError::WorkerBusy(_))
        ));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_remove_unknown_worker() {
        let mut pool = WorkerPool::new();
        assert!(matches!(
            pool.remove_worker(Uuid::new_v4()),
            Err(PoolError::WorkerNotFound(_))
        ));
    }

    #[test]
    fn test_remove_idle_worker() {
        let mut pool = WorkerPool::new();
        let worker = pool.create_worker(WorkerKind::QualityControl);

        let removed = pool.remove_worker(worker.id).expect("idle worker removable");
        assert_eq!(removed.id, worker.id);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_removal_candidates_prefer_offline_then_low_quality() {
        let mut pool = WorkerPool::new();
        let healthy = pool.create_worker(WorkerKind::Validator);
        let weak = pool.create_worker(WorkerKind::Validator);
        let offline = pool.create_worker(WorkerKind::Validator);

        pool.get_mut(weak.id).unwrap().metrics.quality_score = 30.0;
        pool.get_mut(offline.id).unwrap().mark_offline();

        let candidates = pool.removal_candidates(60.0);
        assert_eq!(candidates, vec![offline.id, weak.id]);
        assert!(!candidates.contains(&healthy.id));
    }

    #[test]
    fn test_restore_cooled_workers() {
        let mut pool = WorkerPool::new();
        let worker = pool.create_worker(WorkerKind::Validator);
        pool.get_mut(worker.id).unwrap().mark_offline();

        // Not yet cooled down.
        let restored = pool.restore_cooled(std::time::Duration::from_secs(60), chrono::Utc::now());
        assert_eq!(restored, 0);

        let later = chrono::Utc::now() + chrono::Duration::seconds(120);
        let restored = pool.restore_cooled(std::time::Duration::from_secs(60), later);
        assert_eq!(restored, 1);
        assert!(pool.get(worker.id).unwrap().is_idle());
    }

    #[test]
    fn test_busy_count() {
        let mut pool = WorkerPool::new();
        let a = pool.create_worker(WorkerKind::Discovery);
        pool.create_worker(WorkerKind::Discovery);

        assert_eq!(pool.busy_count(), 0);
        pool.get_mut(a.id).unwrap().begin(Uuid::new_v4());
        assert_eq!(pool.busy_count(), 1);
    }
}
