//! Adaptive pool scaling.
//!
//! On a slow tick the scaler reads three signals from the latest system
//! metrics: queue length, average processing time and error rate. Pressure
//! on any signal grows the pool toward the hard ceiling; a comfortably idle
//! system shrinks it toward the hard floor, shedding only idle workers that
//! are offline or under-performing. Growth and shrinkage never happen in
//! the same tick; growth wins when both would fire.

use tracing::{debug, info, warn};

use super::config::EngineConfig;
use crate::metrics::SystemMetrics;
use crate::workers::{Worker, WorkerKind, WorkerPool};

/// What a scaler tick did.
#[derive(Debug)]
pub enum ScaleOutcome {
    /// No condition fired.
    Held,
    /// Growth was needed but the pool is at the hard ceiling.
    AtCeiling { current: usize, ceiling: usize },
    /// Workers were added.
    Grew { workers: Vec<Worker> },
    /// Idle under-performers were removed.
    Shrank { removed: Vec<Worker> },
}

/// Threshold-driven pool resizing.
///
/// The scaler owns no state of its own; every decision is a function of the
/// configuration and the metrics snapshot handed to [`tick`](Self::tick),
/// which keeps the policy directly testable.
pub struct AdaptiveScaler {
    config: EngineConfig,
}

impl AdaptiveScaler {
    /// Creates a scaler bound to the engine configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Runs one scaling decision against the pool.
    ///
    /// `demand` is the queue backlog per kind, deepest first; scale-up adds
    /// workers for those kinds. The caller holds the pool lock.
    pub fn tick(
        &self,
        pool: &mut WorkerPool,
        metrics: &SystemMetrics,
        demand: &[(WorkerKind, usize)],
    ) -> ScaleOutcome {
        if self.needs_growth(metrics) {
            return self.scale_up(pool, demand);
        }
        if self.allows_shrink(metrics) {
            return self.scale_down(pool);
        }

        debug!(
            queue_length = metrics.queue_length,
            error_rate = metrics.error_rate,
            "Scaler held pool size"
        );
        ScaleOutcome::Held
    }

    /// Any pressure signal triggers growth.
    fn needs_growth(&self, metrics: &SystemMetrics) -> bool {
        let thresholds = &self.config.thresholds;
        metrics.queue_length > self.config.queue_high_water
            || metrics.avg_processing > thresholds.max_processing_time
            || metrics.error_rate > thresholds.max_error_rate
    }

    /// Shrinking requires a short queue and both load signals comfortably
    /// under threshold (at most half the configured ceiling).
    fn allows_shrink(&self, metrics: &SystemMetrics) -> bool {
        let thresholds = &self.config.thresholds;
        metrics.queue_length < self.config.queue_low_water
            && metrics.avg_processing <= thresholds.max_processing_time / 2
            && metrics.error_rate <= thresholds.max_error_rate / 2.0
    }

    fn scale_up(&self, pool: &mut WorkerPool, demand: &[(WorkerKind, usize)]) -> ScaleOutcome {
        let ceiling = self.config.worker_ceiling();
        let current = pool.len();

        if current >= ceiling {
            warn!(
                current = current,
                ceiling = ceiling,
                "Scale-up refused: worker ceiling reached"
            );
            return ScaleOutcome::AtCeiling { current, ceiling };
        }

        let headroom = ceiling - current;
        let to_add = self.config.scale_step.min(headroom);

        // Add workers for the kinds under the most queue pressure; fall back
        // to the configured distribution when growth was triggered by load
        // signals with an empty queue.
        let kinds: Vec<WorkerKind> = if demand.is_empty() {
            self.config
                .worker_distribution
                .iter()
                .map(|(kind, _)| *kind)
                .collect()
        } else {
            demand.iter().map(|(kind, _)| *kind).collect()
        };

        let workers: Vec<Worker> = (0..to_add)
            .map(|index| pool.create_worker(kinds[index % kinds.len()]))
            .collect();

        info!(
            added = workers.len(),
            worker_count = pool.len(),
            "Scaled worker pool up"
        );
        ScaleOutcome::Grew { workers }
    }

    fn scale_down(&self, pool: &mut WorkerPool) -> ScaleOutcome {
        let floor = self.config.worker_floor();
        let current = pool.len();

        if current <= floor {
            debug!(current = current, floor = floor, "Scale-down skipped at floor");
            return ScaleOutcome::Held;
        }

        let budget = self.config.scale_down_batch.min(current - floor);
        let candidates = pool.removal_candidates(self.config.thresholds.min_quality_score);

        let mut removed = Vec::new();
        for id in candidates.into_iter().take(budget) {
            match pool.remove_worker(id) {
                Ok(worker) => removed.push(worker),
                // A candidate may have picked up work since the snapshot.
                Err(err) => debug!(worker_id = %id, error = %err, "Skipped removal"),
            }
        }

        if removed.is_empty() {
            return ScaleOutcome::Held;
        }

        info!(
            removed = removed.len(),
            worker_count = pool.len(),
            "Scaled worker pool down"
        );
        ScaleOutcome::Shrank { removed }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn config() -> EngineConfig {
        // max_workers 8 -> ceiling 12, floor 4.
        EngineConfig::default()
    }

    fn pressured_metrics(queue_length: usize) -> SystemMetrics {
        SystemMetrics {
            queue_length,
            ..SystemMetrics::default()
        }
    }

    fn calm_metrics() -> SystemMetrics {
        SystemMetrics {
            queue_length: 0,
            avg_processing: Duration::from_secs(1),
            error_rate: 0.0,
            ..SystemMetrics::default()
        }
    }

    #[test]
    fn test_holds_between_watermarks() {
        let scaler = AdaptiveScaler::new(config());
        let mut pool = WorkerPool::seeded(&[(WorkerKind::Validator, 8)]);

        let metrics = SystemMetrics {
            queue_length: 10,
            avg_processing: Duration::from_secs(40),
            error_rate: 0.2,
            ..SystemMetrics::default()
        };

        assert!(matches!(
            scaler.tick(&mut pool, &metrics, &[]),
            ScaleOutcome::Held
        ));
        assert_eq!(pool.len(), 8);
    }

    #[test]
    fn test_queue_pressure_grows_demand_kinds() {
        let scaler = AdaptiveScaler::new(config());
        let mut pool = WorkerPool::seeded(&[(WorkerKind::Validator, 8)]);

        let outcome = scaler.tick(
            &mut pool,
            &pressured_metrics(50),
            &[(WorkerKind::VideoProcessor, 30), (WorkerKind::Validator, 20)],
        );

        match outcome {
            ScaleOutcome::Grew { workers } => {
                assert_eq!(workers.len(), 2);
                assert_eq!(workers[0].kind, WorkerKind::VideoProcessor);
                assert_eq!(workers[1].kind, WorkerKind::Validator);
            }
            other => panic!("expected growth, got {:?}", other),
        }
        assert_eq!(pool.len(), 10);
    }

    #[test]
    fn test_error_rate_pressure_grows_without_queue() {
        let scaler = AdaptiveScaler::new(config());
        let mut pool = WorkerPool::seeded(&[(WorkerKind::Validator, 8)]);

        let metrics = SystemMetrics {
            error_rate: 0.9,
            ..calm_metrics()
        };

        assert!(matches!(
            scaler.tick(&mut pool, &metrics, &[]),
            ScaleOutcome::Grew { .. }
        ));
    }

    #[test]
    fn test_growth_refused_at_ceiling() {
        let scaler = AdaptiveScaler::new(config());
        let mut pool = WorkerPool::seeded(&[(WorkerKind::Validator, 12)]);

        let outcome = scaler.tick(&mut pool, &pressured_metrics(50), &[]);
        assert!(matches!(
            outcome,
            ScaleOutcome::AtCeiling {
                current: 12,
                ceiling: 12
            }
        ));
        assert_eq!(pool.len(), 12);
    }

    #[test]
    fn test_growth_clamped_to_ceiling() {
        let scaler = AdaptiveScaler::new(config());
        let mut pool = WorkerPool::seeded(&[(WorkerKind::Validator, 11)]);

        match scaler.tick(&mut pool, &pressured_metrics(50), &[]) {
            ScaleOutcome::Grew { workers } => assert_eq!(workers.len(), 1),
            other => panic!("expected growth, got {:?}", other),
        }
        assert_eq!(pool.len(), 12);
    }

    #[test]
    fn test_shrink_removes_only_under_performers() {
        let scaler = AdaptiveScaler::new(config());
        let mut pool = WorkerPool::seeded(&[(WorkerKind::Validator, 8)]);

        let weak_ids: Vec<_> = pool.snapshot().iter().take(2).map(|w| w.id).collect();
        for id in &weak_ids {
            pool.get_mut(*id).unwrap().metrics.quality_score = 20.0;
        }

        match scaler.tick(&mut pool, &calm_metrics(), &[]) {
            ScaleOutcome::Shrank { removed } => {
                assert_eq!(removed.len(), 2);
                for worker in &removed {
                    assert!(weak_ids.contains(&worker.id));
                }
            }
            other => panic!("expected shrink, got {:?}", other),
        }
        assert_eq!(pool.len(), 6);
    }

    #[test]
    fn test_shrink_skips_healthy_pool() {
        let scaler = AdaptiveScaler::new(config());
        let mut pool = WorkerPool::seeded(&[(WorkerKind::Validator, 8)]);

        // All workers carry the neutral quality of 100, above the bar.
        assert!(matches!(
            scaler.tick(&mut pool, &calm_metrics(), &[]),
            ScaleOutcome::Held
        ));
        assert_eq!(pool.len(), 8);
    }

    #[test]
    fn test_floor_respected_even_with_weak_workers() {
        let scaler = AdaptiveScaler::new(config());
        let mut pool = WorkerPool::seeded(&[(WorkerKind::Validator, 4)]);

        for worker in pool.snapshot() {
            pool.get_mut(worker.id).unwrap().metrics.quality_score = 10.0;
        }

        assert!(matches!(
            scaler.tick(&mut pool, &calm_metrics(), &[]),
            ScaleOutcome::Held
        ));
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn test_growth_takes_precedence_over_shrink() {
        // Queue empty and calm load, but error rate breaches: growth fires
        // even though the shrink queue condition also holds.
        let scaler = AdaptiveScaler::new(config());
        let mut pool = WorkerPool::seeded(&[(WorkerKind::Validator, 8)]);

        let metrics = SystemMetrics {
            queue_length: 0,
            avg_processing: Duration::from_secs(1),
            error_rate: 0.5,
            ..SystemMetrics::default()
        };

        assert!(matches!(
            scaler.tick(&mut pool, &metrics, &[]),
            ScaleOutcome::Grew { .. }
        ));
    }
}
