//! System-wide metrics aggregation and threshold alerts.
//!
//! The aggregator keeps the full completion history and recomputes every
//! derived metric from it on each monitoring tick; nothing in
//! [`SystemMetrics`] is hand-mutated anywhere else. Throughput is computed
//! from the explicit `completed_at` timestamp each record carries.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workers::{Worker, WorkerKind};

/// Alert thresholds compared against the recomputed system metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceThresholds {
    /// Ceiling on the average processing time.
    pub max_processing_time: Duration,
    /// Floor on system throughput in tasks per minute.
    pub min_throughput_per_minute: f64,
    /// Ceiling on the system error rate, `0.0..=1.0`.
    pub max_error_rate: f64,
    /// Floor on the average quality score, 0-100.
    pub min_quality_score: f64,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            max_processing_time: Duration::from_secs(60),
            min_throughput_per_minute: 5.0,
            max_error_rate: 0.25,
            min_quality_score: 50.0,
        }
    }
}

impl PerformanceThresholds {
    /// Compares metrics against the thresholds, returning one alert per
    /// breach. Throughput and quality are only judged once at least one
    /// attempt has settled; an engine that has not run yet is not degraded.
    pub fn check(&self, metrics: &SystemMetrics) -> Vec<ThresholdAlert> {
        let mut alerts = Vec::new();

        if metrics.avg_processing > self.max_processing_time {
            alerts.push(ThresholdAlert::ProcessingTime {
                actual: metrics.avg_processing,
                limit: self.max_processing_time,
            });
        }
        if metrics.total_processed > 0 {
            if metrics.throughput_per_minute < self.min_throughput_per_minute {
                alerts.push(ThresholdAlert::Throughput {
                    actual: metrics.throughput_per_minute,
                    floor: self.min_throughput_per_minute,
                });
            }
            if metrics.avg_quality < self.min_quality_score {
                alerts.push(ThresholdAlert::Quality {
                    actual: metrics.avg_quality,
                    floor: self.min_quality_score,
                });
            }
        }
        if metrics.error_rate > self.max_error_rate {
            alerts.push(ThresholdAlert::ErrorRate {
                actual: metrics.error_rate,
                limit: self.max_error_rate,
            });
        }

        alerts
    }
}

/// One breached threshold, raised as a `performance-warning` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "alert", rename_all = "snake_case")]
pub enum ThresholdAlert {
    /// Average processing time over the ceiling.
    ProcessingTime { actual: Duration, limit: Duration },
    /// Throughput under the floor.
    Throughput { actual: f64, floor: f64 },
    /// Error rate over the ceiling.
    ErrorRate { actual: f64, limit: f64 },
    /// Average quality under the floor.
    Quality { actual: f64, floor: f64 },
    /// Scale-up refused at the worker ceiling.
    Capacity { current: usize, ceiling: usize },
}

impl std::fmt::Display for ThresholdAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThresholdAlert::ProcessingTime { actual, limit } => write!(
                f,
                "average processing time {:.1}s over limit {:.1}s",
                actual.as_secs_f64(),
                limit.as_secs_f64()
            ),
            ThresholdAlert::Throughput { actual, floor } => {
                write!(f, "throughput {:.1}/min under floor {:.1}/min", actual, floor)
            }
            ThresholdAlert::ErrorRate { actual, limit } => {
                write!(f, "error rate {:.2} over limit {:.2}", actual, limit)
            }
            ThresholdAlert::Quality { actual, floor } => {
                write!(f, "average quality {:.1} under floor {:.1}", actual, floor)
            }
            ThresholdAlert::Capacity { current, ceiling } => {
                write!(f, "worker ceiling reached ({}/{})", current, ceiling)
            }
        }
    }
}

/// One settled execution attempt, success or failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// Task the attempt belonged to.
    pub task_id: Uuid,
    /// Capability class of the task.
    pub kind: WorkerKind,
    /// Worker that ran the attempt.
    pub worker_id: Uuid,
    /// When the attempt settled. Throughput derives from this field.
    pub completed_at: DateTime<Utc>,
    /// Wall-clock duration of the attempt.
    pub duration: Duration,
    /// Quality score of the output; zero for failed attempts.
    pub quality_score: f64,
    /// Whether the attempt succeeded.
    pub success: bool,
}

/// Derived system-wide metrics, recomputed on every monitoring tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SystemMetrics {
    /// Total settled attempts (successes and failures).
    pub total_processed: u64,
    /// Successful completions.
    pub completed: u64,
    /// Tasks that exhausted their retry budget or expired while queued.
    pub terminal_failures: u64,
    /// Average attempt duration.
    pub avg_processing: Duration,
    /// Successful completions per minute over the recent window.
    pub throughput_per_minute: f64,
    /// Failed attempts over total attempts, `0.0..=1.0`.
    pub error_rate: f64,
    /// Average quality score across successful completions.
    pub avg_quality: f64,
    /// Percentage of workers currently busy, 0-100.
    pub utilization: f64,
    /// Pending tasks at recomputation time.
    pub queue_length: usize,
}

struct AggregatorInner {
    records: Vec<CompletionRecord>,
    terminal_failures: u64,
    last: SystemMetrics,
}

/// Accumulates completion history and recomputes [`SystemMetrics`].
pub struct MetricsAggregator {
    /// Window over which throughput is measured.
    window: Duration,
    inner: Mutex<AggregatorInner>,
}

impl MetricsAggregator {
    /// Creates an aggregator with the given throughput window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inner: Mutex::new(AggregatorInner {
                records: Vec::new(),
                terminal_failures: 0,
                last: SystemMetrics::default(),
            }),
        }
    }

    /// Records a settled attempt.
    pub fn record(&self, record: CompletionRecord) {
        self.lock().records.push(record);
    }

    /// Counts a terminal task failure (budget exhausted or expired while
    /// queued).
    pub fn record_terminal_failure(&self) {
        self.lock().terminal_failures += 1;
    }

    /// Number of successful completions so far.
    pub fn completed_count(&self) -> u64 {
        self.lock().records.iter().filter(|r| r.success).count() as u64
    }

    /// Recomputes every derived metric from the history plus the live
    /// worker/queue state, stores the result and returns it.
    pub fn recompute(&self, queue_length: usize, workers: &[Worker]) -> SystemMetrics {
        let now = Utc::now();
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::minutes(1));
        let mut inner = self.lock();

        let total = inner.records.len() as u64;
        let completed = inner.records.iter().filter(|r| r.success).count() as u64;
        let failed = total - completed;

        let avg_processing = if total > 0 {
            let sum: f64 = inner.records.iter().map(|r| r.duration.as_secs_f64()).sum();
            Duration::from_secs_f64(sum / total as f64)
        } else {
            Duration::ZERO
        };

        let recent = inner
            .records
            .iter()
            .filter(|r| r.success && now - r.completed_at <= window)
            .count() as f64;
        let window_minutes = self.window.as_secs_f64() / 60.0;
        let throughput_per_minute = if window_minutes > 0.0 {
            recent / window_minutes
        } else {
            0.0
        };

        let error_rate = if total > 0 {
            failed as f64 / total as f64
        } else {
            0.0
        };

        let avg_quality = if completed > 0 {
            inner
                .records
                .iter()
                .filter(|r| r.success)
                .map(|r| r.quality_score)
                .sum::<f64>()
                / completed as f64
        } else {
            0.0
        };

        let utilization = if workers.is_empty() {
            0.0
        } else {
            100.0 * workers.iter().filter(|w| w.is_busy()).count() as f64 / workers.len() as f64
        };

        let metrics = SystemMetrics {
            total_processed: total,
            completed,
            terminal_failures: inner.terminal_failures,
            avg_processing,
            throughput_per_minute,
            error_rate,
            avg_quality,
            utilization,
            queue_length,
        };

        inner.last = metrics.clone();
        metrics
    }

    /// The metrics stored by the most recent [`recompute`](Self::recompute).
    pub fn last(&self) -> SystemMetrics {
        self.lock().last.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AggregatorInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
