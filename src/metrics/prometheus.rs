//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics exposed by the engine and
//! provides functions for initializing, registering, and exporting them.
//! The engine updates these on the same paths that feed the aggregator, so
//! an external scraper sees the numbers the scaler acts on.

use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all engine metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total settled task attempts, labeled by worker kind and outcome.
pub static TASKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Attempt duration in seconds, labeled by worker kind.
pub static TASK_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of tasks waiting in the queue.
pub static QUEUE_DEPTH: OnceLock<Gauge> = OnceLock::new();

/// Number of workers in the pool.
pub static LIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Number of workers currently executing a task.
pub static BUSY_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Distribution of output quality scores (0-100).
pub static QUALITY_SCORE: OnceLock<Histogram> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup; repeated calls are idempotent.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due
/// to duplicate metric names.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let tasks_total = CounterVec::new(
        Opts::new("taskforge_tasks_total", "Total settled task attempts"),
        &["kind", "outcome"],
    )?;

    let task_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "taskforge_task_duration_seconds",
            "Task attempt duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["kind"],
    )?;

    let queue_depth = Gauge::new("taskforge_queue_depth", "Number of tasks waiting in queue")?;

    let live_workers = Gauge::new("taskforge_live_workers", "Number of workers in the pool")?;

    let busy_workers = Gauge::new(
        "taskforge_busy_workers",
        "Number of workers currently executing a task",
    )?;

    let quality_score = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "taskforge_quality_score",
            "Distribution of output quality scores",
        )
        .buckets(vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0]),
    )?;

    registry.register(Box::new(tasks_total.clone()))?;
    registry.register(Box::new(task_duration.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(live_workers.clone()))?;
    registry.register(Box::new(busy_workers.clone()))?;
    registry.register(Box::new(quality_score.clone()))?;

    // Store metrics in static variables.
    // If any of these fail, metrics were already initialized (idempotent).
    let _ = REGISTRY.set(registry);
    let _ = TASKS_TOTAL.set(tasks_total);
    let _ = TASK_DURATION.set(task_duration);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = LIVE_WORKERS.set(live_workers);
    let _ = BUSY_WORKERS.set(busy_workers);
    let _ = QUALITY_SCORE.set(quality_score);

    tracing::info!("Prometheus metrics initialized");

    Ok(())
}

/// Records one settled attempt.
pub fn record_attempt(kind: &str, outcome: &str, duration_secs: f64, quality: Option<f64>) {
    if let Some(tasks_total) = TASKS_TOTAL.get() {
        tasks_total.with_label_values(&[kind, outcome]).inc();
    }
    if let Some(task_duration) = TASK_DURATION.get() {
        task_duration.with_label_values(&[kind]).observe(duration_secs);
    }
    if let Some(score) = quality {
        if let Some(quality_score) = QUALITY_SCORE.get() {
            quality_score.observe(score);
        }
    }
}

/// Updates the queue/worker gauges from a monitoring snapshot.
pub fn update_gauges(queue_depth: usize, live_workers: usize, busy_workers: usize) {
    if let Some(gauge) = QUEUE_DEPTH.get() {
        gauge.set(queue_depth as f64);
    }
    if let Some(gauge) = LIVE_WORKERS.get() {
        gauge.set(live_workers as f64);
    }
    if let Some(gauge) = BUSY_WORKERS.get() {
        gauge.set(busy_workers as f64);
    }
}

/// Export all registered metrics in Prometheus text format.
///
/// Gathers all metrics from the registry and encodes them in the text
/// exposition format, suitable for scraping.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
