//! Metrics: system-wide aggregation, threshold alerts and Prometheus export.
//!
//! The [`MetricsAggregator`] keeps the completion history and recomputes the
//! derived [`SystemMetrics`] on every monitoring tick; breaches of the
//! configured [`PerformanceThresholds`] surface as alert events. The
//! `prometheus` submodule mirrors the same numbers for external scraping.

pub mod aggregator;
pub mod prometheus;

pub use aggregator::{
    CompletionRecord, MetricsAggregator, PerformanceThresholds, SystemMetrics, ThresholdAlert,
};
pub use prometheus::{export_metrics, init_metrics};
