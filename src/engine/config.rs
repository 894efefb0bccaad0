//! Engine configuration.
//!
//! All knobs are supplied at construction and immutable afterwards: the
//! initial worker distribution, the balancing strategy, performance
//! thresholds, tick intervals and scaling bounds. Values come from
//! `Default`, the `with_*` builders, or environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::PerformanceThresholds;
use crate::scheduler::BalancingStrategy;
use crate::workers::WorkerKind;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// What happens to a task after a failed execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorRecovery {
    /// Retry within the task's budget, demoting priority one step per
    /// attempt.
    #[default]
    Retry,
    /// Treat every execution error as terminal; the retry budget is ignored.
    FailFast,
}

impl std::fmt::Display for ErrorRecovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorRecovery::Retry => write!(f, "retry"),
            ErrorRecovery::FailFast => write!(f, "fail-fast"),
        }
    }
}

impl std::str::FromStr for ErrorRecovery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry" => Ok(ErrorRecovery::Retry),
            "fail-fast" => Ok(ErrorRecovery::FailFast),
            other => Err(format!("unknown error recovery strategy '{}'", other)),
        }
    }
}

/// Configuration for the orchestration engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Pool settings
    /// Baseline worker count; the scaler stays within `1.5x` above and
    /// `0.5x` below this value.
    pub max_workers: usize,
    /// Initial worker distribution per kind.
    pub worker_distribution: Vec<(WorkerKind, usize)>,

    // Scheduling settings
    /// Pairing policy applied each scheduler tick.
    pub strategy: BalancingStrategy,
    /// Scheduler tick interval.
    pub scheduler_tick: Duration,
    /// Deadline applied to tasks that carry none.
    pub default_task_ttl: Duration,
    /// What happens after a failed execution attempt.
    pub error_recovery: ErrorRecovery,
    /// Maximum time a single execution may take before the worker is
    /// considered unresponsive and marked offline.
    pub execution_timeout: Duration,

    // Monitoring settings
    /// Monitoring tick interval (metrics recomputation + alerts).
    pub monitor_tick: Duration,
    /// Window over which throughput is measured.
    pub throughput_window: Duration,
    /// Alert thresholds.
    pub thresholds: PerformanceThresholds,
    /// Rolling error rate above which a worker is parked in `Error` state.
    pub worker_error_bar: f64,
    /// How long a parked (`Error`/`Offline`) worker stays excluded before
    /// the monitor restores it to service.
    pub worker_cooldown: Duration,

    // Scaling settings
    /// Whether the adaptive scaler runs at all.
    pub adaptive_scaling: bool,
    /// Scaler tick interval.
    pub scaler_tick: Duration,
    /// Workers added per scale-up tick (clamped to the ceiling).
    pub scale_step: usize,
    /// Maximum workers removed per scale-down tick.
    pub scale_down_batch: usize,
    /// Queue length above which the scaler grows the pool.
    pub queue_high_water: usize,
    /// Queue length below which the scaler may shrink the pool.
    pub queue_low_water: usize,

    // Shutdown settings
    /// Upper bound on waiting for busy workers during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            worker_distribution: vec![
                (WorkerKind::Discovery, 1),
                (WorkerKind::ArticleProcessor, 2),
                (WorkerKind::VideoProcessor, 1),
                (WorkerKind::StatsProcessor, 1),
                (WorkerKind::Validator, 1),
                (WorkerKind::QualityControl, 1),
                (WorkerKind::RealtimeMonitor, 1),
            ],
            strategy: BalancingStrategy::Intelligent,
            scheduler_tick: Duration::from_secs(1),
            default_task_ttl: Duration::from_secs(600),
            error_recovery: ErrorRecovery::Retry,
            execution_timeout: Duration::from_secs(300),
            monitor_tick: Duration::from_secs(15),
            throughput_window: Duration::from_secs(60),
            thresholds: PerformanceThresholds::default(),
            worker_error_bar: 0.75,
            worker_cooldown: Duration::from_secs(30),
            adaptive_scaling: true,
            scaler_tick: Duration::from_secs(120),
            scale_step: 2,
            scale_down_batch: 3,
            queue_high_water: 20,
            queue_low_water: 5,
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TASKFORGE_MAX_WORKERS`: baseline worker count (default: 8)
    /// - `TASKFORGE_DISTRIBUTION`: comma-separated `kind=count` pairs
    ///   (e.g. `discovery=2,validator=1`)
    /// - `TASKFORGE_STRATEGY`: balancing strategy (default: intelligent)
    /// - `TASKFORGE_SCHEDULER_TICK_MS`: scheduler tick in milliseconds
    /// - `TASKFORGE_TASK_TTL_SECS`: default task time-to-live in seconds
    /// - `TASKFORGE_ERROR_RECOVERY`: `retry` or `fail-fast`
    /// - `TASKFORGE_EXECUTION_TIMEOUT_SECS`: per-attempt timeout
    /// - `TASKFORGE_MONITOR_TICK_SECS`: monitoring tick in seconds
    /// - `TASKFORGE_SCALER_TICK_SECS`: scaler tick in seconds
    /// - `TASKFORGE_ADAPTIVE_SCALING`: enable the scaler (default: true)
    /// - `TASKFORGE_QUEUE_HIGH_WATER` / `TASKFORGE_QUEUE_LOW_WATER`
    /// - `TASKFORGE_MAX_PROCESSING_SECS`: average processing time ceiling
    /// - `TASKFORGE_MIN_THROUGHPUT`: throughput floor, tasks per minute
    /// - `TASKFORGE_MAX_ERROR_RATE`: error rate ceiling, `0.0..=1.0`
    /// - `TASKFORGE_MIN_QUALITY`: average quality floor, 0-100
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("TASKFORGE_MAX_WORKERS") {
            config.max_workers = parse_env_value(&val, "TASKFORGE_MAX_WORKERS")?;
        }

        if let Ok(val) = std::env::var("TASKFORGE_DISTRIBUTION") {
            config.worker_distribution = parse_distribution(&val)?;
        }

        if let Ok(val) = std::env::var("TASKFORGE_STRATEGY") {
            config.strategy = val.parse().map_err(|message| ConfigError::InvalidValue {
                key: "TASKFORGE_STRATEGY".to_string(),
                message,
            })?;
        }

        if let Ok(val) = std::env::var("TASKFORGE_SCHEDULER_TICK_MS") {
            let ms: u64 = parse_env_value(&val, "TASKFORGE_SCHEDULER_TICK_MS")?;
            config.scheduler_tick = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("TASKFORGE_TASK_TTL_SECS") {
            let secs: u64 = parse_env_value(&val, "TASKFORGE_TASK_TTL_SECS")?;
            config.default_task_ttl = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("TASKFORGE_ERROR_RECOVERY") {
            config.error_recovery = val.parse().map_err(|message| ConfigError::InvalidValue {
                key: "TASKFORGE_ERROR_RECOVERY".to_string(),
                message,
            })?;
        }

        if let Ok(val) = std::env::var("TASKFORGE_EXECUTION_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "TASKFORGE_EXECUTION_TIMEOUT_SECS")?;
            config.execution_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("TASKFORGE_MONITOR_TICK_SECS") {
            let secs: u64 = parse_env_value(&val, "TASKFORGE_MONITOR_TICK_SECS")?;
            config.monitor_tick = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("TASKFORGE_SCALER_TICK_SECS") {
            let secs: u64 = parse_env_value(&val, "TASKFORGE_SCALER_TICK_SECS")?;
            config.scaler_tick = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("TASKFORGE_ADAPTIVE_SCALING") {
            config.adaptive_scaling = parse_env_bool(&val, "TASKFORGE_ADAPTIVE_SCALING")?;
        }

        if let Ok(val) = std::env::var("TASKFORGE_QUEUE_HIGH_WATER") {
            config.queue_high_water = parse_env_value(&val, "TASKFORGE_QUEUE_HIGH_WATER")?;
        }

        if let Ok(val) = std::env::var("TASKFORGE_QUEUE_LOW_WATER") {
            config.queue_low_water = parse_env_value(&val, "TASKFORGE_QUEUE_LOW_WATER")?;
        }

        if let Ok(val) = std::env::var("TASKFORGE_MAX_PROCESSING_SECS") {
            let secs: u64 = parse_env_value(&val, "TASKFORGE_MAX_PROCESSING_SECS")?;
            config.thresholds.max_processing_time = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("TASKFORGE_MIN_THROUGHPUT") {
            config.thresholds.min_throughput_per_minute =
                parse_env_value(&val, "TASKFORGE_MIN_THROUGHPUT")?;
        }

        if let Ok(val) = std::env::var("TASKFORGE_MAX_ERROR_RATE") {
            config.thresholds.max_error_rate = parse_env_value(&val, "TASKFORGE_MAX_ERROR_RATE")?;
        }

        if let Ok(val) = std::env::var("TASKFORGE_MIN_QUALITY") {
            config.thresholds.min_quality_score = parse_env_value(&val, "TASKFORGE_MIN_QUALITY")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_workers must be greater than 0".to_string(),
            ));
        }

        if self.worker_distribution.is_empty()
            || self.worker_distribution.iter().all(|(_, count)| *count == 0)
        {
            return Err(ConfigError::ValidationFailed(
                "worker_distribution must seed at least one worker".to_string(),
            ));
        }

        let seeded: usize = self.worker_distribution.iter().map(|(_, count)| count).sum();
        if seeded > self.worker_ceiling() {
            return Err(ConfigError::ValidationFailed(format!(
                "worker_distribution seeds {} workers, above the ceiling of {}",
                seeded,
                self.worker_ceiling()
            )));
        }

        if self.scheduler_tick.is_zero() || self.monitor_tick.is_zero() || self.scaler_tick.is_zero()
        {
            return Err(ConfigError::ValidationFailed(
                "tick intervals must be greater than zero".to_string(),
            ));
        }

        if self.execution_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "execution_timeout must be greater than zero".to_string(),
            ));
        }

        if self.scale_step == 0 {
            return Err(ConfigError::ValidationFailed(
                "scale_step must be greater than 0".to_string(),
            ));
        }

        if self.queue_low_water >= self.queue_high_water {
            return Err(ConfigError::ValidationFailed(
                "queue_low_water must be below queue_high_water".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.worker_error_bar) {
            return Err(ConfigError::ValidationFailed(
                "worker_error_bar must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.thresholds.max_error_rate) {
            return Err(ConfigError::ValidationFailed(
                "max_error_rate must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !(0.0..=100.0).contains(&self.thresholds.min_quality_score) {
            return Err(ConfigError::ValidationFailed(
                "min_quality_score must be between 0.0 and 100.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Hard ceiling on pool size: `max_workers * 1.5`.
    pub fn worker_ceiling(&self) -> usize {
        self.max_workers + self.max_workers / 2
    }

    /// Hard floor on pool size: `max_workers * 0.5`, at least 1.
    pub fn worker_floor(&self) -> usize {
        (self.max_workers / 2).max(1)
    }

    /// Builder method to set the baseline worker count.
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Builder method to set the initial worker distribution.
    pub fn with_distribution(mut self, distribution: Vec<(WorkerKind, usize)>) -> Self {
        self.worker_distribution = distribution;
        self
    }

    /// Builder method to set the balancing strategy.
    pub fn with_strategy(mut self, strategy: BalancingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Builder method to set the scheduler tick interval.
    pub fn with_scheduler_tick(mut self, tick: Duration) -> Self {
        self.scheduler_tick = tick;
        self
    }

    /// Builder method to set the monitoring tick interval.
    pub fn with_monitor_tick(mut self, tick: Duration) -> Self {
        self.monitor_tick = tick;
        self
    }

    /// Builder method to set the scaler tick interval.
    pub fn with_scaler_tick(mut self, tick: Duration) -> Self {
        self.scaler_tick = tick;
        self
    }

    /// Builder method to enable or disable adaptive scaling.
    pub fn with_adaptive_scaling(mut self, enabled: bool) -> Self {
        self.adaptive_scaling = enabled;
        self
    }

    /// Builder method to set the error recovery strategy.
    pub fn with_error_recovery(mut self, recovery: ErrorRecovery) -> Self {
        self.error_recovery = recovery;
        self
    }

    /// Builder method to set the performance thresholds.
    pub fn with_thresholds(mut self, thresholds: PerformanceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Builder method to set the per-attempt execution timeout.
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// Builder method to set the queue watermarks.
    pub fn with_queue_watermarks(mut self, low: usize, high: usize) -> Self {
        self.queue_low_water = low;
        self.queue_high_water = high;
        self
    }

    /// Builder method to set the default task time-to-live.
    pub fn with_default_task_ttl(mut self, ttl: Duration) -> Self {
        self.default_task_ttl = ttl;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

/// Parse a `kind=count,kind=count` distribution string.
fn parse_distribution(value: &str) -> Result<Vec<(WorkerKind, usize)>, ConfigError> {
    let mut distribution = Vec::new();
    for entry in value.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (kind, count) = entry.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
            key: "TASKFORGE_DISTRIBUTION".to_string(),
            message: format!("expected 'kind=count', got '{}'", entry),
        })?;
        let kind: WorkerKind = kind.trim().parse().map_err(|message| ConfigError::InvalidValue {
            key: "TASKFORGE_DISTRIBUTION".to_string(),
            message,
        })?;
        let count: usize = parse_env_value(count.trim(), "TASKFORGE_DISTRIBUTION")?;
        distribution.push((kind, count));
    }
    if distribution.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "TASKFORGE_DISTRIBUTION".to_string(),
            message: "distribution cannot be empty".to_string(),
        });
    }
    Ok(distribution)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.worker_ceiling(), 12);
        assert_eq!(config.worker_floor(), 4);
        assert_eq!(config.strategy, BalancingStrategy::Intelligent);
        assert_eq!(config.error_recovery, ErrorRecovery::Retry);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_max_workers(10)
            .with_strategy(BalancingStrategy::ContentType)
            .with_scheduler_tick(Duration::from_millis(250))
            .with_adaptive_scaling(false)
            .with_error_recovery(ErrorRecovery::FailFast)
            .with_queue_watermarks(2, 40);

        assert_eq!(config.max_workers, 10);
        assert_eq!(config.strategy, BalancingStrategy::ContentType);
        assert_eq!(config.scheduler_tick, Duration::from_millis(250));
        assert!(!config.adaptive_scaling);
        assert_eq!(config.error_recovery, ErrorRecovery::FailFast);
        assert_eq!(config.queue_low_water, 2);
        assert_eq!(config.queue_high_water, 40);
    }

    #[test]
    fn test_validation_zero_workers() {
        let config = EngineConfig::default().with_max_workers(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_empty_distribution() {
        let config = EngineConfig::default().with_distribution(vec![]);
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("worker_distribution"));
    }

    #[test]
    fn test_validation_distribution_over_ceiling() {
        let config = EngineConfig::default()
            .with_max_workers(2)
            .with_distribution(vec![(WorkerKind::Discovery, 10)]);
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("ceiling"));
    }

    #[test]
    fn test_validation_watermark_ordering() {
        let config = EngineConfig::default().with_queue_watermarks(10, 10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ceiling_and_floor_bounds() {
        let config = EngineConfig::default().with_max_workers(9);
        assert_eq!(config.worker_ceiling(), 13);
        assert_eq!(config.worker_floor(), 4);

        let tiny = EngineConfig::default().with_max_workers(1);
        assert_eq!(tiny.worker_floor(), 1);
    }

    #[test]
    fn test_parse_distribution() {
        let parsed = parse_distribution("discovery=2, validator=1").expect("valid distribution");
        assert_eq!(
            parsed,
            vec![(WorkerKind::Discovery, 2), (WorkerKind::Validator, 1)]
        );

        assert!(parse_distribution("discovery:2").is_err());
        assert!(parse_distribution("mainframe=2").is_err());
        assert!(parse_distribution("").is_err());
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("true", "test").unwrap());
        assert!(parse_env_bool("1", "test").unwrap());
        assert!(!parse_env_bool("off", "test").unwrap());
        assert!(parse_env_bool("maybe", "test").is_err());
    }

    #[test]
    fn test_error_recovery_round_trip() {
        for recovery in [ErrorRecovery::Retry, ErrorRecovery::FailFast] {
            let parsed: ErrorRecovery = recovery.to_string().parse().expect("should parse");
            assert_eq!(parsed, recovery);
        }
        assert!("panic".parse::<ErrorRecovery>().is_err());
    }
}
