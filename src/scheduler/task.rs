//! Task definitions for the orchestration engine.
//!
//! This module defines the core task types handled by the scheduler:
//!
//! - `Task`: an immutable unit of work with a type, priority and retry budget
//! - `TaskSource`: descriptor of where the work item originated
//! - `WorkerKind`: the capability class a task requires
//! - `TaskOutcome`: result of a finished execution attempt

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default retry budget for a task.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Highest allowed task priority. Priorities run 0..=10, higher runs sooner.
pub const MAX_PRIORITY: u8 = 10;

/// Capability classes for workers and the tasks they accept.
///
/// The set is deliberately small but extensible; a worker of a given kind
/// only ever processes tasks of the same kind under the type-matching
/// balancing policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Finds new sources and emits follow-up work.
    Discovery,
    /// Processes long-form article content.
    ArticleProcessor,
    /// Processes video and transcript content.
    VideoProcessor,
    /// Processes structured statistics feeds.
    StatsProcessor,
    /// Cross-checks processed output against its source.
    Validator,
    /// Scores output quality and flags regressions.
    QualityControl,
    /// Watches live streams for time-sensitive items.
    RealtimeMonitor,
}

impl WorkerKind {
    /// All kinds, in a stable order used for seeding and reporting.
    pub const ALL: [WorkerKind; 7] = [
        WorkerKind::Discovery,
        WorkerKind::ArticleProcessor,
        WorkerKind::VideoProcessor,
        WorkerKind::StatsProcessor,
        WorkerKind::Validator,
        WorkerKind::QualityControl,
        WorkerKind::RealtimeMonitor,
    ];

    /// Informational capability tags for this kind.
    ///
    /// Used for matching hints and status displays only, never for access
    /// control.
    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            WorkerKind::Discovery => &["source-scan", "feed-poll", "dedup"],
            WorkerKind::ArticleProcessor => &["parse", "extract", "summarize"],
            WorkerKind::VideoProcessor => &["transcribe", "segment", "extract"],
            WorkerKind::StatsProcessor => &["normalize", "aggregate", "diff"],
            WorkerKind::Validator => &["cross-check", "schema-check"],
            WorkerKind::QualityControl => &["score", "flag", "sample"],
            WorkerKind::RealtimeMonitor => &["tail", "alert"],
        }
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerKind::Discovery => "discovery",
            WorkerKind::ArticleProcessor => "article_processor",
            WorkerKind::VideoProcessor => "video_processor",
            WorkerKind::StatsProcessor => "stats_processor",
            WorkerKind::Validator => "validator",
            WorkerKind::QualityControl => "quality_control",
            WorkerKind::RealtimeMonitor => "realtime_monitor",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for WorkerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovery" => Ok(WorkerKind::Discovery),
            "article_processor" => Ok(WorkerKind::ArticleProcessor),
            "video_processor" => Ok(WorkerKind::VideoProcessor),
            "stats_processor" => Ok(WorkerKind::StatsProcessor),
            "validator" => Ok(WorkerKind::Validator),
            "quality_control" => Ok(WorkerKind::QualityControl),
            "realtime_monitor" => Ok(WorkerKind::RealtimeMonitor),
            other => Err(format!("unknown worker kind '{}'", other)),
        }
    }
}

/// Origin category of a task's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Syndicated feed (RSS/Atom style).
    Feed,
    /// Structured third-party API.
    Api,
    /// Scraped web page.
    Scrape,
    /// Live stream or socket.
    Stream,
    /// Direct upload from a collaborator.
    Upload,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SourceKind::Feed => "feed",
            SourceKind::Api => "api",
            SourceKind::Scrape => "scrape",
            SourceKind::Stream => "stream",
            SourceKind::Upload => "upload",
        };
        write!(f, "{}", name)
    }
}

/// Descriptor of the origin of a work item.
///
/// The payload itself is opaque to the engine; only these classification
/// fields participate in scheduling decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSource {
    /// Origin category.
    pub kind: SourceKind,
    /// URL or other locator for the payload.
    pub locator: String,
    /// Processing difficulty on a 1-10 scale. Drives the duration model and
    /// the intelligent balancing policy's capability check.
    pub difficulty: u8,
    /// Credibility/priority weight of the source, `0.0..=1.0`.
    pub weight: f64,
}

impl TaskSource {
    /// Creates a new source descriptor.
    pub fn new(kind: SourceKind, locator: impl Into<String>, difficulty: u8, weight: f64) -> Self {
        Self {
            kind,
            locator: locator.into(),
            difficulty,
            weight,
        }
    }
}

/// Parameters accepted at the engine's single ingestion point.
///
/// A `TaskRequest` is validated and stamped with an id, creation time and
/// deadline when it is enqueued; producers never construct `Task` directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Capability class required to process this work.
    pub kind: WorkerKind,
    /// Priority, 0-10, higher runs sooner.
    pub priority: u8,
    /// Origin descriptor.
    pub source: TaskSource,
    /// Producer's estimate of the processing time.
    pub estimated_duration: Duration,
    /// Retry budget; 0 means fail terminally on the first error.
    pub max_retries: u32,
    /// Absolute deadline. When omitted the engine applies its configured
    /// default time-to-live.
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl TaskRequest {
    /// Creates a request with the default retry budget and no explicit
    /// deadline.
    pub fn new(
        kind: WorkerKind,
        priority: u8,
        source: TaskSource,
        estimated_duration: Duration,
    ) -> Self {
        Self {
            kind,
            priority,
            source,
            estimated_duration,
            max_retries: DEFAULT_MAX_RETRIES,
            deadline: None,
        }
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets an explicit deadline.
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A schedulable unit of work.
///
/// Tasks are created by the engine from a validated [`TaskRequest`] and are
/// immutable apart from the retry bookkeeping the scheduler performs between
/// attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique id, assigned at enqueue time.
    pub id: Uuid,
    /// Capability class required to process this work.
    pub kind: WorkerKind,
    /// Priority, 0-10, higher runs sooner. Demoted one step per retry.
    pub priority: u8,
    /// Origin descriptor.
    pub source: TaskSource,
    /// Producer's estimate of the processing time.
    pub estimated_duration: Duration,
    /// Failed attempts so far. Never exceeds `max_retries`.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// When the task was accepted.
    pub created_at: DateTime<Utc>,
    /// Tasks still queued past this instant are failed terminally instead of
    /// dispatched.
    pub deadline: DateTime<Utc>,
}

impl Task {
    /// Stamps a validated request into a queueable task.
    pub(crate) fn from_request(request: TaskRequest, default_ttl: Duration) -> Self {
        let created_at = Utc::now();
        let deadline = request.deadline.unwrap_or_else(|| {
            created_at + chrono::Duration::from_std(default_ttl).unwrap_or(chrono::Duration::minutes(10))
        });
        Self {
            id: Uuid::new_v4(),
            kind: request.kind,
            priority: request.priority,
            source: request.source,
            estimated_duration: request.estimated_duration,
            retry_count: 0,
            max_retries: request.max_retries,
            created_at,
            deadline,
        }
    }

    /// Whether another retry is allowed after a failed attempt.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Records a failed attempt: bumps the retry counter and demotes the
    /// priority one step, saturating at the minimum.
    ///
    /// Callers must check [`can_retry`](Self::can_retry) first; the counter
    /// never passes the budget.
    pub(crate) fn note_retry(&mut self) {
        debug_assert!(self.can_retry());
        self.retry_count += 1;
        self.priority = self.priority.saturating_sub(1);
    }

    /// Whether the deadline has passed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }

    /// How long ago the task was accepted.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

/// Result of one finished execution attempt, reported by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Quality score of the produced output, 0-100.
    pub quality_score: f64,
}

impl TaskOutcome {
    /// Creates an outcome, clamping the score into the 0-100 range.
    pub fn new(quality_score: f64) -> Self {
        Self {
            quality_score: quality_score.clamp(0.0, 100.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TaskRequest {
        TaskRequest::new(
            WorkerKind::ArticleProcessor,
            5,
            TaskSource::new(SourceKind::Feed, "https://example.com/feed", 4, 0.8),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_from_request_stamps_identity() {
        let task = Task::from_request(request(), Duration::from_secs(600));

        assert!(!task.id.is_nil());
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.max_retries, DEFAULT_MAX_RETRIES);
        assert!(task.deadline > task.created_at);
    }

    #[test]
    fn test_explicit_deadline_preserved() {
        let deadline = Utc::now() + chrono::Duration::hours(2);
        let task = Task::from_request(
            request().with_deadline(deadline),
            Duration::from_secs(600),
        );

        assert_eq!(task.deadline, deadline);
    }

    #[test]
    fn test_retry_bookkeeping_demotes_priority() {
        let mut task = Task::from_request(request().with_max_retries(2), Duration::from_secs(600));

        assert!(task.can_retry());
        task.note_retry();
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.priority, 4);

        task.note_retry();
        assert_eq!(task.retry_count, 2);
        assert!(!task.can_retry());
    }

    #[test]
    fn test_priority_demotion_saturates_at_zero() {
        let mut request = request().with_max_retries(5);
        request.priority = 1;
        let mut task = Task::from_request(request, Duration::from_secs(600));

        task.note_retry();
        assert_eq!(task.priority, 0);
        task.note_retry();
        assert_eq!(task.priority, 0);
    }

    #[test]
    fn test_expiry() {
        let task = Task::from_request(request(), Duration::from_secs(600));

        assert!(!task.is_expired(Utc::now()));
        assert!(task.is_expired(task.deadline + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_worker_kind_round_trip() {
        for kind in WorkerKind::ALL {
            let parsed: WorkerKind = kind.to_string().parse().expect("kind should parse");
            assert_eq!(parsed, kind);
        }
        assert!("mainframe_operator".parse::<WorkerKind>().is_err());
    }

    #[test]
    fn test_outcome_clamps_score() {
        assert_eq!(TaskOutcome::new(140.0).quality_score, 100.0);
        assert_eq!(TaskOutcome::new(-3.0).quality_score, 0.0);
    }

    #[test]
    fn test_task_serialization_round_trip() {
        let task = Task::from_request(request(), Duration::from_secs(600));
        let json = serde_json::to_string(&task).expect("serialization should work");
        let parsed: Task = serde_json::from_str(&json).expect("deserialization should work");

        assert_eq!(parsed, task);
    }
}
