//! Queue job types and handler contract

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::worker::WorkerHandle;

/// Queue names used by the pipeline
pub mod queues {
    /// Channel discovery
    pub const CHANNEL_DISCOVERY: &str = "channel-discovery";
    /// Content metadata enrichment
    pub const CONTENT_METADATA: &str = "content-metadata";
    /// Chunk planning
    pub const CONTENT_PROCESSING: &str = "content-processing";
    /// Per-segment AI analysis
    pub const SEGMENT_ANALYSIS: &str = "segment-analysis";
    /// Combination fan-in
    pub const COMBINATION: &str = "combination";
    /// Viewer statistics refresh
    pub const STATS: &str = "stats";
    /// Quota usage/violation pruning
    pub const QUOTA_CLEANUP: &str = "quota-cleanup";

    /// Every pipeline queue
    pub const ALL: &[&str] = &[
        CHANNEL_DISCOVERY,
        CONTENT_METADATA,
        CONTENT_PROCESSING,
        SEGMENT_ANALYSIS,
        COMBINATION,
        STATS,
        QUOTA_CLEANUP,
    ];
}

/// Persisted delivery state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for its `run_at`
    Queued,
    /// Claimed by a worker
    Active,
    /// Finished successfully (kept only when `remove_on_complete` is off)
    Completed,
    /// Terminally failed
    Failed,
}

impl JobState {
    /// Stable database representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the database representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One deliverable job
#[derive(Debug, Clone)]
pub struct Job {
    /// Job id; stable ids make enqueues idempotent
    pub id: String,
    /// Owning queue
    pub queue: String,
    /// Job name, selects the handler behavior
    pub name: String,
    /// JSON payload
    pub payload: Value,
    /// Failed deliveries so far; deferrals do not count
    pub attempts_made: u32,
    /// Delivery budget
    pub max_attempts: u32,
    /// Base delay for exponential retry backoff
    pub backoff_base_ms: u64,
    /// Higher runs first
    pub priority: i32,
    /// Earliest delivery time
    pub run_at: DateTime<Utc>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Enqueue options
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Delivery budget
    pub attempts: u32,
    /// Base delay for exponential retry backoff
    pub backoff_base_ms: u64,
    /// Higher runs first
    pub priority: i32,
    /// Initial delivery delay
    pub delay_ms: u64,
    /// Stable id for idempotent enqueue
    pub job_id: Option<String>,
    /// Drop the row on success (default) instead of keeping a tombstone
    pub remove_on_complete: bool,
    /// Drop the row on terminal failure instead of keeping it for triage
    pub remove_on_fail: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_base_ms: 30_000,
            priority: 0,
            delay_ms: 0,
            job_id: None,
            remove_on_complete: true,
            remove_on_fail: false,
        }
    }
}

impl JobOptions {
    /// Set the delivery budget.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set the backoff base.
    #[must_use]
    pub fn with_backoff_base_ms(mut self, base_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set a stable job id.
    #[must_use]
    pub fn with_job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    /// Set an initial delivery delay.
    #[must_use]
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

/// Failure class of a job delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailKind {
    /// Bad input or malformed output; never retried
    Validation,
    /// Worth retrying while attempts remain
    Transient,
    /// Contract violation; never retried
    Fatal,
}

impl FailKind {
    /// Whether the queue may redeliver after this failure.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Result of one job delivery
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// Job finished; remove or tombstone it
    Complete,
    /// Rate-limit signal: redeliver after `delay` without burning an attempt
    Defer {
        /// Redelivery delay
        delay: Duration,
    },
    /// Delivery failed
    Fail {
        /// Failure class controlling retries
        kind: FailKind,
        /// Human-readable reason
        message: String,
    },
}

impl JobOutcome {
    /// Shorthand for a failed delivery.
    #[must_use]
    pub fn fail(kind: FailKind, message: impl Into<String>) -> Self {
        Self::Fail {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a deferral.
    #[must_use]
    pub fn defer(delay: Duration) -> Self {
        Self::Defer { delay }
    }
}

/// Per-delivery context handed to handlers
#[derive(Clone)]
pub struct JobContext {
    /// 1-based attempt number of this delivery
    pub attempt: u32,
    /// Delivery budget
    pub max_attempts: u32,
    /// Cancellation token; fires on shutdown or deadline
    pub cancel: CancellationToken,
    /// Handle of the delivering worker, for coordinator throttling
    pub worker: Arc<WorkerHandle>,
}

impl JobContext {
    /// Whether a failure now would exhaust the delivery budget.
    #[must_use]
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// A queue job handler
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process one delivery.
    async fn process(&self, job: &Job, ctx: &JobContext) -> JobOutcome;
}
