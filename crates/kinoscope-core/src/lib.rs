//! Kinoscope Core - staged video-analysis pipeline
//!
//! This crate provides the durable heart of kinoscope:
//! - Queue: named SQLite-backed queues with retries, backoff, repeatable
//!   (cron) jobs, throttled workers and rate-limit signals
//! - Stages: discovery, metadata, chunk planning, segment analysis,
//!   combination, stats, quota cleanup
//! - Fan-in: segment-completion tracking and the single combination job
//! - Rate limiting: the coordinator bridging quota ledger decisions into
//!   worker throttles
//! - Store: the persistent state interface and its SQLite implementation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chunking;
pub mod combine;
pub mod config;
pub mod error;
pub mod fanin;
pub mod model;
pub mod queue;
pub mod ratelimit;
pub mod runtime;
pub mod stages;
pub mod store;

pub use chunking::{plan_segments, PlannedSegment};
pub use combine::combine_segments;
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use fanin::{derive_readiness, FanInController, FanInStatus, Readiness};
pub use model::{
    combination_job_id, Channel, Content, ContentState, Prompt, PromptType, QuotaViolationRecord,
    Segment, SegmentState, SourceType, StatPoint,
};
pub use queue::{
    next_occurrence, queues, EnqueueResult, FailKind, Job, JobContext, JobHandler, JobOptions,
    JobOutcome, JobState, QueueStore, QueueThrottle, RepeatableJob, Worker, WorkerHandle,
};
pub use ratelimit::{base_throttle, RateLimitCoordinator, ViolationOutcome};
pub use runtime::PipelineRuntime;
pub use stages::{
    job_names, AnalysisPayload, AnalysisStage, CleanupStage, CombinationPayload, CombinationStage,
    DiscoveryPayload, DiscoveryStage, MetadataPayload, MetadataStage, PlanningPayload,
    PlanningStage, StageServices, StatsPayload, StatsStage,
};
pub use store::{MetadataPatch, PipelineStore, SqliteStore};
