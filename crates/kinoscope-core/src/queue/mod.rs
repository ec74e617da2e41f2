//! Durable queue abstraction
//!
//! Named queues with at-least-once delivery, exponential retry backoff,
//! idempotent enqueue by stable job id, repeatable (cron) jobs, and
//! throttled workers. Handlers return an explicit [`JobOutcome`] sum type;
//! a [`JobOutcome::Defer`] reschedules delivery without advancing the
//! attempt counter, which is how rate-limit signals differ from failures.

mod cron;
mod store;
mod types;
mod worker;


pub use cron::next_occurrence;
pub use store::{EnqueueResult, QueueStore, RepeatableJob};
pub use types::{queues, FailKind, Job, JobContext, JobHandler, JobOptions, JobOutcome, JobState};
pub use worker::{QueueThrottle, Worker, WorkerHandle};
