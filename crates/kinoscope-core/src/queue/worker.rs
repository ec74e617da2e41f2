//! Queue worker
//!
//! One worker drives one queue: it claims due jobs under a sliding-window
//! throttle, runs the handler with a per-job deadline, and applies the
//! returned [`JobOutcome`]. The rate-limit coordinator steers a running
//! worker through its [`WorkerHandle`] (pause gate + effective throttle).

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::store::QueueStore;
use super::types::{FailKind, Job, JobContext, JobHandler, JobOutcome, JobState};

/// Worker throttle: at most `max` job starts per `window_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueThrottle {
    /// Job starts allowed per window
    pub max: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl QueueThrottle {
    /// Window length as a [`Duration`].
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Shared control surface of a running worker
pub struct WorkerHandle {
    queue: String,
    base: QueueThrottle,
    max: AtomicU32,
    window_ms: AtomicU64,
    /// Epoch milliseconds until which intake is paused; 0 = not paused
    pause_until_ms: AtomicI64,
}

impl WorkerHandle {
    fn new(queue: String, base: QueueThrottle) -> Self {
        Self {
            queue,
            base,
            max: AtomicU32::new(base.max),
            window_ms: AtomicU64::new(base.window_ms),
            pause_until_ms: AtomicI64::new(0),
        }
    }

    /// Standalone handle not bound to a running worker. Used where a
    /// coordinator interaction is exercised without a poll loop.
    #[must_use]
    pub fn detached(queue: impl Into<String>, throttle: QueueThrottle) -> Arc<Self> {
        Arc::new(Self::new(queue.into(), throttle))
    }

    /// The queue this worker serves.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// The compile-time base throttle.
    #[must_use]
    pub fn base(&self) -> QueueThrottle {
        self.base
    }

    /// The currently effective throttle.
    #[must_use]
    pub fn effective(&self) -> QueueThrottle {
        QueueThrottle {
            max: self.max.load(Ordering::Relaxed),
            window_ms: self.window_ms.load(Ordering::Relaxed),
        }
    }

    /// Replace the effective throttle.
    pub fn set_throttle(&self, throttle: QueueThrottle) {
        self.max.store(throttle.max.max(1), Ordering::Relaxed);
        self.window_ms
            .store(throttle.window_ms.max(1), Ordering::Relaxed);
    }

    /// Pause intake for `duration`. Overlapping pauses keep the later end.
    pub fn pause_for(&self, duration: Duration) {
        let until = chrono::Utc::now().timestamp_millis() + duration.as_millis() as i64;
        self.pause_until_ms.fetch_max(until, Ordering::Relaxed);
        debug!(
            queue = %self.queue,
            pause_ms = duration.as_millis() as u64,
            "worker intake paused"
        );
    }

    /// Remaining pause, if intake is currently paused.
    #[must_use]
    pub fn paused_remaining(&self) -> Option<Duration> {
        let until = self.pause_until_ms.load(Ordering::Relaxed);
        let now = chrono::Utc::now().timestamp_millis();
        if until > now {
            Some(Duration::from_millis((until - now) as u64))
        } else {
            None
        }
    }
}

/// Sliding window over job start times
struct SlidingWindow {
    starts: Mutex<Vec<Instant>>,
}

impl SlidingWindow {
    fn new() -> Self {
        Self {
            starts: Mutex::new(Vec::new()),
        }
    }

    /// Slots still available in the current window.
    fn available(&self, throttle: QueueThrottle) -> u32 {
        let cutoff = Instant::now() - throttle.window();
        let mut starts = self.starts.lock().expect("window lock poisoned");
        starts.retain(|t| *t > cutoff);
        throttle.max.saturating_sub(starts.len() as u32)
    }

    fn record(&self) {
        self.starts
            .lock()
            .expect("window lock poisoned")
            .push(Instant::now());
    }
}

/// A single-queue worker
pub struct Worker {
    store: Arc<QueueStore>,
    handler: Arc<dyn JobHandler>,
    handle: Arc<WorkerHandle>,
    window: SlidingWindow,
    poll_interval: Duration,
    deadline: Duration,
}

impl Worker {
    /// Create a worker bound to one queue.
    pub fn new(
        store: Arc<QueueStore>,
        queue: impl Into<String>,
        handler: Arc<dyn JobHandler>,
        throttle: QueueThrottle,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            handler,
            handle: Arc::new(WorkerHandle::new(queue.into(), throttle)),
            window: SlidingWindow::new(),
            poll_interval,
            deadline,
        }
    }

    /// Shared control handle for the rate-limit coordinator.
    #[must_use]
    pub fn handle(&self) -> Arc<WorkerHandle> {
        Arc::clone(&self.handle)
    }

    /// Run the worker until `shutdown` fires.
    ///
    /// Shutdown aborts the in-flight handler future and hands its job back
    /// to the queue for redelivery; handlers must not rely on running to
    /// completion and stay idempotent across deliveries.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(queue = %self.handle.queue, "worker starting");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }

            if self.handle.paused_remaining().is_some() {
                continue;
            }

            let available = self.window.available(self.handle.effective());
            if available == 0 {
                continue;
            }

            let jobs = match self.store.claim_due(&self.handle.queue, available).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(queue = %self.handle.queue, error = %e, "failed to claim jobs");
                    continue;
                }
            };

            for job in jobs {
                if shutdown.is_cancelled() {
                    // Claimed but not started; hand it straight back.
                    if let Err(e) = self.store.defer(&job, Duration::from_secs(0)).await {
                        error!(job_id = %job.id, error = %e, "failed to release job");
                    }
                    continue;
                }
                self.window.record();
                self.process(job, &shutdown).await;
            }
        }
        info!(queue = %self.handle.queue, "worker stopped");
    }

    async fn process(&self, job: Job, shutdown: &CancellationToken) {
        let cancel = shutdown.child_token();
        let ctx = JobContext {
            attempt: job.attempts_made + 1,
            max_attempts: job.max_attempts,
            cancel: cancel.clone(),
            worker: self.handle(),
        };

        debug!(
            queue = %job.queue,
            job_id = %job.id,
            job_name = %job.name,
            attempt = ctx.attempt,
            "processing job"
        );

        let outcome = tokio::select! {
            () = shutdown.cancelled() => {
                // Abort in-flight work; the queue redelivers untouched.
                cancel.cancel();
                if let Err(e) = self.store.defer(&job, Duration::from_secs(1)).await {
                    error!(job_id = %job.id, error = %e, "failed to defer on shutdown");
                }
                return;
            }
            result = tokio::time::timeout(self.deadline, self.handler.process(&job, &ctx)) => {
                match result {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        cancel.cancel();
                        JobOutcome::fail(FailKind::Transient, "handler deadline exceeded")
                    }
                }
            }
        };

        self.apply_outcome(&job, outcome).await;
    }

    async fn apply_outcome(&self, job: &Job, outcome: JobOutcome) {
        let result = match outcome {
            JobOutcome::Complete => {
                debug!(job_id = %job.id, "job completed");
                self.store.complete(job).await
            }
            JobOutcome::Defer { delay } => {
                debug!(
                    job_id = %job.id,
                    delay_ms = delay.as_millis() as u64,
                    "job deferred"
                );
                self.store.defer(job, delay).await
            }
            JobOutcome::Fail { kind, message } => {
                match self.store.fail(job, &message, kind.is_retryable()).await {
                    Ok(JobState::Failed) => {
                        error!(job_id = %job.id, kind = ?kind, error = %message, "job failed terminally");
                        Ok(())
                    }
                    Ok(_) => {
                        warn!(
                            job_id = %job.id,
                            attempt = job.attempts_made + 1,
                            max_attempts = job.max_attempts,
                            error = %message,
                            "job failed, will retry"
                        );
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = result {
            error!(job_id = %job.id, error = %e, "failed to persist job outcome");
        }
    }
}
