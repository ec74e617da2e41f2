//! Segment fan-in control
//!
//! Watches per-segment completions and decides when a video's single
//! combination job fires. Readiness is derived fresh from store counts on
//! every call; the stable `combine:{content}` job id collapses concurrent
//! triggers into one pending job.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{combination_job_id, SegmentState};
use crate::queue::{queues, EnqueueResult, JobOptions, QueueStore};
use crate::stages::CombinationPayload;
use crate::store::PipelineStore;

/// Combination readiness of one video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Readiness {
    /// Every expected segment analyzed
    Ready,
    /// Every segment settled, some failed, at least one analyzed
    Partial,
    /// Segments still outstanding
    Processing,
    /// Chunk planning has not committed yet
    NotChunked,
}

/// Derive readiness from segment counts.
#[must_use]
pub fn derive_readiness(expected: Option<u32>, completed: u32, failed: u32) -> Readiness {
    let Some(expected) = expected.filter(|e| *e > 0) else {
        return Readiness::NotChunked;
    };
    if completed == expected {
        Readiness::Ready
    } else if completed + failed == expected && completed > 0 {
        Readiness::Partial
    } else {
        Readiness::Processing
    }
}

/// Snapshot handed to callers (and the control API)
#[derive(Debug, Clone, Serialize)]
pub struct FanInStatus {
    /// Derived readiness
    pub readiness: Readiness,
    /// Frozen segment count, when planning has committed
    pub expected: Option<u32>,
    /// Segments in ANALYZED
    pub completed: u32,
    /// Segments in FAILED or OVERLOADED
    pub failed: u32,
}

/// Evaluates readiness and enqueues combination jobs
#[derive(Clone)]
pub struct FanInController {
    store: Arc<dyn PipelineStore>,
    queue: Arc<QueueStore>,
    max_attempts: u32,
    backoff_base_ms: u64,
}

impl FanInController {
    /// Create a controller.
    pub fn new(
        store: Arc<dyn PipelineStore>,
        queue: Arc<QueueStore>,
        max_attempts: u32,
        backoff_base_ms: u64,
    ) -> Self {
        Self {
            store,
            queue,
            max_attempts,
            backoff_base_ms,
        }
    }

    /// Current readiness of a content, without side effects.
    pub async fn status(&self, content_id: Uuid) -> Result<FanInStatus> {
        let content = self.store.get_content(content_id).await?;
        let completed = self
            .store
            .count_segments_by_state(content_id, &[SegmentState::Analyzed])
            .await?;
        let failed = self
            .store
            .count_segments_by_state(
                content_id,
                &[SegmentState::Failed, SegmentState::Overloaded],
            )
            .await?;

        Ok(FanInStatus {
            readiness: derive_readiness(content.expected_segment_count, completed, failed),
            expected: content.expected_segment_count,
            completed,
            failed,
        })
    }

    /// Evaluate a content after a segment settled; `READY` auto-enqueues
    /// the combination job. `PARTIAL` waits for an explicit trigger.
    pub async fn evaluate(&self, content_id: Uuid) -> Result<FanInStatus> {
        let status = self.status(content_id).await?;
        debug!(
            content_id = %content_id,
            readiness = ?status.readiness,
            completed = status.completed,
            failed = status.failed,
            "fan-in evaluated"
        );

        if status.readiness == Readiness::Ready {
            let result = self.trigger(content_id, false, None, false).await?;
            if !result.deduplicated {
                info!(content_id = %content_id, "all segments analyzed, combination enqueued");
            }
        }
        Ok(status)
    }

    /// Enqueue the combination job for a content.
    ///
    /// `allow_partial` is set by explicit external triggers; those also run
    /// at high priority. The stable job id makes repeated triggers while
    /// one is pending a no-op.
    pub async fn trigger(
        &self,
        content_id: Uuid,
        allow_partial: bool,
        force_model: Option<String>,
        high_priority: bool,
    ) -> Result<EnqueueResult> {
        let payload = CombinationPayload {
            content_id,
            force_model,
            allow_partial,
        };
        let mut opts = JobOptions::default()
            .with_job_id(combination_job_id(content_id))
            .with_attempts(self.max_attempts)
            .with_backoff_base_ms(self.backoff_base_ms);
        if high_priority {
            opts = opts.with_priority(10);
        }

        self.queue
            .enqueue(
                queues::COMBINATION,
                "combine-content",
                &serde_json::to_value(&payload)?,
                opts,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_ready() {
        assert_eq!(derive_readiness(Some(4), 4, 0), Readiness::Ready);
    }

    #[test]
    fn test_readiness_partial_needs_some_success() {
        assert_eq!(derive_readiness(Some(4), 3, 1), Readiness::Partial);
        // All failed is not partial; nothing to combine.
        assert_eq!(derive_readiness(Some(4), 0, 4), Readiness::Processing);
    }

    #[test]
    fn test_readiness_processing() {
        assert_eq!(derive_readiness(Some(4), 2, 1), Readiness::Processing);
        assert_eq!(derive_readiness(Some(4), 0, 0), Readiness::Processing);
    }

    #[test]
    fn test_readiness_not_chunked() {
        assert_eq!(derive_readiness(None, 0, 0), Readiness::NotChunked);
        assert_eq!(derive_readiness(Some(0), 0, 0), Readiness::NotChunked);
    }
}
