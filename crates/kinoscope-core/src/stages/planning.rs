//! Chunk-planning stage
//!
//! Computes the frozen segment plan for a video, commits it atomically
//! with `expected_segment_count`, and fans out one analysis job per
//! segment.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::chunking::plan_segments;
use crate::model::{ContentState, Segment, SegmentState};
use crate::queue::{FailKind, Job, JobContext, JobHandler, JobOutcome};

use super::{parse_payload, PlanningPayload, StageServices};

/// `content-processing` handler
pub struct PlanningStage {
    services: Arc<StageServices>,
}

impl PlanningStage {
    /// Create the stage.
    pub fn new(services: Arc<StageServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl JobHandler for PlanningStage {
    async fn process(&self, job: &Job, _ctx: &JobContext) -> JobOutcome {
        let payload: PlanningPayload = match parse_payload(job) {
            Ok(payload) => payload,
            Err(outcome) => return outcome,
        };

        let content = match self.services.store.get_content(payload.content_id).await {
            Ok(content) => content,
            Err(e) => return JobOutcome::fail(FailKind::Validation, e.to_string()),
        };

        // Redelivered job after the plan was already committed: just make
        // sure every pending segment has its analysis job.
        let existing = match self.services.store.list_segments(content.id, None).await {
            Ok(existing) => existing,
            Err(e) => return JobOutcome::fail(FailKind::Transient, e.to_string()),
        };
        if !existing.is_empty() {
            for segment in existing
                .iter()
                .filter(|s| s.state == SegmentState::Pending)
            {
                if let Err(e) = self
                    .services
                    .enqueue_analysis(content.id, segment.index)
                    .await
                {
                    return JobOutcome::fail(FailKind::Transient, e.to_string());
                }
            }
            return JobOutcome::Complete;
        }

        let duration = content.duration_sec.unwrap_or(0);
        let plan = plan_segments(
            duration,
            self.services.config.max_segment_sec,
            self.services.config.segment_overlap_sec,
        );
        if plan.is_empty() {
            let reason = format!("invalid duration: {duration}s");
            if let Err(e) = self
                .services
                .store
                .set_content_state(content.id, ContentState::Failed, Some(&reason))
                .await
            {
                return JobOutcome::fail(FailKind::Transient, e.to_string());
            }
            return JobOutcome::fail(FailKind::Validation, reason);
        }

        let segments: Vec<Segment> = plan
            .iter()
            .map(|p| Segment::pending(content.id, p.index, p.start_sec, p.end_sec))
            .collect();

        if let Err(e) = self
            .services
            .store
            .commit_segment_plan(content.id, &segments, ContentState::Processing)
            .await
        {
            return JobOutcome::fail(FailKind::Transient, e.to_string());
        }

        for segment in &segments {
            if let Err(e) = self
                .services
                .enqueue_analysis(content.id, segment.index)
                .await
            {
                return JobOutcome::fail(FailKind::Transient, e.to_string());
            }
        }

        info!(
            content_id = %content.id,
            duration_sec = duration,
            segments = segments.len(),
            "segment plan committed"
        );
        JobOutcome::Complete
    }
}
