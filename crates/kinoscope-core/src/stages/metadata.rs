//! Metadata stage
//!
//! Fetches authoritative item details, merges them onto the Content, and
//! hands the video to chunk planning.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::model::ContentState;
use crate::queue::{FailKind, Job, JobContext, JobHandler, JobOutcome};
use crate::store::MetadataPatch;

use super::{parse_payload, MetadataPayload, StageServices};

/// `content-metadata` handler
pub struct MetadataStage {
    services: Arc<StageServices>,
}

impl MetadataStage {
    /// Create the stage.
    pub fn new(services: Arc<StageServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl JobHandler for MetadataStage {
    async fn process(&self, job: &Job, _ctx: &JobContext) -> JobOutcome {
        let payload: MetadataPayload = match parse_payload(job) {
            Ok(payload) => payload,
            Err(outcome) => return outcome,
        };

        let content = match self.services.store.get_content(payload.content_id).await {
            Ok(content) => content,
            Err(e) => return JobOutcome::fail(FailKind::Validation, e.to_string()),
        };

        let details = match self
            .services
            .source
            .get_item_details(&[content.external_video_id.clone()])
            .await
        {
            Ok(details) => details,
            Err(e) if e.is_transient() => {
                return JobOutcome::fail(FailKind::Transient, e.to_string())
            }
            Err(e) => return JobOutcome::fail(FailKind::Fatal, e.to_string()),
        };

        let Some(item) = details.into_iter().next() else {
            // Deleted or private upstream; the record can never progress.
            let reason = format!("video {} no longer available", content.external_video_id);
            if let Err(e) = self
                .services
                .store
                .set_content_state(content.id, ContentState::Failed, Some(&reason))
                .await
            {
                return JobOutcome::fail(FailKind::Transient, e.to_string());
            }
            return JobOutcome::fail(FailKind::Validation, reason);
        };

        let patch = MetadataPatch {
            title: Some(item.title),
            description: Some(item.description),
            published_at: Some(item.published_at),
            duration_sec: item.duration_sec,
            view_count: item.view_count,
            thumbnail_url: item.thumbnail_url,
            canonical_url: item.canonical_url,
        };
        if let Err(e) = self.services.store.apply_metadata(content.id, &patch).await {
            return JobOutcome::fail(FailKind::Transient, e.to_string());
        }

        // Redelivery after a crash may find the state already advanced.
        match self
            .services
            .store
            .transition_content_state(
                content.id,
                &[ContentState::Discovered, ContentState::MetadataReady],
                ContentState::MetadataReady,
            )
            .await
        {
            Ok(_) => {}
            Err(e) => return JobOutcome::fail(FailKind::Transient, e.to_string()),
        }

        if let Err(e) = self.services.enqueue_planning(content.id).await {
            return JobOutcome::fail(FailKind::Transient, e.to_string());
        }

        info!(
            content_id = %content.id,
            duration_sec = patch.duration_sec,
            "metadata merged, planning enqueued"
        );
        JobOutcome::Complete
    }
}
