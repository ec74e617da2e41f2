//! Discovery stage
//!
//! Polls a channel's upload collection and creates Content records for
//! unknown videos, fanning each out to the metadata queue. The upload
//! collection id is resolved once and cached on the channel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::model::{Content, SourceType};
use crate::queue::{FailKind, Job, JobContext, JobHandler, JobOutcome};

use super::{parse_payload, DiscoveryPayload, StageServices};

/// Fetch size used for the initial backfill of a new channel.
const INITIAL_FETCH_LIMIT: u32 = 50;

/// Backfills ignore anything published before this floor.
const PUBLICATION_FLOOR: &str = "2022-01-01T00:00:00Z";

/// `channel-discovery` handler
pub struct DiscoveryStage {
    services: Arc<StageServices>,
}

impl DiscoveryStage {
    /// Create the stage.
    pub fn new(services: Arc<StageServices>) -> Self {
        Self { services }
    }

    fn publication_floor() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(PUBLICATION_FLOOR)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_default()
    }
}

#[async_trait]
impl JobHandler for DiscoveryStage {
    async fn process(&self, job: &Job, _ctx: &JobContext) -> JobOutcome {
        let payload: DiscoveryPayload = match parse_payload(job) {
            Ok(payload) => payload,
            Err(outcome) => return outcome,
        };

        let channel = match self.services.store.get_channel(payload.channel_id).await {
            Ok(channel) => channel,
            Err(e) => return JobOutcome::fail(FailKind::Validation, e.to_string()),
        };

        if channel.source_type != SourceType::Youtube {
            // No provider for this platform yet; scheduled runs stay quiet.
            info!(
                channel_id = %channel.id,
                source_type = ?channel.source_type,
                "unsupported source type, skipping discovery"
            );
            return JobOutcome::Complete;
        }

        // Resolve and cache the upload collection on first contact.
        let uploads = match &channel.upload_collection_id {
            Some(uploads) => uploads.clone(),
            None => {
                let uploads = match self
                    .services
                    .source
                    .resolve_upload_collection(&channel.external_id)
                    .await
                {
                    Ok(uploads) => uploads,
                    Err(e) if e.is_transient() => {
                        return JobOutcome::fail(FailKind::Transient, e.to_string())
                    }
                    Err(e) => return JobOutcome::fail(FailKind::Fatal, e.to_string()),
                };
                if let Err(e) = self
                    .services
                    .store
                    .set_channel_upload_collection(channel.id, &uploads)
                    .await
                {
                    return JobOutcome::fail(FailKind::Transient, e.to_string());
                }
                uploads
            }
        };

        let limit = if payload.initial_fetch {
            INITIAL_FETCH_LIMIT
        } else {
            channel.fetch_last_n
        };

        let page = match self
            .services
            .source
            .list_recent_items(&uploads, limit, None)
            .await
        {
            Ok(page) => page,
            Err(e) if e.is_transient() => {
                return JobOutcome::fail(FailKind::Transient, e.to_string())
            }
            Err(e) => return JobOutcome::fail(FailKind::Fatal, e.to_string()),
        };

        let floor = Self::publication_floor();
        let mut discovered = 0_u32;
        for item in page.items {
            if payload.initial_fetch && item.published_at < floor {
                continue;
            }

            let mut content = Content::discovered(
                channel.id,
                &item.id,
                &item.title,
                &item.description,
                Some(item.published_at),
            );
            content.thumbnail_url = item.thumbnail_url.clone();
            content.canonical_url = item.canonical_url.clone();

            let inserted = match self.services.store.insert_content(&content).await {
                Ok(inserted) => inserted,
                Err(e) => return JobOutcome::fail(FailKind::Transient, e.to_string()),
            };
            if !inserted {
                debug!(external_video_id = %item.id, "video already known");
                continue;
            }

            discovered += 1;
            if let Err(e) = self.services.enqueue_metadata(content.id).await {
                warn!(content_id = %content.id, error = %e, "failed to enqueue metadata job");
            }
        }

        info!(
            channel_id = %channel.id,
            discovered,
            initial_fetch = payload.initial_fetch,
            "discovery run finished"
        );
        JobOutcome::Complete
    }
}
