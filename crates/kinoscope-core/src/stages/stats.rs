//! Stats stage
//!
//! Periodic viewer-count refresh for a channel's videos. Off the critical
//! path: provider hiccups are logged and the job still completes.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::model::StatPoint;
use crate::queue::{FailKind, Job, JobContext, JobHandler, JobOutcome};

use super::{parse_payload, StageServices, StatsPayload};

/// Detail lookups are batched to the provider's page size.
const BATCH_SIZE: usize = 50;

/// `stats` handler
pub struct StatsStage {
    services: Arc<StageServices>,
}

impl StatsStage {
    /// Create the stage.
    pub fn new(services: Arc<StageServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl JobHandler for StatsStage {
    async fn process(&self, job: &Job, _ctx: &JobContext) -> JobOutcome {
        let payload: StatsPayload = match parse_payload(job) {
            Ok(payload) => payload,
            Err(outcome) => return outcome,
        };

        let contents = match self
            .services
            .store
            .list_contents_by_channel(payload.channel_id)
            .await
        {
            Ok(contents) => contents,
            Err(e) => return JobOutcome::fail(FailKind::Transient, e.to_string()),
        };
        if contents.is_empty() {
            return JobOutcome::Complete;
        }

        let now = Utc::now();
        let mut refreshed = 0_u32;
        for batch in contents.chunks(BATCH_SIZE) {
            let ids: Vec<String> = batch.iter().map(|c| c.external_video_id.clone()).collect();
            let details = match self.services.source.get_item_details(&ids).await {
                Ok(details) => details,
                Err(e) => {
                    // Never propagated; the next scheduled run catches up.
                    warn!(channel_id = %payload.channel_id, error = %e, "stats refresh batch failed");
                    continue;
                }
            };

            for item in details {
                let Some(view_count) = item.view_count else {
                    continue;
                };
                let Some(content) = batch.iter().find(|c| c.external_video_id == item.id) else {
                    continue;
                };
                if let Err(e) = self
                    .services
                    .store
                    .append_statistic(
                        content.id,
                        &StatPoint {
                            at: now,
                            view_count,
                        },
                    )
                    .await
                {
                    warn!(content_id = %content.id, error = %e, "failed to append statistic");
                    continue;
                }
                refreshed += 1;
            }
        }

        debug!(channel_id = %payload.channel_id, refreshed, "stats refresh finished");
        JobOutcome::Complete
    }
}
