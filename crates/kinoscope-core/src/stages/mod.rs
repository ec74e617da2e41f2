//! Pipeline stages
//!
//! One handler per queue: discovery, metadata, chunk planning, segment
//! analysis, combination, stats and quota cleanup. Handlers share a single
//! [`StageServices`] bundle and communicate only through the store and the
//! queues; no state survives a job boundary.

mod analysis;
mod cleanup;
mod combination;
mod discovery;
mod metadata;
mod planning;
mod stats;

#[cfg(test)]
mod tests;

pub use analysis::AnalysisStage;
pub use cleanup::CleanupStage;
pub use combination::CombinationStage;
pub use discovery::DiscoveryStage;
pub use metadata::MetadataStage;
pub use planning::PlanningStage;
pub use stats::StatsStage;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use kinoscope_llm::{AiProvider, ModelSelector, QuotaLedger};
use kinoscope_source::SourceProvider;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::fanin::FanInController;
use crate::queue::{queues, FailKind, Job, JobOptions, JobOutcome, QueueStore};
use crate::ratelimit::RateLimitCoordinator;
use crate::store::PipelineStore;

// ============================================================================
// Job payloads
// ============================================================================

/// `channel-discovery` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryPayload {
    /// Channel to poll
    pub channel_id: Uuid,
    /// Backfill mode: larger fetch, filtered to the publication floor
    #[serde(default)]
    pub initial_fetch: bool,
}

/// `content-metadata` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataPayload {
    /// Content to enrich
    pub content_id: Uuid,
}

/// `content-processing` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningPayload {
    /// Content to chunk
    pub content_id: Uuid,
}

/// `segment-analysis` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisPayload {
    /// Owning content
    pub content_id: Uuid,
    /// Segment index within the content
    pub segment_index: u32,
    /// Bypass model selection
    #[serde(default)]
    pub force_model: Option<String>,
}

/// `combination` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinationPayload {
    /// Content to combine
    pub content_id: Uuid,
    /// Bypass model selection for the synthesis call
    #[serde(default)]
    pub force_model: Option<String>,
    /// Combine over a recoverable majority despite failed segments
    #[serde(default)]
    pub allow_partial: bool,
}

/// `stats` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsPayload {
    /// Channel whose contents get refreshed
    pub channel_id: Uuid,
}

/// Job names, one per stage
pub mod job_names {
    /// Channel discovery
    pub const DISCOVER: &str = "discover-channel";
    /// Metadata enrichment
    pub const METADATA: &str = "fetch-metadata";
    /// Chunk planning
    pub const PLAN: &str = "plan-segments";
    /// Segment analysis
    pub const ANALYZE: &str = "analyze-segment";
    /// Combination
    pub const COMBINE: &str = "combine-content";
    /// Stats refresh
    pub const STATS: &str = "refresh-stats";
    /// Quota cleanup
    pub const CLEANUP: &str = "prune-quota";
}

// ============================================================================
// Shared services
// ============================================================================

/// Everything a stage handler needs, bundled once at startup
pub struct StageServices {
    /// Pipeline configuration
    pub config: PipelineConfig,
    /// State store
    pub store: Arc<dyn PipelineStore>,
    /// Queue store
    pub queue: Arc<QueueStore>,
    /// Video source provider
    pub source: Arc<dyn SourceProvider>,
    /// Generative model provider
    pub provider: Arc<dyn AiProvider>,
    /// Shared quota ledger
    pub ledger: Arc<QuotaLedger>,
    /// Model selector over the ledger
    pub selector: ModelSelector,
    /// Rate-limit coordinator
    pub coordinator: RateLimitCoordinator,
    /// Fan-in controller
    pub fanin: FanInController,
}

impl StageServices {
    /// Wire the service bundle from its externally-constructed parts.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn PipelineStore>,
        queue: Arc<QueueStore>,
        source: Arc<dyn SourceProvider>,
        provider: Arc<dyn AiProvider>,
    ) -> Arc<Self> {
        let ledger = Arc::new(QuotaLedger::new(config.tier, config.overload_cooldown()));
        let selector = ModelSelector::new(Arc::clone(&ledger));
        let coordinator = RateLimitCoordinator::new(Arc::clone(&ledger));
        let fanin = FanInController::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            config.max_attempts_combination,
            config.base_backoff_ms,
        );

        Arc::new(Self {
            config,
            store,
            queue,
            source,
            provider,
            ledger,
            selector,
            coordinator,
            fanin,
        })
    }

    /// Enqueue metadata enrichment for a content.
    pub async fn enqueue_metadata(&self, content_id: Uuid) -> Result<()> {
        self.queue
            .enqueue(
                queues::CONTENT_METADATA,
                job_names::METADATA,
                &serde_json::to_value(MetadataPayload { content_id })?,
                JobOptions::default()
                    .with_job_id(format!("metadata:{content_id}"))
                    .with_backoff_base_ms(self.config.base_backoff_ms),
            )
            .await?;
        Ok(())
    }

    /// Enqueue chunk planning for a content.
    pub async fn enqueue_planning(&self, content_id: Uuid) -> Result<()> {
        self.queue
            .enqueue(
                queues::CONTENT_PROCESSING,
                job_names::PLAN,
                &serde_json::to_value(PlanningPayload { content_id })?,
                JobOptions::default()
                    .with_job_id(format!("plan:{content_id}"))
                    .with_backoff_base_ms(self.config.base_backoff_ms),
            )
            .await?;
        Ok(())
    }

    /// Enqueue analysis of one segment.
    pub async fn enqueue_analysis(&self, content_id: Uuid, segment_index: u32) -> Result<()> {
        self.queue
            .enqueue(
                queues::SEGMENT_ANALYSIS,
                job_names::ANALYZE,
                &serde_json::to_value(AnalysisPayload {
                    content_id,
                    segment_index,
                    force_model: None,
                })?,
                JobOptions::default()
                    .with_job_id(format!("analyze:{content_id}:{segment_index}"))
                    .with_attempts(self.config.max_attempts_analysis)
                    .with_backoff_base_ms(self.config.base_backoff_ms),
            )
            .await?;
        Ok(())
    }

    /// Enqueue an on-demand discovery run.
    pub async fn enqueue_discovery(&self, channel_id: Uuid, initial_fetch: bool) -> Result<()> {
        self.queue
            .enqueue(
                queues::CHANNEL_DISCOVERY,
                job_names::DISCOVER,
                &serde_json::to_value(DiscoveryPayload {
                    channel_id,
                    initial_fetch,
                })?,
                JobOptions::default().with_backoff_base_ms(self.config.base_backoff_ms),
            )
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Repeatable-job reconciliation
    // ------------------------------------------------------------------

    /// Reconcile a channel's repeatable jobs with its definition.
    ///
    /// Keyed by `discover:{id}` / `stats:{id}`, so there is at most one
    /// schedule per channel; updates replace the cron in place.
    pub async fn reconcile_channel(&self, channel: &crate::model::Channel) -> Result<()> {
        self.queue
            .upsert_repeatable(
                &channel.discovery_job_id(),
                queues::CHANNEL_DISCOVERY,
                job_names::DISCOVER,
                &serde_json::to_value(DiscoveryPayload {
                    channel_id: channel.id,
                    initial_fetch: false,
                })?,
                &channel.cron_pattern,
            )
            .await?;

        self.queue
            .upsert_repeatable(
                &channel.stats_job_id(),
                queues::STATS,
                job_names::STATS,
                &serde_json::to_value(StatsPayload {
                    channel_id: channel.id,
                })?,
                STATS_CRON,
            )
            .await?;
        Ok(())
    }

    /// Remove a deleted channel's repeatable jobs.
    pub async fn remove_channel_jobs(&self, channel_id: Uuid) -> Result<()> {
        self.queue
            .remove_repeatable(&format!("discover:{channel_id}"))
            .await?;
        self.queue
            .remove_repeatable(&format!("stats:{channel_id}"))
            .await?;
        Ok(())
    }

    /// Reconcile every stored channel plus the housekeeping schedule.
    /// Called once at startup.
    pub async fn reconcile_all(&self) -> Result<()> {
        self.queue
            .upsert_repeatable(
                QUOTA_CLEANUP_JOB_ID,
                queues::QUOTA_CLEANUP,
                job_names::CLEANUP,
                &serde_json::json!({}),
                QUOTA_CLEANUP_CRON,
            )
            .await?;

        let channels = self.store.list_channels().await?;
        let reconciled = channels.len();
        for channel in channels {
            self.reconcile_channel(&channel).await?;
        }
        tracing::info!(channels = reconciled, "repeatable jobs reconciled");
        Ok(())
    }
}

/// Stable id of the housekeeping repeatable.
const QUOTA_CLEANUP_JOB_ID: &str = "quota-cleanup";

/// Housekeeping cadence.
const QUOTA_CLEANUP_CRON: &str = "*/30 * * * *";

/// Stats refresh cadence per channel.
const STATS_CRON: &str = "0 */6 * * *";

// ============================================================================
// Handler helpers
// ============================================================================

/// Parse a job payload, turning malformed input into a terminal validation
/// failure.
pub(crate) fn parse_payload<T: DeserializeOwned>(job: &Job) -> std::result::Result<T, JobOutcome> {
    serde_json::from_value(job.payload.clone()).map_err(|e| {
        JobOutcome::fail(
            FailKind::Validation,
            format!("malformed {} payload: {e}", job.name),
        )
    })
}

/// Substitute `{key}` placeholders in a prompt template.
pub(crate) fn render_template(template: &str, vars: &[(&str, String)]) -> String {
    let mut rendered = template.to_string();
    for (key, value) in vars {
        rendered = rendered.replace(&format!("{{{key}}}"), value);
    }
    rendered
}

/// Map a store error onto a retryable failure outcome.
///
/// Lets handlers thread store calls with `?` while returning `JobOutcome`
/// from both arms (`run(...).await.unwrap_or_else(|outcome| outcome)`).
pub(crate) fn store_try<T>(
    result: crate::error::Result<T>,
) -> std::result::Result<T, JobOutcome> {
    result.map_err(|e| JobOutcome::fail(FailKind::Transient, e.to_string()))
}

/// Build a persistable violation record from a classified quota error.
pub(crate) fn violation_record(
    model: &str,
    kind: &kinoscope_llm::ProviderErrorKind,
    raw: &str,
) -> Option<crate::model::QuotaViolationRecord> {
    let kinoscope_llm::ProviderErrorKind::Quota {
        dimension,
        retry_delay_secs,
        ..
    } = kind
    else {
        return None;
    };
    Some(crate::model::QuotaViolationRecord {
        id: Uuid::new_v4(),
        model: model.to_string(),
        kind: dimension.as_str().to_string(),
        retry_delay_secs: *retry_delay_secs,
        raw_payload: raw.to_string(),
        created_at: chrono::Utc::now(),
    })
}

/// Top-level sections every analysis artifact must carry, non-empty.
pub(crate) const REQUIRED_SECTIONS: &[&str] = &["summary", "topics"];

/// Validate the structured analysis artifact.
pub(crate) fn validate_analysis(value: &serde_json::Value) -> std::result::Result<(), String> {
    let Some(object) = value.as_object() else {
        return Err("analysis output is not a JSON object".to_string());
    };
    for section in REQUIRED_SECTIONS {
        let present = match object.get(*section) {
            Some(serde_json::Value::String(s)) => !s.is_empty(),
            Some(serde_json::Value::Array(a)) => !a.is_empty(),
            Some(v) => !v.is_null(),
            None => false,
        };
        if !present {
            return Err(format!("missing required section: {section}"));
        }
    }
    Ok(())
}
