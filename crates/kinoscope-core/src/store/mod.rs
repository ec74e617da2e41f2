//! Pipeline state store
//!
//! [`PipelineStore`] is the sole source of truth for persisted pipeline
//! state; workers never hold entity state across job boundaries. The SQLite
//! implementation lives in [`sqlite`].

mod sqlite;

#[cfg(test)]
mod tests;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    Channel, Content, ContentState, Prompt, PromptType, QuotaViolationRecord, Segment,
    SegmentState, StatPoint,
};

/// Authoritative metadata merged onto a Content by the metadata stage
#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    /// Title
    pub title: Option<String>,
    /// Description
    pub description: Option<String>,
    /// Publication timestamp
    pub published_at: Option<DateTime<Utc>>,
    /// Duration in seconds
    pub duration_sec: Option<u32>,
    /// View count
    pub view_count: Option<u64>,
    /// Thumbnail URL
    pub thumbnail_url: Option<String>,
    /// Canonical watch URL
    pub canonical_url: Option<String>,
}

/// Persistent store for pipeline entities
#[async_trait]
pub trait PipelineStore: Send + Sync {
    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    /// Insert a channel.
    async fn create_channel(&self, channel: &Channel) -> Result<()>;

    /// Fetch a channel by id.
    async fn get_channel(&self, id: Uuid) -> Result<Channel>;

    /// List every channel.
    async fn list_channels(&self) -> Result<Vec<Channel>>;

    /// Replace a channel's mutable fields.
    async fn update_channel(&self, channel: &Channel) -> Result<()>;

    /// Delete a channel and, by ownership, its contents and segments.
    async fn delete_channel(&self, id: Uuid) -> Result<()>;

    /// Cache the resolved upload collection id.
    async fn set_channel_upload_collection(&self, id: Uuid, collection_id: &str) -> Result<()>;

    // ------------------------------------------------------------------
    // Contents
    // ------------------------------------------------------------------

    /// Insert a content record.
    ///
    /// Returns `false` when `external_video_id` already exists; the caller
    /// treats the video as already known.
    async fn insert_content(&self, content: &Content) -> Result<bool>;

    /// Fetch a content by id.
    async fn get_content(&self, id: Uuid) -> Result<Content>;

    /// Find a content by platform video id.
    async fn find_content_by_external_id(&self, external_video_id: &str) -> Result<Option<Content>>;

    /// List the contents of a channel, newest first.
    async fn list_contents_by_channel(&self, channel_id: Uuid) -> Result<Vec<Content>>;

    /// Merge authoritative metadata onto a content.
    async fn apply_metadata(&self, id: Uuid, patch: &MetadataPatch) -> Result<()>;

    /// Set a content's state and failure reason unconditionally.
    async fn set_content_state(
        &self,
        id: Uuid,
        state: ContentState,
        last_error: Option<&str>,
    ) -> Result<()>;

    /// Compare-and-swap state transition.
    ///
    /// Returns `false` when the current state is not in `from`.
    async fn transition_content_state(
        &self,
        id: Uuid,
        from: &[ContentState],
        to: ContentState,
    ) -> Result<bool>;

    /// Write the combined artifact and move the content to ANALYZED.
    async fn set_combined_analysis(
        &self,
        id: Uuid,
        artifact: &serde_json::Value,
        models_used: &[String],
        prompt_version: Option<u32>,
        combined_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Append a point to the viewer statistics time series.
    async fn append_statistic(&self, id: Uuid, point: &StatPoint) -> Result<()>;

    // ------------------------------------------------------------------
    // Segments
    // ------------------------------------------------------------------

    /// Atomically insert the planned segments and freeze
    /// `expected_segment_count` on the content.
    async fn commit_segment_plan(
        &self,
        content_id: Uuid,
        segments: &[Segment],
        state: ContentState,
    ) -> Result<()>;

    /// Fetch one segment by `(content_id, index)`.
    async fn get_segment(&self, content_id: Uuid, index: u32) -> Result<Segment>;

    /// List a content's segments in index order, optionally filtered by state.
    async fn list_segments(
        &self,
        content_id: Uuid,
        state: Option<SegmentState>,
    ) -> Result<Vec<Segment>>;

    /// Count a content's segments in any of the given states.
    async fn count_segments_by_state(
        &self,
        content_id: Uuid,
        states: &[SegmentState],
    ) -> Result<u32>;

    /// Set a segment's transient state.
    async fn set_segment_state(
        &self,
        content_id: Uuid,
        index: u32,
        state: SegmentState,
    ) -> Result<()>;

    /// Persist a successful analysis.
    #[allow(clippy::too_many_arguments)]
    async fn mark_segment_analyzed(
        &self,
        content_id: Uuid,
        index: u32,
        analysis: &serde_json::Value,
        model_used: &str,
        processing_ms: u64,
        prompt_version: Option<u32>,
    ) -> Result<()>;

    /// Persist a terminal segment failure (`FAILED` or `OVERLOADED`).
    async fn mark_segment_failed(
        &self,
        content_id: Uuid,
        index: u32,
        state: SegmentState,
        error: &str,
    ) -> Result<()>;

    /// Increment a segment's overload retry counter, returning the new value.
    async fn bump_segment_retry(&self, content_id: Uuid, index: u32) -> Result<u32>;

    /// Return FAILED/OVERLOADED segments to PENDING; yields the reset indices.
    async fn reset_failed_segments(&self, content_id: Uuid) -> Result<Vec<u32>>;

    // ------------------------------------------------------------------
    // Prompts
    // ------------------------------------------------------------------

    /// Insert or replace a prompt version.
    async fn upsert_prompt(&self, prompt: &Prompt) -> Result<()>;

    /// Fetch the active prompt of a type, highest version first.
    async fn get_active_prompt(&self, prompt_type: PromptType) -> Result<Option<Prompt>>;

    // ------------------------------------------------------------------
    // Quota violations
    // ------------------------------------------------------------------

    /// Persist a provider quota violation.
    async fn record_quota_violation(&self, violation: &QuotaViolationRecord) -> Result<()>;

    /// Most recent violations, newest first.
    async fn list_quota_violations(&self, limit: u32) -> Result<Vec<QuotaViolationRecord>>;

    /// Evict violations past retention (7 days; 24 h for RPD). Returns the
    /// number of rows removed.
    async fn prune_quota_violations(&self, now: DateTime<Utc>) -> Result<u64>;
}
