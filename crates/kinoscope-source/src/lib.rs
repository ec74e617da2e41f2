//! Kinoscope Source - video source provider access
//!
//! Abstracts the upstream video platform behind [`SourceProvider`]:
//! resolving a channel's upload collection, paging through recent items,
//! and fetching authoritative per-item details. Ships a YouTube Data API
//! client and an in-memory mock for tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod duration;
pub mod error;
pub mod mock;
pub mod youtube;

pub use duration::parse_iso8601_duration;
pub use error::{Error, Result};
pub use mock::MockSource;
pub use youtube::{YouTubeClient, YouTubeConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One video item as reported by the source platform.
///
/// Listing endpoints populate the snapshot fields; `duration_sec` and
/// `view_count` are only authoritative from [`SourceProvider::get_item_details`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceItem {
    /// Platform video id
    pub id: String,
    /// Title snapshot
    pub title: String,
    /// Description snapshot
    pub description: String,
    /// Publication timestamp
    pub published_at: DateTime<Utc>,
    /// Duration in seconds (details only)
    pub duration_sec: Option<u32>,
    /// View count (details only)
    pub view_count: Option<u64>,
    /// Best-available thumbnail URL
    pub thumbnail_url: Option<String>,
    /// Channel display name
    pub channel_title: Option<String>,
    /// Canonical watch URL
    pub canonical_url: Option<String>,
}

/// One page of a listing
#[derive(Debug, Clone)]
pub struct ItemPage {
    /// Items on this page, newest first
    pub items: Vec<SourceItem>,
    /// Opaque token for the next page, when more exist
    pub next_page_token: Option<String>,
}

/// A video source platform
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Resolve a channel's canonical upload collection identifier.
    async fn resolve_upload_collection(&self, channel_external_id: &str) -> Result<String>;

    /// List the most recent items of an upload collection.
    async fn list_recent_items(
        &self,
        upload_collection_id: &str,
        limit: u32,
        page_token: Option<&str>,
    ) -> Result<ItemPage>;

    /// Fetch authoritative details for a batch of item ids.
    async fn get_item_details(&self, ids: &[String]) -> Result<Vec<SourceItem>>;
}
