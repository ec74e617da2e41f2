//! YouTube - Data API v3 source provider
//!
//! Three endpoints back the [`SourceProvider`] contract:
//! `channels` (uploads playlist resolution), `playlistItems` (recent
//! listing), and `videos` (batch details with ISO 8601 durations).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::duration::parse_iso8601_duration;
use crate::error::{Error, Result};
use crate::{ItemPage, SourceItem, SourceProvider};

/// Default API base URL
const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Largest page the API serves
const MAX_PAGE_SIZE: u32 = 50;

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResource {
    content_details: ChannelContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: RelatedPlaylists,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    snippet: PlaylistItemSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemSnippet {
    title: String,
    #[serde(default)]
    description: String,
    published_at: DateTime<Utc>,
    resource_id: ResourceId,
    #[serde(default)]
    thumbnails: Thumbnails,
    #[serde(default)]
    channel_title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    #[serde(default)]
    high: Option<Thumbnail>,
    #[serde(default)]
    medium: Option<Thumbnail>,
    #[serde(default)]
    default: Option<Thumbnail>,
}

impl Thumbnails {
    fn best_url(&self) -> Option<String> {
        self.high
            .as_ref()
            .or(self.medium.as_ref())
            .or(self.default.as_ref())
            .map(|t| t.url.clone())
    }
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoResource {
    id: String,
    snippet: VideoSnippet,
    content_details: VideoContentDetails,
    #[serde(default)]
    statistics: Option<VideoStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    title: String,
    #[serde(default)]
    description: String,
    published_at: DateTime<Utc>,
    #[serde(default)]
    thumbnails: Thumbnails,
    #[serde(default)]
    channel_title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoContentDetails {
    duration: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatistics {
    /// The API reports counts as decimal strings.
    #[serde(default)]
    view_count: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// YouTube client configuration
#[derive(Clone)]
pub struct YouTubeConfig {
    /// API key
    pub api_key: String,
    /// API base URL
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl YouTubeConfig {
    /// Create a configuration with the default endpoint.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for YouTubeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YouTubeConfig")
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// YouTube Data API v3 client
pub struct YouTubeClient {
    client: Client,
    config: YouTubeConfig,
}

impl YouTubeClient {
    /// Create a client from configuration.
    pub fn new(config: YouTubeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}/{}", self.config.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .query(&[("key", self.config.api_key.as_str())])
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::InvalidResponse(e.to_string()))
    }

    fn watch_url(id: &str) -> String {
        format!("https://www.youtube.com/watch?v={id}")
    }
}

#[async_trait]
impl SourceProvider for YouTubeClient {
    fn name(&self) -> &str {
        "youtube"
    }

    async fn resolve_upload_collection(&self, channel_external_id: &str) -> Result<String> {
        let response: ChannelListResponse = self
            .get_json(
                "channels",
                &[("part", "contentDetails"), ("id", channel_external_id)],
            )
            .await?;

        let channel = response
            .items
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("channel {channel_external_id}")))?;

        let uploads = channel.content_details.related_playlists.uploads;
        debug!(channel = channel_external_id, uploads, "resolved upload playlist");
        Ok(uploads)
    }

    async fn list_recent_items(
        &self,
        upload_collection_id: &str,
        limit: u32,
        page_token: Option<&str>,
    ) -> Result<ItemPage> {
        let max_results = limit.clamp(1, MAX_PAGE_SIZE).to_string();
        let mut query = vec![
            ("part", "snippet"),
            ("playlistId", upload_collection_id),
            ("maxResults", max_results.as_str()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let response: PlaylistItemsResponse = self.get_json("playlistItems", &query).await?;

        let items = response
            .items
            .into_iter()
            .map(|item| {
                let snippet = item.snippet;
                let id = snippet.resource_id.video_id;
                SourceItem {
                    canonical_url: Some(Self::watch_url(&id)),
                    thumbnail_url: snippet.thumbnails.best_url(),
                    id,
                    title: snippet.title,
                    description: snippet.description,
                    published_at: snippet.published_at,
                    duration_sec: None,
                    view_count: None,
                    channel_title: snippet.channel_title,
                }
            })
            .collect();

        Ok(ItemPage {
            items,
            next_page_token: response.next_page_token,
        })
    }

    async fn get_item_details(&self, ids: &[String]) -> Result<Vec<SourceItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids.join(",");
        let response: VideoListResponse = self
            .get_json(
                "videos",
                &[
                    ("part", "snippet,contentDetails,statistics"),
                    ("id", joined.as_str()),
                ],
            )
            .await?;

        response
            .items
            .into_iter()
            .map(|video| {
                let duration_sec = parse_iso8601_duration(&video.content_details.duration)?;
                let view_count = video
                    .statistics
                    .and_then(|s| s.view_count)
                    .and_then(|v| v.parse().ok());
                Ok(SourceItem {
                    canonical_url: Some(Self::watch_url(&video.id)),
                    thumbnail_url: video.snippet.thumbnails.best_url(),
                    id: video.id,
                    title: video.snippet.title,
                    description: video.snippet.description,
                    published_at: video.snippet.published_at,
                    duration_sec: Some(duration_sec),
                    view_count,
                    channel_title: video.snippet.channel_title,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playlist_response_parsing() {
        let json = r#"{
            "items": [{
                "snippet": {
                    "title": "Video A",
                    "description": "desc",
                    "publishedAt": "2026-05-01T10:00:00Z",
                    "resourceId": {"videoId": "abc123"},
                    "thumbnails": {"high": {"url": "https://img/hq.jpg"}},
                    "channelTitle": "Chan"
                }
            }],
            "nextPageToken": "tok"
        }"#;

        let parsed: PlaylistItemsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].snippet.resource_id.video_id, "abc123");
        assert_eq!(parsed.next_page_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_video_response_parsing() {
        let json = r#"{
            "items": [{
                "id": "abc123",
                "snippet": {
                    "title": "Video A",
                    "publishedAt": "2026-05-01T10:00:00Z",
                    "thumbnails": {}
                },
                "contentDetails": {"duration": "PT25M10S"},
                "statistics": {"viewCount": "120345"}
            }]
        }"#;

        let parsed: VideoListResponse = serde_json::from_str(json).unwrap();
        let video = &parsed.items[0];
        assert_eq!(video.content_details.duration, "PT25M10S");
        assert_eq!(video.statistics.as_ref().unwrap().view_count.as_deref(), Some("120345"));
    }

    #[test]
    fn test_thumbnail_fallback_order() {
        let thumbs = Thumbnails {
            high: None,
            medium: Some(Thumbnail {
                url: "medium".to_string(),
            }),
            default: Some(Thumbnail {
                url: "default".to_string(),
            }),
        };
        assert_eq!(thumbs.best_url().as_deref(), Some("medium"));
    }

    #[test]
    fn test_watch_url() {
        assert_eq!(
            YouTubeClient::watch_url("abc"),
            "https://www.youtube.com/watch?v=abc"
        );
    }
}
