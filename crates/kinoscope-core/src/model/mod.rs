//! Persisted pipeline entities
//!
//! Channel, Content, Segment, Prompt and quota violation records, with the
//! state machines the stages drive. State enums serialize as
//! SCREAMING_SNAKE_CASE strings both in JSON and in the database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// States
// ============================================================================

/// Lifecycle state of a Content (video)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentState {
    /// Known to exist; metadata not yet fetched
    Discovered,
    /// Authoritative metadata merged
    MetadataReady,
    /// Segments committed; analysis in flight
    Processing,
    /// Combined artifact written
    Analyzed,
    /// Terminal failure
    Failed,
    /// Reset requested; will return to Processing
    RetryPending,
}

impl ContentState {
    /// Stable database representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "DISCOVERED",
            Self::MetadataReady => "METADATA_READY",
            Self::Processing => "PROCESSING",
            Self::Analyzed => "ANALYZED",
            Self::Failed => "FAILED",
            Self::RetryPending => "RETRY_PENDING",
        }
    }

    /// Parse the database representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DISCOVERED" => Some(Self::Discovered),
            "METADATA_READY" => Some(Self::MetadataReady),
            "PROCESSING" => Some(Self::Processing),
            "ANALYZED" => Some(Self::Analyzed),
            "FAILED" => Some(Self::Failed),
            "RETRY_PENDING" => Some(Self::RetryPending),
            _ => None,
        }
    }
}

/// Lifecycle state of a Segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentState {
    /// Planned, not yet analyzed
    Pending,
    /// Provider call in flight
    Processing,
    /// Analysis artifact persisted
    Analyzed,
    /// Terminal failure
    Failed,
    /// Gave up after repeated model overloads
    Overloaded,
}

impl SegmentState {
    /// Stable database representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Analyzed => "ANALYZED",
            Self::Failed => "FAILED",
            Self::Overloaded => "OVERLOADED",
        }
    }

    /// Parse the database representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "ANALYZED" => Some(Self::Analyzed),
            "FAILED" => Some(Self::Failed),
            "OVERLOADED" => Some(Self::Overloaded),
            _ => None,
        }
    }
}

/// Source platform of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    /// YouTube channel
    Youtube,
    /// Telegram channel (not yet supported by any provider)
    Telegram,
    /// TikTok account (not yet supported by any provider)
    Tiktok,
}

impl SourceType {
    /// Stable database representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Youtube => "YOUTUBE",
            Self::Telegram => "TELEGRAM",
            Self::Tiktok => "TIKTOK",
        }
    }

    /// Parse the database representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "YOUTUBE" => Some(Self::Youtube),
            "TELEGRAM" => Some(Self::Telegram),
            "TIKTOK" => Some(Self::Tiktok),
            _ => None,
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A monitored source channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    /// Channel id
    pub id: Uuid,
    /// Source platform
    pub source_type: SourceType,
    /// Platform channel identifier
    pub external_id: String,
    /// Display name
    pub display_name: String,
    /// Discovery schedule (5-field cron)
    pub cron_pattern: String,
    /// Items fetched per discovery run
    pub fetch_last_n: u32,
    /// Optional author context threaded into prompts
    pub author_context: Option<String>,
    /// Cached upload collection id, resolved on first discovery
    pub upload_collection_id: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    /// Create a channel with the default schedule.
    pub fn new(
        source_type: SourceType,
        external_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_type,
            external_id: external_id.into(),
            display_name: display_name.into(),
            cron_pattern: "0 */6 * * *".to_string(),
            fetch_last_n: 5,
            author_context: None,
            upload_collection_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stable repeatable-job id for this channel's discovery schedule.
    #[must_use]
    pub fn discovery_job_id(&self) -> String {
        format!("discover:{}", self.id)
    }

    /// Stable repeatable-job id for this channel's stats refresh.
    #[must_use]
    pub fn stats_job_id(&self) -> String {
        format!("stats:{}", self.id)
    }
}

/// One point of the viewer statistics time series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatPoint {
    /// Sample timestamp
    pub at: DateTime<Utc>,
    /// View count at that time
    pub view_count: u64,
}

/// A discovered video and its analysis artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    /// Content id
    pub id: Uuid,
    /// Owning channel
    pub channel_id: Uuid,
    /// Platform video id, unique
    pub external_video_id: String,
    /// Title snapshot
    pub title: String,
    /// Description snapshot
    pub description: String,
    /// Publication timestamp
    pub published_at: Option<DateTime<Utc>>,
    /// Authoritative duration in seconds
    pub duration_sec: Option<u32>,
    /// Latest view count
    pub view_count: Option<u64>,
    /// Thumbnail URL
    pub thumbnail_url: Option<String>,
    /// Canonical watch URL
    pub canonical_url: Option<String>,
    /// Segment count frozen by chunk planning
    pub expected_segment_count: Option<u32>,
    /// Lifecycle state
    pub state: ContentState,
    /// Combined analysis artifact
    pub combined_analysis: Option<serde_json::Value>,
    /// Every model that contributed to the artifact
    pub models_used: Vec<String>,
    /// Prompt version stamped on the artifact
    pub prompt_version: Option<u32>,
    /// When the artifact was written
    pub combined_at: Option<DateTime<Utc>>,
    /// Human-readable failure reason
    pub last_error: Option<String>,
    /// Viewer statistics time series
    pub statistics: Vec<StatPoint>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Content {
    /// Create a freshly discovered content record.
    pub fn discovered(
        channel_id: Uuid,
        external_video_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        published_at: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            channel_id,
            external_video_id: external_video_id.into(),
            title: title.into(),
            description: description.into(),
            published_at,
            duration_sec: None,
            view_count: None,
            thumbnail_url: None,
            canonical_url: None,
            expected_segment_count: None,
            state: ContentState::Discovered,
            combined_analysis: None,
            models_used: Vec::new(),
            prompt_version: None,
            combined_at: None,
            last_error: None,
            statistics: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Stable job id collapsing concurrent combination triggers.
    #[must_use]
    pub fn combination_job_id(&self) -> String {
        combination_job_id(self.id)
    }
}

/// Stable combination job id for a content id.
#[must_use]
pub fn combination_job_id(content_id: Uuid) -> String {
    format!("combine:{content_id}")
}

/// One time-bounded slice of a video
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    /// Segment id
    pub id: Uuid,
    /// Owning content
    pub content_id: Uuid,
    /// Position within the video; `(content_id, index)` is unique
    pub index: u32,
    /// Start offset in seconds
    pub start_sec: u32,
    /// End offset in seconds
    pub end_sec: u32,
    /// Lifecycle state
    pub state: SegmentState,
    /// Analysis artifact
    pub analysis: Option<serde_json::Value>,
    /// Model that produced the artifact
    pub model_used: Option<String>,
    /// Wall-clock analysis duration
    pub processing_ms: Option<u64>,
    /// Failure reason
    pub error: Option<String>,
    /// Overload retry counter
    pub retry_count: u32,
    /// Prompt version used
    pub prompt_version: Option<u32>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Segment {
    /// Create a pending segment.
    #[must_use]
    pub fn pending(content_id: Uuid, index: u32, start_sec: u32, end_sec: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content_id,
            index,
            start_sec,
            end_sec,
            state: SegmentState::Pending,
            analysis: None,
            model_used: None,
            processing_ms: None,
            error: None,
            retry_count: 0,
            prompt_version: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Segment length in seconds.
    #[must_use]
    pub fn duration_sec(&self) -> u32 {
        self.end_sec - self.start_sec
    }
}

/// Intended use of a prompt record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromptType {
    /// Per-segment analysis prompt
    SegmentAnalysis,
    /// Combination synthesis prompt
    Combination,
}

impl PromptType {
    /// Stable database representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SegmentAnalysis => "SEGMENT_ANALYSIS",
            Self::Combination => "COMBINATION",
        }
    }

    /// Parse the database representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SEGMENT_ANALYSIS" => Some(Self::SegmentAnalysis),
            "COMBINATION" => Some(Self::Combination),
            _ => None,
        }
    }
}

/// A versioned prompt template; `(name, version)` is unique
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    /// Prompt id
    pub id: Uuid,
    /// Template family name
    pub name: String,
    /// Version within the family
    pub version: u32,
    /// Template body with `{placeholder}` substitutions
    pub template: String,
    /// Whether this version is served
    pub is_active: bool,
    /// Intended use
    pub prompt_type: PromptType,
    /// Declared response schema
    pub response_schema: Option<serde_json::Value>,
    /// Response MIME type override
    pub mime_type: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// A persisted provider quota violation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaViolationRecord {
    /// Record id
    pub id: Uuid,
    /// Rejected model
    pub model: String,
    /// Breached dimension (`RPM`/`TPM`/`RPD`/`UNKNOWN`)
    pub kind: String,
    /// Provider-suggested wait
    pub retry_delay_secs: Option<u64>,
    /// Raw provider payload
    pub raw_payload: String,
    /// When the violation was observed
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips() {
        for state in [
            ContentState::Discovered,
            ContentState::MetadataReady,
            ContentState::Processing,
            ContentState::Analyzed,
            ContentState::Failed,
            ContentState::RetryPending,
        ] {
            assert_eq!(ContentState::parse(state.as_str()), Some(state));
        }
        for state in [
            SegmentState::Pending,
            SegmentState::Processing,
            SegmentState::Analyzed,
            SegmentState::Failed,
            SegmentState::Overloaded,
        ] {
            assert_eq!(SegmentState::parse(state.as_str()), Some(state));
        }
        assert!(ContentState::parse("BOGUS").is_none());
    }

    #[test]
    fn test_serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&ContentState::MetadataReady).unwrap();
        assert_eq!(json, "\"METADATA_READY\"");
    }

    #[test]
    fn test_stable_job_ids() {
        let channel = Channel::new(SourceType::Youtube, "UC123", "Chan");
        assert_eq!(
            channel.discovery_job_id(),
            format!("discover:{}", channel.id)
        );

        let content = Content::discovered(channel.id, "vid", "t", "d", None);
        assert_eq!(
            content.combination_job_id(),
            format!("combine:{}", content.id)
        );
    }

    #[test]
    fn test_segment_duration() {
        let segment = Segment::pending(Uuid::new_v4(), 1, 870, 1500);
        assert_eq!(segment.duration_sec(), 630);
    }
}
