//! SQLite pipeline store
//!
//! Persists channels, contents, segments, prompts and quota violations.
//! Migrations run at open; cascade deletes enforce Content ownership of
//! Segments.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    Channel, Content, ContentState, Prompt, PromptType, QuotaViolationRecord, Segment,
    SegmentState, SourceType, StatPoint,
};
use crate::store::{MetadataPatch, PipelineStore};

/// SQLite-backed pipeline store
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) a store at the given path.
    pub async fn from_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::InvalidConfig(format!("failed to create directory: {e}")))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open an in-memory store (tests).
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(Error::Database)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS channels (
                id TEXT PRIMARY KEY,
                source_type TEXT NOT NULL,
                external_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                cron_pattern TEXT NOT NULL,
                fetch_last_n INTEGER NOT NULL,
                author_context TEXT,
                upload_collection_id TEXT,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contents (
                id TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL,
                external_video_id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                published_at TIMESTAMP,
                duration_sec INTEGER,
                view_count INTEGER,
                thumbnail_url TEXT,
                canonical_url TEXT,
                expected_segment_count INTEGER,
                state TEXT NOT NULL,
                combined_analysis TEXT,
                models_used TEXT NOT NULL DEFAULT '[]',
                prompt_version INTEGER,
                combined_at TIMESTAMP,
                last_error TEXT,
                statistics TEXT NOT NULL DEFAULT '[]',
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS segments (
                id TEXT PRIMARY KEY,
                content_id TEXT NOT NULL,
                idx INTEGER NOT NULL,
                start_sec INTEGER NOT NULL,
                end_sec INTEGER NOT NULL,
                state TEXT NOT NULL,
                analysis TEXT,
                model_used TEXT,
                processing_ms INTEGER,
                error TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                prompt_version INTEGER,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                UNIQUE (content_id, idx),
                FOREIGN KEY (content_id) REFERENCES contents(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS prompts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                version INTEGER NOT NULL,
                template TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                prompt_type TEXT NOT NULL,
                response_schema TEXT,
                mime_type TEXT,
                created_at TIMESTAMP NOT NULL,
                UNIQUE (name, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quota_violations (
                id TEXT PRIMARY KEY,
                model TEXT NOT NULL,
                kind TEXT NOT NULL,
                retry_delay_secs INTEGER,
                raw_payload TEXT NOT NULL DEFAULT '',
                created_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_contents_channel ON contents(channel_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_segments_content ON segments(content_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_violations_model ON quota_violations(model, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ============================================================================
// Row types
// ============================================================================

fn parse_uuid(value: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::InvalidConfig(format!("invalid {what} id: {e}")))
}

#[derive(FromRow)]
struct ChannelRow {
    id: String,
    source_type: String,
    external_id: String,
    display_name: String,
    cron_pattern: String,
    fetch_last_n: i64,
    author_context: Option<String>,
    upload_collection_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ChannelRow> for Channel {
    type Error = Error;

    fn try_from(row: ChannelRow) -> Result<Self> {
        Ok(Channel {
            id: parse_uuid(&row.id, "channel")?,
            source_type: SourceType::parse(&row.source_type).ok_or_else(|| {
                Error::InvalidConfig(format!("invalid source type: {}", row.source_type))
            })?,
            external_id: row.external_id,
            display_name: row.display_name,
            cron_pattern: row.cron_pattern,
            fetch_last_n: row.fetch_last_n as u32,
            author_context: row.author_context,
            upload_collection_id: row.upload_collection_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ContentRow {
    id: String,
    channel_id: String,
    external_video_id: String,
    title: String,
    description: String,
    published_at: Option<DateTime<Utc>>,
    duration_sec: Option<i64>,
    view_count: Option<i64>,
    thumbnail_url: Option<String>,
    canonical_url: Option<String>,
    expected_segment_count: Option<i64>,
    state: String,
    combined_analysis: Option<String>,
    models_used: String,
    prompt_version: Option<i64>,
    combined_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    statistics: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ContentRow> for Content {
    type Error = Error;

    fn try_from(row: ContentRow) -> Result<Self> {
        Ok(Content {
            id: parse_uuid(&row.id, "content")?,
            channel_id: parse_uuid(&row.channel_id, "channel")?,
            external_video_id: row.external_video_id,
            title: row.title,
            description: row.description,
            published_at: row.published_at,
            duration_sec: row.duration_sec.map(|v| v as u32),
            view_count: row.view_count.map(|v| v as u64),
            thumbnail_url: row.thumbnail_url,
            canonical_url: row.canonical_url,
            expected_segment_count: row.expected_segment_count.map(|v| v as u32),
            state: ContentState::parse(&row.state)
                .ok_or_else(|| Error::InvalidConfig(format!("invalid content state: {}", row.state)))?,
            combined_analysis: row
                .combined_analysis
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            models_used: serde_json::from_str(&row.models_used)?,
            prompt_version: row.prompt_version.map(|v| v as u32),
            combined_at: row.combined_at,
            last_error: row.last_error,
            statistics: serde_json::from_str(&row.statistics)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct SegmentRow {
    id: String,
    content_id: String,
    idx: i64,
    start_sec: i64,
    end_sec: i64,
    state: String,
    analysis: Option<String>,
    model_used: Option<String>,
    processing_ms: Option<i64>,
    error: Option<String>,
    retry_count: i64,
    prompt_version: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SegmentRow> for Segment {
    type Error = Error;

    fn try_from(row: SegmentRow) -> Result<Self> {
        Ok(Segment {
            id: parse_uuid(&row.id, "segment")?,
            content_id: parse_uuid(&row.content_id, "content")?,
            index: row.idx as u32,
            start_sec: row.start_sec as u32,
            end_sec: row.end_sec as u32,
            state: SegmentState::parse(&row.state)
                .ok_or_else(|| Error::InvalidConfig(format!("invalid segment state: {}", row.state)))?,
            analysis: row
                .analysis
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            model_used: row.model_used,
            processing_ms: row.processing_ms.map(|v| v as u64),
            error: row.error,
            retry_count: row.retry_count as u32,
            prompt_version: row.prompt_version.map(|v| v as u32),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct PromptRow {
    id: String,
    name: String,
    version: i64,
    template: String,
    is_active: bool,
    prompt_type: String,
    response_schema: Option<String>,
    mime_type: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PromptRow> for Prompt {
    type Error = Error;

    fn try_from(row: PromptRow) -> Result<Self> {
        Ok(Prompt {
            id: parse_uuid(&row.id, "prompt")?,
            name: row.name,
            version: row.version as u32,
            template: row.template,
            is_active: row.is_active,
            prompt_type: PromptType::parse(&row.prompt_type).ok_or_else(|| {
                Error::InvalidConfig(format!("invalid prompt type: {}", row.prompt_type))
            })?,
            response_schema: row
                .response_schema
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            mime_type: row.mime_type,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ViolationRow {
    id: String,
    model: String,
    kind: String,
    retry_delay_secs: Option<i64>,
    raw_payload: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ViolationRow> for QuotaViolationRecord {
    type Error = Error;

    fn try_from(row: ViolationRow) -> Result<Self> {
        Ok(QuotaViolationRecord {
            id: parse_uuid(&row.id, "violation")?,
            model: row.model,
            kind: row.kind,
            retry_delay_secs: row.retry_delay_secs.map(|v| v as u64),
            raw_payload: row.raw_payload,
            created_at: row.created_at,
        })
    }
}

// ============================================================================
// PipelineStore implementation
// ============================================================================

#[async_trait]
impl PipelineStore for SqliteStore {
    async fn create_channel(&self, channel: &Channel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO channels (
                id, source_type, external_id, display_name, cron_pattern,
                fetch_last_n, author_context, upload_collection_id, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(channel.id.to_string())
        .bind(channel.source_type.as_str())
        .bind(&channel.external_id)
        .bind(&channel.display_name)
        .bind(&channel.cron_pattern)
        .bind(i64::from(channel.fetch_last_n))
        .bind(&channel.author_context)
        .bind(&channel.upload_collection_id)
        .bind(channel.created_at)
        .bind(channel.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_channel(&self, id: Uuid) -> Result<Channel> {
        let row: ChannelRow = sqlx::query_as("SELECT * FROM channels WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("channel {id}")))?;
        row.try_into()
    }

    async fn list_channels(&self) -> Result<Vec<Channel>> {
        let rows: Vec<ChannelRow> =
            sqlx::query_as("SELECT * FROM channels ORDER BY created_at ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_channel(&self, channel: &Channel) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE channels SET
                source_type = ?, external_id = ?, display_name = ?, cron_pattern = ?,
                fetch_last_n = ?, author_context = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(channel.source_type.as_str())
        .bind(&channel.external_id)
        .bind(&channel.display_name)
        .bind(&channel.cron_pattern)
        .bind(i64::from(channel.fetch_last_n))
        .bind(&channel.author_context)
        .bind(Utc::now())
        .bind(channel.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("channel {}", channel.id)));
        }
        Ok(())
    }

    async fn delete_channel(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM channels WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("channel {id}")));
        }
        Ok(())
    }

    async fn set_channel_upload_collection(&self, id: Uuid, collection_id: &str) -> Result<()> {
        sqlx::query("UPDATE channels SET upload_collection_id = ?, updated_at = ? WHERE id = ?")
            .bind(collection_id)
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_content(&self, content: &Content) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO contents (
                id, channel_id, external_video_id, title, description, published_at,
                duration_sec, view_count, thumbnail_url, canonical_url,
                expected_segment_count, state, combined_analysis, models_used,
                prompt_version, combined_at, last_error, statistics, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (external_video_id) DO NOTHING
            "#,
        )
        .bind(content.id.to_string())
        .bind(content.channel_id.to_string())
        .bind(&content.external_video_id)
        .bind(&content.title)
        .bind(&content.description)
        .bind(content.published_at)
        .bind(content.duration_sec.map(i64::from))
        .bind(content.view_count.map(|v| v as i64))
        .bind(&content.thumbnail_url)
        .bind(&content.canonical_url)
        .bind(content.expected_segment_count.map(i64::from))
        .bind(content.state.as_str())
        .bind(
            content
                .combined_analysis
                .as_ref()
                .map(serde_json::Value::to_string),
        )
        .bind(serde_json::to_string(&content.models_used)?)
        .bind(content.prompt_version.map(i64::from))
        .bind(content.combined_at)
        .bind(&content.last_error)
        .bind(serde_json::to_string(&content.statistics)?)
        .bind(content.created_at)
        .bind(content.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_content(&self, id: Uuid) -> Result<Content> {
        let row: ContentRow = sqlx::query_as("SELECT * FROM contents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("content {id}")))?;
        row.try_into()
    }

    async fn find_content_by_external_id(
        &self,
        external_video_id: &str,
    ) -> Result<Option<Content>> {
        let row: Option<ContentRow> =
            sqlx::query_as("SELECT * FROM contents WHERE external_video_id = ?")
                .bind(external_video_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_contents_by_channel(&self, channel_id: Uuid) -> Result<Vec<Content>> {
        let rows: Vec<ContentRow> = sqlx::query_as(
            "SELECT * FROM contents WHERE channel_id = ? ORDER BY published_at DESC",
        )
        .bind(channel_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn apply_metadata(&self, id: Uuid, patch: &MetadataPatch) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE contents SET
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                published_at = COALESCE(?, published_at),
                duration_sec = COALESCE(?, duration_sec),
                view_count = COALESCE(?, view_count),
                thumbnail_url = COALESCE(?, thumbnail_url),
                canonical_url = COALESCE(?, canonical_url),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&patch.title)
        .bind(&patch.description)
        .bind(patch.published_at)
        .bind(patch.duration_sec.map(i64::from))
        .bind(patch.view_count.map(|v| v as i64))
        .bind(&patch.thumbnail_url)
        .bind(&patch.canonical_url)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("content {id}")));
        }
        Ok(())
    }

    async fn set_content_state(
        &self,
        id: Uuid,
        state: ContentState,
        last_error: Option<&str>,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE contents SET state = ?, last_error = ?, updated_at = ? WHERE id = ?")
                .bind(state.as_str())
                .bind(last_error)
                .bind(Utc::now())
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("content {id}")));
        }
        Ok(())
    }

    async fn transition_content_state(
        &self,
        id: Uuid,
        from: &[ContentState],
        to: ContentState,
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            "UPDATE contents SET state = ?, updated_at = ? WHERE id = ? AND state IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(Utc::now())
            .bind(id.to_string());
        for state in from {
            query = query.bind(state.as_str());
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_combined_analysis(
        &self,
        id: Uuid,
        artifact: &serde_json::Value,
        models_used: &[String],
        prompt_version: Option<u32>,
        combined_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE contents SET
                combined_analysis = ?, models_used = ?, prompt_version = ?,
                combined_at = ?, state = ?, last_error = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(artifact.to_string())
        .bind(serde_json::to_string(models_used)?)
        .bind(prompt_version.map(i64::from))
        .bind(combined_at)
        .bind(ContentState::Analyzed.as_str())
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("content {id}")));
        }
        Ok(())
    }

    async fn append_statistic(&self, id: Uuid, point: &StatPoint) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let current: Option<(String,)> =
            sqlx::query_as("SELECT statistics FROM contents WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
        let Some((statistics,)) = current else {
            return Err(Error::NotFound(format!("content {id}")));
        };

        let mut series: Vec<StatPoint> = serde_json::from_str(&statistics)?;
        series.push(point.clone());

        sqlx::query(
            "UPDATE contents SET statistics = ?, view_count = ?, updated_at = ? WHERE id = ?",
        )
        .bind(serde_json::to_string(&series)?)
        .bind(point.view_count as i64)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn commit_segment_plan(
        &self,
        content_id: Uuid,
        segments: &[Segment],
        state: ContentState,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for segment in segments {
            sqlx::query(
                r#"
                INSERT INTO segments (
                    id, content_id, idx, start_sec, end_sec, state, analysis,
                    model_used, processing_ms, error, retry_count, prompt_version,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, NULL, NULL, NULL, NULL, 0, NULL, ?, ?)
                ON CONFLICT (content_id, idx) DO NOTHING
                "#,
            )
            .bind(segment.id.to_string())
            .bind(content_id.to_string())
            .bind(i64::from(segment.index))
            .bind(i64::from(segment.start_sec))
            .bind(i64::from(segment.end_sec))
            .bind(segment.state.as_str())
            .bind(segment.created_at)
            .bind(segment.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        let result = sqlx::query(
            "UPDATE contents SET expected_segment_count = ?, state = ?, updated_at = ? WHERE id = ?",
        )
        .bind(segments.len() as i64)
        .bind(state.as_str())
        .bind(Utc::now())
        .bind(content_id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("content {content_id}")));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_segment(&self, content_id: Uuid, index: u32) -> Result<Segment> {
        let row: SegmentRow =
            sqlx::query_as("SELECT * FROM segments WHERE content_id = ? AND idx = ?")
                .bind(content_id.to_string())
                .bind(i64::from(index))
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| Error::NotFound(format!("segment {content_id}/{index}")))?;
        row.try_into()
    }

    async fn list_segments(
        &self,
        content_id: Uuid,
        state: Option<SegmentState>,
    ) -> Result<Vec<Segment>> {
        let rows: Vec<SegmentRow> = match state {
            Some(state) => {
                sqlx::query_as(
                    "SELECT * FROM segments WHERE content_id = ? AND state = ? ORDER BY idx ASC",
                )
                .bind(content_id.to_string())
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM segments WHERE content_id = ? ORDER BY idx ASC")
                    .bind(content_id.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_segments_by_state(
        &self,
        content_id: Uuid,
        states: &[SegmentState],
    ) -> Result<u32> {
        if states.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; states.len()].join(", ");
        let sql = format!(
            "SELECT COUNT(*) FROM segments WHERE content_id = ? AND state IN ({placeholders})"
        );
        let mut query = sqlx::query_as::<_, (i64,)>(&sql).bind(content_id.to_string());
        for state in states {
            query = query.bind(state.as_str());
        }
        let (count,) = query.fetch_one(&self.pool).await?;
        Ok(count as u32)
    }

    async fn set_segment_state(
        &self,
        content_id: Uuid,
        index: u32,
        state: SegmentState,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE segments SET state = ?, updated_at = ? WHERE content_id = ? AND idx = ?",
        )
        .bind(state.as_str())
        .bind(Utc::now())
        .bind(content_id.to_string())
        .bind(i64::from(index))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("segment {content_id}/{index}")));
        }
        Ok(())
    }

    async fn mark_segment_analyzed(
        &self,
        content_id: Uuid,
        index: u32,
        analysis: &serde_json::Value,
        model_used: &str,
        processing_ms: u64,
        prompt_version: Option<u32>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE segments SET
                state = ?, analysis = ?, model_used = ?, processing_ms = ?,
                prompt_version = ?, error = NULL, updated_at = ?
            WHERE content_id = ? AND idx = ?
            "#,
        )
        .bind(SegmentState::Analyzed.as_str())
        .bind(analysis.to_string())
        .bind(model_used)
        .bind(processing_ms as i64)
        .bind(prompt_version.map(i64::from))
        .bind(Utc::now())
        .bind(content_id.to_string())
        .bind(i64::from(index))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("segment {content_id}/{index}")));
        }
        Ok(())
    }

    async fn mark_segment_failed(
        &self,
        content_id: Uuid,
        index: u32,
        state: SegmentState,
        error: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE segments SET state = ?, error = ?, updated_at = ? WHERE content_id = ? AND idx = ?",
        )
        .bind(state.as_str())
        .bind(error)
        .bind(Utc::now())
        .bind(content_id.to_string())
        .bind(i64::from(index))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("segment {content_id}/{index}")));
        }
        Ok(())
    }

    async fn bump_segment_retry(&self, content_id: Uuid, index: u32) -> Result<u32> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE segments SET retry_count = retry_count + 1, updated_at = ? WHERE content_id = ? AND idx = ?",
        )
        .bind(Utc::now())
        .bind(content_id.to_string())
        .bind(i64::from(index))
        .execute(&mut *tx)
        .await?;

        let row: Option<(i64,)> =
            sqlx::query_as("SELECT retry_count FROM segments WHERE content_id = ? AND idx = ?")
                .bind(content_id.to_string())
                .bind(i64::from(index))
                .fetch_optional(&mut *tx)
                .await?;
        tx.commit().await?;

        let (count,) =
            row.ok_or_else(|| Error::NotFound(format!("segment {content_id}/{index}")))?;
        Ok(count as u32)
    }

    async fn reset_failed_segments(&self, content_id: Uuid) -> Result<Vec<u32>> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT idx FROM segments WHERE content_id = ? AND state IN ('FAILED', 'OVERLOADED') ORDER BY idx ASC",
        )
        .bind(content_id.to_string())
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE segments SET
                state = 'PENDING', error = NULL, retry_count = 0, updated_at = ?
            WHERE content_id = ? AND state IN ('FAILED', 'OVERLOADED')
            "#,
        )
        .bind(Utc::now())
        .bind(content_id.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(rows.into_iter().map(|(idx,)| idx as u32).collect())
    }

    async fn upsert_prompt(&self, prompt: &Prompt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO prompts (
                id, name, version, template, is_active, prompt_type,
                response_schema, mime_type, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (name, version) DO UPDATE SET
                template = excluded.template,
                is_active = excluded.is_active,
                prompt_type = excluded.prompt_type,
                response_schema = excluded.response_schema,
                mime_type = excluded.mime_type
            "#,
        )
        .bind(prompt.id.to_string())
        .bind(&prompt.name)
        .bind(i64::from(prompt.version))
        .bind(&prompt.template)
        .bind(prompt.is_active)
        .bind(prompt.prompt_type.as_str())
        .bind(
            prompt
                .response_schema
                .as_ref()
                .map(serde_json::Value::to_string),
        )
        .bind(&prompt.mime_type)
        .bind(prompt.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_active_prompt(&self, prompt_type: PromptType) -> Result<Option<Prompt>> {
        let row: Option<PromptRow> = sqlx::query_as(
            "SELECT * FROM prompts WHERE prompt_type = ? AND is_active = TRUE ORDER BY version DESC LIMIT 1",
        )
        .bind(prompt_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn record_quota_violation(&self, violation: &QuotaViolationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO quota_violations (
                id, model, kind, retry_delay_secs, raw_payload, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(violation.id.to_string())
        .bind(&violation.model)
        .bind(&violation.kind)
        .bind(violation.retry_delay_secs.map(|v| v as i64))
        .bind(&violation.raw_payload)
        .bind(violation.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_quota_violations(&self, limit: u32) -> Result<Vec<QuotaViolationRecord>> {
        let rows: Vec<ViolationRow> =
            sqlx::query_as("SELECT * FROM quota_violations ORDER BY created_at DESC LIMIT ?")
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn prune_quota_violations(&self, now: DateTime<Utc>) -> Result<u64> {
        let age_cutoff = now - Duration::days(7);
        let rpd_cutoff = now - Duration::hours(24);
        let result = sqlx::query(
            "DELETE FROM quota_violations WHERE created_at < ? OR (kind = 'RPD' AND created_at < ?)",
        )
        .bind(age_cutoff)
        .bind(rpd_cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
