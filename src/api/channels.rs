//! Channel endpoints

use axum::extract::{Path, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use kinoscope_core::{Channel, SourceType};

use super::{ApiError, ApiResult};
use crate::server::AppState;

/// Body for POST /api/channels
#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    source_type: SourceType,
    external_id: String,
    display_name: String,
    cron_pattern: Option<String>,
    fetch_last_n: Option<u32>,
    author_context: Option<String>,
}

/// POST /api/channels — register a channel, schedule its discovery, and
/// kick off an initial backfill.
pub async fn create_channel(
    State(state): State<AppState>,
    Json(body): Json<CreateChannelRequest>,
) -> ApiResult {
    let mut channel = Channel::new(body.source_type, body.external_id, body.display_name);
    if let Some(cron) = body.cron_pattern {
        channel.cron_pattern = cron;
    }
    if let Some(n) = body.fetch_last_n {
        channel.fetch_last_n = n;
    }
    channel.author_context = body.author_context;

    state.services.store.create_channel(&channel).await?;
    state.services.reconcile_channel(&channel).await?;
    state.services.enqueue_discovery(channel.id, true).await?;

    Ok(Json(json!({"success": true, "channel": channel})))
}

/// DELETE /api/channels/{id} — remove the channel, its contents, and its
/// recurring jobs.
pub async fn delete_channel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult {
    state.services.store.delete_channel(id).await?;
    state.services.remove_channel_jobs(id).await?;
    Ok(Json(json!({"success": true})))
}

/// POST /api/channels/{id}/discover — run discovery now.
pub async fn trigger_discovery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult {
    // Confirm the channel exists before enqueueing.
    state
        .services
        .store
        .get_channel(id)
        .await
        .map_err(|_| ApiError::not_found(format!("channel {id}")))?;

    state.services.enqueue_discovery(id, false).await?;
    Ok(Json(json!({"success": true, "queued": true})))
}
