//! Content endpoints

use axum::extract::{Path, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use kinoscope_core::ContentState;

use super::{ApiError, ApiResult};
use crate::server::AppState;

/// POST /api/contents/{id}/analyze — (re)run the analysis pipeline for a
/// video from its current state.
pub async fn trigger_analysis(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult {
    let content = state.services.store.get_content(id).await?;

    match content.state {
        ContentState::Discovered => state.services.enqueue_metadata(id).await?,
        _ => state.services.enqueue_planning(id).await?,
    }
    Ok(Json(json!({"success": true, "state": content.state})))
}

/// GET /api/contents/{id}/combination — fan-in readiness.
pub async fn combination_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult {
    let status = state.services.fanin.status(id).await?;
    Ok(Json(json!({"success": true, "status": status})))
}

/// Body for POST /api/contents/{id}/combination
#[derive(Debug, Default, Deserialize)]
pub struct TriggerCombinationRequest {
    #[serde(default)]
    allow_partial: bool,
    #[serde(default)]
    force_model: Option<String>,
}

/// POST /api/contents/{id}/combination — explicit combination trigger.
///
/// Partial combinations only run through this endpoint; the fan-in
/// controller never starts one on its own.
pub async fn trigger_combination(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<TriggerCombinationRequest>>,
) -> ApiResult {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let status = state.services.fanin.status(id).await?;
    if status.completed == 0 {
        return Err(ApiError::bad_request("no analyzed segments to combine"));
    }

    let result = state
        .services
        .fanin
        .trigger(id, body.allow_partial, body.force_model, true)
        .await?;
    Ok(Json(json!({
        "success": true,
        "job_id": result.id,
        "deduplicated": result.deduplicated,
        "status": status,
    })))
}

/// POST /api/contents/{id}/reset — return failed segments to PENDING and
/// re-enqueue their analysis.
pub async fn reset_segments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult {
    let reset = state.services.store.reset_failed_segments(id).await?;
    if !reset.is_empty() {
        state
            .services
            .store
            .set_content_state(id, ContentState::RetryPending, None)
            .await?;
        for index in &reset {
            state.services.enqueue_analysis(id, *index).await?;
        }
        state
            .services
            .store
            .set_content_state(id, ContentState::Processing, None)
            .await?;
    }
    Ok(Json(json!({"success": true, "reset_segments": reset})))
}
