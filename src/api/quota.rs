//! Quota status endpoint

use axum::extract::State;
use axum::response::Json;
use serde_json::json;

use super::ApiResult;
use crate::server::AppState;

/// GET /api/quota — per-model usage, overload marks, recent violations.
pub async fn get_quota(State(state): State<AppState>) -> ApiResult {
    let ledger = &state.services.ledger;

    let usage = ledger.all_usage();
    let overloaded: Vec<String> = kinoscope_llm::MODEL_PREFERENCE
        .iter()
        .filter(|m| ledger.is_overloaded(m))
        .map(|m| (*m).to_string())
        .collect();
    let violations = state.services.store.list_quota_violations(20).await?;

    Ok(Json(json!({
        "success": true,
        "tier": ledger.tier(),
        "usage": usage,
        "overloaded": overloaded,
        "violations": violations,
    })))
}
