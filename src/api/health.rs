//! Health endpoint

use axum::response::Json;
use serde_json::json;

use super::ApiResult;

/// GET /health — liveness probe.
pub async fn get_health() -> ApiResult {
    Ok(Json(json!({
        "success": true,
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}
