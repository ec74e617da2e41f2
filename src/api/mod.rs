//! Control API routes
//!
//! All endpoints accept and return JSON `{success, ...}` envelopes.

mod channels;
mod contents;
mod health;
mod quota;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::json;

use crate::server::AppState;

/// Assemble every API route.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::get_health))
        .route("/api/quota", get(quota::get_quota))
        .route("/api/channels", post(channels::create_channel))
        .route("/api/channels/:id", delete(channels::delete_channel))
        .route("/api/channels/:id/discover", post(channels::trigger_discovery))
        .route("/api/contents/:id/analyze", post(contents::trigger_analysis))
        .route(
            "/api/contents/:id/combination",
            get(contents::combination_status).post(contents::trigger_combination),
        )
        .route("/api/contents/:id/reset", post(contents::reset_segments))
}

/// API error carrying an HTTP status
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<kinoscope_core::Error> for ApiError {
    fn from(err: kinoscope_core::Error) -> Self {
        let status = match &err {
            kinoscope_core::Error::NotFound(_) => StatusCode::NOT_FOUND,
            kinoscope_core::Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({"success": false, "error": self.message})),
        )
            .into_response()
    }
}

/// Result alias for handlers
pub type ApiResult = Result<Json<serde_json::Value>, ApiError>;
