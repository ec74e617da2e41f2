//! Control API server
//!
//! Thin axum surface over the core services: trigger discovery and
//! analysis, inspect quota, drive combinations, reset segments.

use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use kinoscope_core::StageServices;

use crate::api;

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    /// Core service bundle
    pub services: Arc<StageServices>,
}

/// Serve the control API until `shutdown` fires.
pub async fn serve(
    services: Arc<StageServices>,
    bind_addr: String,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let state = AppState { services };
    let app = Router::new()
        .merge(api::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "control API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
