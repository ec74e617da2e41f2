//! Kinoscope - video ingestion and AI analysis pipeline
//!
//! Binary entry point: loads configuration, opens the state and queue
//! stores, wires the pipeline runtime, and serves the control API.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kinoscope_core::{PipelineConfig, PipelineRuntime, QueueStore, SqliteStore, StageServices};
use kinoscope_llm::{GeminiClient, GeminiConfig};
use kinoscope_source::{YouTubeClient, YouTubeConfig};

mod api;
mod server;

/// How long shutdown waits for the control API to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kinoscope=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("KINOSCOPE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("kinoscope.toml"));
    let config = PipelineConfig::load(Some(config_path.as_path()))?;
    info!(
        tier = ?config.tier,
        database = %config.database_path,
        bind = %config.bind_addr,
        "configuration loaded"
    );

    let store = Arc::new(SqliteStore::from_path(Path::new(&config.database_path)).await?);
    let queue_path = format!("{}.queue", config.database_path);
    let queue = Arc::new(QueueStore::from_path(Path::new(&queue_path)).await?);

    let youtube_key = std::env::var("YOUTUBE_API_KEY")
        .context("YOUTUBE_API_KEY is required for source discovery")?;
    let gemini_key = std::env::var("GOOGLE_API_KEY")
        .or_else(|_| std::env::var("GEMINI_API_KEY"))
        .context("GOOGLE_API_KEY or GEMINI_API_KEY is required for analysis")?;

    let source = Arc::new(YouTubeClient::new(YouTubeConfig::new(youtube_key))?);
    let provider = Arc::new(GeminiClient::new(GeminiConfig::new(gemini_key))?);

    let services = StageServices::new(config.clone(), store, queue, source, provider);
    let runtime = PipelineRuntime::new(Arc::clone(&services));
    services.reconcile_all().await?;

    let shutdown = CancellationToken::new();

    // Ctrl-C fans out to every worker and the HTTP server.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let server = server::serve(
        Arc::clone(&services),
        config.bind_addr.clone(),
        shutdown.clone(),
    );

    // The runtime bounds its own worker drain; the server gets the same
    // grace period after the shutdown signal.
    tokio::join!(runtime.run(shutdown.clone()), async {
        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    warn!(error = %e, "control API exited with error");
                }
            }
            () = async {
                shutdown.cancelled().await;
                tokio::time::sleep(SHUTDOWN_GRACE).await;
            } => {
                warn!(
                    grace_secs = SHUTDOWN_GRACE.as_secs(),
                    "control API did not stop within the grace period"
                );
            }
        }
    });

    info!("kinoscope stopped");
    Ok(())
}
