//! Pipeline configuration
//!
//! Loaded from `kinoscope.toml` with `KINOSCOPE_*` environment overrides;
//! every field carries a serde default so a missing file still yields a
//! usable configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use kinoscope_llm::{QuotaTier, TokenEstimateMode};

use crate::error::{Error, Result};

/// Process-wide pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Billing tier selecting the quota table
    #[serde(default)]
    pub tier: QuotaTier,
    /// Maximum segment length in seconds
    #[serde(default = "default_max_segment_sec")]
    pub max_segment_sec: u32,
    /// Overlap between consecutive segments in seconds
    #[serde(default = "default_segment_overlap_sec")]
    pub segment_overlap_sec: u32,
    /// Delivery attempts for segment analysis jobs
    #[serde(default = "default_max_attempts_analysis")]
    pub max_attempts_analysis: u32,
    /// Delivery attempts for combination jobs
    #[serde(default = "default_max_attempts_combination")]
    pub max_attempts_combination: u32,
    /// Base delay for exponential retry backoff
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Overload cool-down applied after 503-class responses
    #[serde(default = "default_overload_cooldown_sec")]
    pub overload_cooldown_sec: u64,
    /// Byte cap on a streamed provider response
    #[serde(default = "default_stream_buffer_cap")]
    pub stream_buffer_cap: usize,
    /// Video token estimation mode
    #[serde(default)]
    pub token_estimate_mode: TokenEstimateMode,
    /// Per-job handler deadline in seconds
    #[serde(default = "default_stage_deadline_secs")]
    pub stage_deadline_secs: u64,
    /// Queue poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// SQLite database path
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Control API bind address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_max_segment_sec() -> u32 {
    900
}

fn default_segment_overlap_sec() -> u32 {
    30
}

fn default_max_attempts_analysis() -> u32 {
    4
}

fn default_max_attempts_combination() -> u32 {
    5
}

fn default_base_backoff_ms() -> u64 {
    30_000
}

fn default_overload_cooldown_sec() -> u64 {
    300
}

fn default_stream_buffer_cap() -> usize {
    50_000
}

fn default_stage_deadline_secs() -> u64 {
    600
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_database_path() -> String {
    "kinoscope.db".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        // An empty document exercises every serde default.
        serde_json::from_value(serde_json::json!({})).expect("defaults are total")
    }
}

impl PipelineConfig {
    /// Load configuration from an optional TOML file plus `KINOSCOPE_*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("KINOSCOPE"));

        builder
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Overload cool-down as a [`Duration`].
    #[must_use]
    pub fn overload_cooldown(&self) -> Duration {
        Duration::from_secs(self.overload_cooldown_sec)
    }

    /// Per-job handler deadline as a [`Duration`].
    #[must_use]
    pub fn stage_deadline(&self) -> Duration {
        Duration::from_secs(self.stage_deadline_secs)
    }

    /// Queue poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
