//! Error types for kinoscope-llm

use thiserror::Error;

/// Structured payload of a provider API error response.
///
/// Keeps the raw `details` array so quota classification can inspect
/// `QuotaFailure` / `RetryInfo` entries without re-fetching the body.
#[derive(Debug, Clone)]
pub struct ApiErrorPayload {
    /// HTTP status code
    pub status: u16,
    /// Provider status string (e.g. `RESOURCE_EXHAUSTED`)
    pub status_text: String,
    /// Human-readable message
    pub message: String,
    /// Structured error details, verbatim
    pub details: Vec<serde_json::Value>,
}

impl ApiErrorPayload {
    /// Build a payload carrying only a status code and message.
    #[must_use]
    pub fn bare(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            status_text: String::new(),
            message: message.into(),
            details: Vec::new(),
        }
    }
}

/// LLM error type
#[derive(Debug, Error)]
pub enum Error {
    /// Provider returned a non-success HTTP response
    #[error("api error {}: {}", .0.status, .0.message)]
    Api(ApiErrorPayload),

    /// Network error
    #[error("network error: {0}")]
    Network(String),

    /// Invalid or unparseable response
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Streamed response exceeded the buffer cap and was truncated
    #[error("response truncated at {cap} bytes")]
    ResponseTruncated {
        /// Configured buffer cap in bytes
        cap: usize,
    },

    /// No model can currently accept the request
    #[error("no eligible model: {0}")]
    NoEligibleModel(String),

    /// Operation cancelled
    #[error("cancelled")]
    Cancelled,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
