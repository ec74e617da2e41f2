//! Error types for kinoscope-source

use thiserror::Error;

/// Source provider error type
#[derive(Debug, Error)]
pub enum Error {
    /// Provider returned a non-success HTTP response
    #[error("api error {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response message
        message: String,
    },

    /// Network error
    #[error("network error: {0}")]
    Network(String),

    /// Response body did not match the expected shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Requested entity does not exist upstream
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed duration or timestamp value
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
}

impl Error {
    /// Whether a retry may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
