//! Error types for kinoscope-core

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Referenced entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Queue bookkeeping failure
    #[error("queue error: {0}")]
    Queue(String),

    /// Source provider failure
    #[error("source error: {0}")]
    Source(#[from] kinoscope_source::Error),

    /// AI provider failure
    #[error("llm error: {0}")]
    Llm(#[from] kinoscope_llm::Error),
}
