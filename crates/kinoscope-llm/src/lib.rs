//! Kinoscope LLM - quota metering and AI provider access
//!
//! This crate provides everything the pipeline needs to call metered
//! generative models safely:
//! - Ledger: per-model sliding-window quota accounting (RPM/TPM/RPD)
//! - Selector: preference-ordered model selection over the ledger
//! - Classify: provider error classification into the pipeline taxonomy
//! - Tokens: deterministic client-side token estimation
//! - Provider: the `AiProvider` trait, Gemini client, and mock

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod classify;
pub mod error;
pub mod gemini;
pub mod ledger;
pub mod limits;
pub mod provider;
pub mod selector;
pub mod tokens;

pub use classify::{classify_provider_error, ProviderErrorKind, QuotaDimension};
pub use error::{ApiErrorPayload, Error, Result};
pub use gemini::{GeminiClient, GeminiConfig};
pub use ledger::{Admission, LimitDimension, QuotaLedger, QuotaViolation, UsageSnapshot};
pub use limits::{limits_for, ModelLimits, QuotaTier, MODEL_PREFERENCE};
pub use provider::{
    collect_structured, AiProvider, ChunkStream, GenerationChunk, GenerationRequest,
    MockAiProvider, PromptPart, TokenUsage,
};
pub use selector::{ModelSelector, NoModelReason};
pub use tokens::{estimate_text_tokens, estimate_video_tokens, TokenEstimateMode};
