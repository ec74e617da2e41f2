//! Client-side token estimation
//!
//! Outbound requests are admitted against the quota ledger *before* the
//! provider reports actual usage, so estimates must be deterministic and
//! cheap. Text uses a characters-per-token approximation; video uses the
//! provider's published frame/audio sampling rates.

use serde::{Deserialize, Serialize};

/// Characters per token for plain text (empirical for Gemini-family models).
const TEXT_CHARS_PER_TOKEN: f64 = 3.5;

/// Safety margin applied to video estimates.
const VIDEO_MARGIN: f64 = 1.1;

/// Tokens per second of video at default (1 fps, full-resolution) sampling.
const VIDEO_TOKENS_PER_SEC: f64 = 300.0;

/// Video token estimation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEstimateMode {
    /// Full-resolution sampling: `ceil(duration * 300 * 1.1)`
    Default,
    /// Low-resolution media sampling: `ceil((duration * 0.5 * 66 + duration * 32) * 1.1)`
    /// (0.5 fps at 66 tokens/frame, plus 32 audio tokens/sec)
    Optimized,
}

impl Default for TokenEstimateMode {
    fn default() -> Self {
        Self::Optimized
    }
}

/// Estimate the token count of a text prompt: `ceil(len / 3.5)`.
#[must_use]
pub fn estimate_text_tokens(text: &str) -> u64 {
    (text.len() as f64 / TEXT_CHARS_PER_TOKEN).ceil() as u64
}

/// Estimate the token cost of a video segment of `duration_sec` seconds.
#[must_use]
pub fn estimate_video_tokens(duration_sec: f64, mode: TokenEstimateMode) -> u64 {
    let duration = duration_sec.max(0.0);
    let raw = match mode {
        TokenEstimateMode::Default => duration * VIDEO_TOKENS_PER_SEC * VIDEO_MARGIN,
        TokenEstimateMode::Optimized => {
            let frames = duration * 0.5 * 66.0;
            let audio = duration * 32.0;
            (frames + audio) * VIDEO_MARGIN
        }
    };
    raw.ceil() as u64
}
