//! AI provider abstraction
//!
//! The pipeline talks to generative models through [`AiProvider`]:
//! structured-output generation delivered as a bounded stream of chunks.
//! [`MockAiProvider`] scripts responses for stage and pipeline tests.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{Error, Result};

// ============================================================================
// Request / response types
// ============================================================================

/// One part of a generation prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptPart {
    /// Plain instruction text
    Text {
        /// The text content
        text: String,
    },
    /// Reference to a hosted video, clipped to a segment
    VideoRef {
        /// Canonical video URL
        url: String,
        /// Clip start in seconds
        start_sec: u32,
        /// Clip end in seconds
        end_sec: u32,
    },
}

/// A structured-output generation request
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Target model identifier
    pub model: String,
    /// Ordered prompt parts
    pub parts: Vec<PromptPart>,
    /// Declared JSON response schema, if any
    pub response_schema: Option<serde_json::Value>,
    /// Output token bound
    pub max_output_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt-side tokens
    pub prompt_tokens: u64,
    /// Generated tokens
    pub output_tokens: u64,
    /// Total billed tokens
    pub total_tokens: u64,
}

/// One streamed response chunk
#[derive(Debug, Clone, Default)]
pub struct GenerationChunk {
    /// Text delta
    pub text: String,
    /// Usage metadata; usually present only on the final chunk
    pub usage: Option<TokenUsage>,
}

/// Stream of generation chunks
pub type ChunkStream = BoxStream<'static, Result<GenerationChunk>>;

// ============================================================================
// Provider trait
// ============================================================================

/// A generative model provider
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Start a structured-output generation, returning the chunk stream.
    async fn generate_structured(&self, request: GenerationRequest) -> Result<ChunkStream>;
}

/// Drain a chunk stream into a single buffer, enforcing `cap` bytes.
///
/// Text past the cap is dropped and the drain finishes with
/// [`Error::ResponseTruncated`] so callers treat the oversized output as a
/// validation failure rather than storing a clipped artifact.
pub async fn collect_structured(
    mut stream: ChunkStream,
    cap: usize,
) -> Result<(String, Option<TokenUsage>)> {
    let mut buffer = String::new();
    let mut usage = None;
    let mut truncated = false;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if let Some(u) = chunk.usage {
            usage = Some(u);
        }
        if truncated {
            continue;
        }
        let remaining = cap.saturating_sub(buffer.len());
        if chunk.text.len() > remaining {
            truncated = true;
            continue;
        }
        buffer.push_str(&chunk.text);
    }

    if truncated {
        return Err(Error::ResponseTruncated { cap });
    }
    Ok((buffer, usage))
}

// ============================================================================
// Mock provider
// ============================================================================

/// Scripted outcome for one mock call
pub enum MockOutcome {
    /// Stream the given text and usage successfully
    Ok {
        /// Full response text, delivered as one chunk
        text: String,
        /// Reported usage
        usage: TokenUsage,
    },
    /// Fail the call with the given error
    Err(Error),
}

/// In-memory provider returning scripted outcomes in order.
///
/// Once the script is exhausted every call answers with a minimal valid
/// JSON object so unscripted calls don't fail tests that only care about
/// earlier interactions.
pub struct MockAiProvider {
    script: Mutex<VecDeque<MockOutcome>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl MockAiProvider {
    /// Create an empty-scripted mock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response.
    pub fn push_ok(&self, text: impl Into<String>, total_tokens: u64) {
        self.script
            .lock()
            .expect("script lock poisoned")
            .push_back(MockOutcome::Ok {
                text: text.into(),
                usage: TokenUsage {
                    prompt_tokens: 0,
                    output_tokens: total_tokens,
                    total_tokens,
                },
            });
    }

    /// Queue a failure.
    pub fn push_err(&self, err: Error) {
        self.script
            .lock()
            .expect("script lock poisoned")
            .push_back(MockOutcome::Err(err));
    }

    /// Requests observed so far, in call order.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    /// Number of calls made.
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock poisoned").len()
    }
}

impl Default for MockAiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AiProvider for MockAiProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate_structured(&self, request: GenerationRequest) -> Result<ChunkStream> {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push(request);

        let outcome = self
            .script
            .lock()
            .expect("script lock poisoned")
            .pop_front();

        match outcome {
            Some(MockOutcome::Ok { text, usage }) => {
                let chunk = GenerationChunk {
                    text,
                    usage: Some(usage),
                };
                Ok(futures::stream::iter(vec![Ok(chunk)]).boxed())
            }
            Some(MockOutcome::Err(err)) => Err(err),
            None => {
                let chunk = GenerationChunk {
                    text: "{\"summary\":\"\",\"topics\":[]}".to_string(),
                    usage: Some(TokenUsage::default()),
                };
                Ok(futures::stream::iter(vec![Ok(chunk)]).boxed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_replays_script_in_order() {
        let mock = MockAiProvider::new();
        mock.push_ok("{\"a\":1}", 100);
        mock.push_err(Error::Network("down".to_string()));

        let request = GenerationRequest {
            model: "m".to_string(),
            parts: vec![PromptPart::Text {
                text: "hi".to_string(),
            }],
            response_schema: None,
            max_output_tokens: None,
            temperature: None,
        };

        let stream = mock.generate_structured(request.clone()).await.unwrap();
        let (text, usage) = collect_structured(stream, 1024).await.unwrap();
        assert_eq!(text, "{\"a\":1}");
        assert_eq!(usage.unwrap().total_tokens, 100);

        let err = match mock.generate_structured(request).await {
            Err(e) => e,
            Ok(_) => panic!("expected generate_structured to return an error"),
        };
        assert!(matches!(err, Error::Network(_)));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_collect_structured_enforces_cap() {
        let chunks = vec![
            Ok(GenerationChunk {
                text: "x".repeat(40),
                usage: None,
            }),
            Ok(GenerationChunk {
                text: "y".repeat(40),
                usage: Some(TokenUsage {
                    prompt_tokens: 1,
                    output_tokens: 2,
                    total_tokens: 3,
                }),
            }),
        ];
        let stream: ChunkStream = futures::stream::iter(chunks).boxed();

        let err = collect_structured(stream, 64).await.unwrap_err();
        assert!(matches!(err, Error::ResponseTruncated { cap: 64 }));
    }

    #[tokio::test]
    async fn test_collect_structured_propagates_stream_errors() {
        let chunks: Vec<Result<GenerationChunk>> =
            vec![Err(Error::Network("reset".to_string()))];
        let stream: ChunkStream = futures::stream::iter(chunks).boxed();

        let err = collect_structured(stream, 64).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }
}
