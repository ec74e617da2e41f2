//! Gemini - Google Gemini API provider
//!
//! Implements [`AiProvider`] over the `streamGenerateContent` endpoint using
//! reqwest with SSE framing. Video segments are passed as file references
//! with clip offsets; structured output is requested through a declared
//! response schema.

use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{ApiErrorPayload, Error, Result};
use crate::provider::{AiProvider, ChunkStream, GenerationChunk, GenerationRequest, PromptPart, TokenUsage};

/// Default API base URL
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Fields not supported by Gemini's OpenAPI Schema subset.
/// Sending them causes INVALID_ARGUMENT 400 errors.
const UNSUPPORTED_SCHEMA_FIELDS: &[&str] = &["default", "additionalProperties", "$schema"];

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text {
        text: String,
    },
    File {
        #[serde(rename = "fileData")]
        file_data: FileData,
        #[serde(rename = "videoMetadata", skip_serializing_if = "Option::is_none")]
        video_metadata: Option<VideoMetadata>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    file_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoMetadata {
    start_offset: String,
    end_offset: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    response_mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: Option<u64>,
    #[serde(default)]
    total_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    /// Detail entries (may contain QuotaFailure / RetryInfo for 429 responses)
    #[serde(default)]
    details: Vec<serde_json::Value>,
}

// ============================================================================
// Configuration
// ============================================================================

/// Gemini client configuration
#[derive(Clone)]
pub struct GeminiConfig {
    /// API key, appended as `?key=` in the URL
    pub api_key: String,
    /// API base URL
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl GeminiConfig {
    /// Create a configuration with the default endpoint.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

// Custom Debug implementation to mask the credential.
impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &mask_key(&self.api_key))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn mask_key(key: &str) -> String {
    if key.len() <= 8 {
        "***".to_string()
    } else {
        format!("{}***{}", &key[..4], &key[key.len() - 2..])
    }
}

/// Recursively strip JSON Schema fields Gemini rejects.
fn strip_unsupported_schema_fields(value: &mut serde_json::Value) {
    if let Some(obj) = value.as_object_mut() {
        for field in UNSUPPORTED_SCHEMA_FIELDS {
            obj.remove(*field);
        }
        for (_, v) in obj.iter_mut() {
            strip_unsupported_schema_fields(v);
        }
    } else if let Some(arr) = value.as_array_mut() {
        for v in arr.iter_mut() {
            strip_unsupported_schema_fields(v);
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Gemini API client
pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    /// Create a client from configuration.
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn convert_parts(parts: &[PromptPart]) -> Vec<RequestPart> {
        parts
            .iter()
            .map(|part| match part {
                PromptPart::Text { text } => RequestPart::Text { text: text.clone() },
                PromptPart::VideoRef {
                    url,
                    start_sec,
                    end_sec,
                } => RequestPart::File {
                    file_data: FileData {
                        file_uri: url.clone(),
                    },
                    video_metadata: Some(VideoMetadata {
                        start_offset: format!("{start_sec}s"),
                        end_offset: format!("{end_sec}s"),
                    }),
                },
            })
            .collect()
    }

    async fn error_from_response(status: reqwest::StatusCode, body: String) -> Error {
        if let Ok(parsed) = serde_json::from_str::<GeminiError>(&body) {
            return Error::Api(ApiErrorPayload {
                status: status.as_u16(),
                status_text: parsed.error.status,
                message: parsed.error.message,
                details: parsed.error.details,
            });
        }
        Error::Api(ApiErrorPayload::bare(
            status.as_u16(),
            format!("HTTP {status}: {body}"),
        ))
    }
}

#[async_trait::async_trait]
impl AiProvider for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate_structured(&self, request: GenerationRequest) -> Result<ChunkStream> {
        let mut response_schema = request.response_schema.clone();
        if let Some(schema) = response_schema.as_mut() {
            strip_unsupported_schema_fields(schema);
        }

        let gemini_request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: Self::convert_parts(&request.parts),
            }],
            generation_config: Some(GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
                response_mime_type: "application/json".to_string(),
                response_schema,
            }),
        };

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.config.base_url, request.model, self.config.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&gemini_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::error_from_response(status, body).await);
        }

        Ok(sse_chunk_stream(response.bytes_stream().boxed()))
    }
}

// ============================================================================
// SSE framing
// ============================================================================

type ByteStream = BoxStream<'static, reqwest::Result<bytes::Bytes>>;

/// Turn an SSE byte stream into a stream of [`GenerationChunk`]s.
///
/// Each `data:` line carries one `GenerateContentResponse` JSON document.
fn sse_chunk_stream(bytes: ByteStream) -> ChunkStream {
    futures::stream::try_unfold(
        (bytes, String::new(), false),
        |(mut bytes, mut buf, mut done)| async move {
            loop {
                if let Some(pos) = buf.find('\n') {
                    let line: String = buf.drain(..=pos).collect();
                    if let Some(chunk) = parse_sse_line(line.trim())? {
                        return Ok(Some((chunk, (bytes, buf, done))));
                    }
                    continue;
                }

                if done {
                    let line = std::mem::take(&mut buf);
                    if let Some(chunk) = parse_sse_line(line.trim())? {
                        return Ok(Some((chunk, (bytes, buf, done))));
                    }
                    return Ok(None);
                }

                match bytes.next().await {
                    Some(Ok(data)) => buf.push_str(&String::from_utf8_lossy(&data)),
                    Some(Err(e)) => return Err(Error::Network(e.to_string())),
                    None => done = true,
                }
            }
        },
    )
    .boxed()
}

fn parse_sse_line(line: &str) -> Result<Option<GenerationChunk>> {
    let Some(payload) = line.strip_prefix("data:").map(str::trim) else {
        return Ok(None);
    };
    if payload.is_empty() || payload == "[DONE]" {
        return Ok(None);
    }

    // Mid-stream errors arrive as a data line wrapping an error object.
    if let Ok(err) = serde_json::from_str::<GeminiError>(payload) {
        return Err(Error::Api(ApiErrorPayload {
            status: u16::try_from(err.error.code).unwrap_or(500),
            status_text: err.error.status,
            message: err.error.message,
            details: err.error.details,
        }));
    }

    let parsed: GeminiStreamResponse = serde_json::from_str(payload)
        .map_err(|e| Error::InvalidResponse(format!("{e}: {payload}")))?;

    let text = parsed
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<String>()
        })
        .unwrap_or_default();

    let usage = parsed.usage_metadata.map(|u| TokenUsage {
        prompt_tokens: u.prompt_token_count,
        output_tokens: u.candidates_token_count.unwrap_or(0),
        total_tokens: u.total_token_count,
    });

    Ok(Some(GenerationChunk { text, usage }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::collect_structured;

    #[test]
    fn test_parse_sse_data_line() {
        let line = r#"data: {"candidates":[{"content":{"parts":[{"text":"{\"summary\""}]}}],"usageMetadata":{"promptTokenCount":10,"candidatesTokenCount":5,"totalTokenCount":15}}"#;
        let chunk = parse_sse_line(line).unwrap().unwrap();
        assert_eq!(chunk.text, "{\"summary\"");
        assert_eq!(chunk.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_parse_sse_skips_blank_and_done() {
        assert!(parse_sse_line("").unwrap().is_none());
        assert!(parse_sse_line("data: [DONE]").unwrap().is_none());
        assert!(parse_sse_line(": keepalive").unwrap().is_none());
    }

    #[test]
    fn test_parse_sse_error_line() {
        let line = r#"data: {"error":{"code":429,"message":"quota","status":"RESOURCE_EXHAUSTED","details":[]}}"#;
        let err = parse_sse_line(line).unwrap_err();
        match err {
            Error::Api(payload) => {
                assert_eq!(payload.status, 429);
                assert_eq!(payload.status_text, "RESOURCE_EXHAUSTED");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sse_stream_reassembles_split_frames() {
        let frames: Vec<reqwest::Result<bytes::Bytes>> = vec![
            Ok(bytes::Bytes::from_static(b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"he")),
            Ok(bytes::Bytes::from_static(b"llo\"}]}}]}\n\ndata: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\" world\"}]}}]}\n")),
        ];
        let stream = sse_chunk_stream(futures::stream::iter(frames).boxed());

        let (text, _usage) = collect_structured(stream, 1024).await.unwrap();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn test_strip_unsupported_schema_fields() {
        let mut schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "summary": {"type": "string", "default": ""}
            }
        });
        strip_unsupported_schema_fields(&mut schema);
        assert!(schema.get("additionalProperties").is_none());
        assert!(schema["properties"]["summary"].get("default").is_none());
    }

    #[test]
    fn test_video_part_serialization() {
        let parts = GeminiClient::convert_parts(&[PromptPart::VideoRef {
            url: "https://youtu.be/abc".to_string(),
            start_sec: 870,
            end_sec: 1500,
        }]);
        let json = serde_json::to_value(&parts).unwrap();
        assert_eq!(json[0]["fileData"]["fileUri"], "https://youtu.be/abc");
        assert_eq!(json[0]["videoMetadata"]["startOffset"], "870s");
        assert_eq!(json[0]["videoMetadata"]["endOffset"], "1500s");
    }

    #[test]
    fn test_config_debug_masks_key() {
        let config = GeminiConfig::new("AIzaSyExampleExampleKey");
        let debug = format!("{config:?}");
        assert!(!debug.contains("ExampleExampleKey"));
        assert!(debug.contains("***"));
    }
}
