//! Provider error classification
//!
//! Single entry point turning any provider error into a tagged kind the
//! pipeline can act on. Structured fields (status code, `QuotaFailure` /
//! `RetryInfo` detail payloads) are preferred; a small keyword set is the
//! documented fallback for providers that only return prose.

use serde::{Deserialize, Serialize};

use crate::error::{ApiErrorPayload, Error};

/// Quota dimension breached by a 429-class response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotaDimension {
    /// Requests per minute
    Rpm,
    /// Tokens per minute
    Tpm,
    /// Requests per day
    Rpd,
    /// Provider did not say
    Unknown,
}

impl QuotaDimension {
    /// Stable identifier used in persisted violation records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rpm => "RPM",
            Self::Tpm => "TPM",
            Self::Rpd => "RPD",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Classified provider error
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderErrorKind {
    /// 429-class quota rejection
    Quota {
        /// Which limit was breached
        dimension: QuotaDimension,
        /// Provider-suggested wait, if any
        retry_delay_secs: Option<u64>,
        /// Raw quota ids from `QuotaFailure` details
        quota_ids: Vec<String>,
    },
    /// 503-class overload; the model should be cooled down
    Overload,
    /// 400/404-class or malformed-output error; never retried
    Validation,
    /// Network or 5xx fault worth retrying
    Transient,
    /// Contract violation; terminal
    Fatal,
}

impl ProviderErrorKind {
    /// Whether the queue may redeliver the job after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation | Self::Fatal)
    }
}

/// Classify a provider error into the pipeline's taxonomy.
#[must_use]
pub fn classify_provider_error(err: &Error) -> ProviderErrorKind {
    match err {
        Error::Api(payload) => classify_api_payload(payload),
        Error::Network(_) | Error::Cancelled => ProviderErrorKind::Transient,
        Error::InvalidResponse(_) | Error::ResponseTruncated { .. } => {
            ProviderErrorKind::Validation
        }
        Error::NoEligibleModel(_) => ProviderErrorKind::Quota {
            dimension: QuotaDimension::Unknown,
            retry_delay_secs: None,
            quota_ids: Vec::new(),
        },
    }
}

fn classify_api_payload(payload: &ApiErrorPayload) -> ProviderErrorKind {
    match payload.status {
        429 => classify_quota(payload),
        503 => ProviderErrorKind::Overload,
        400 | 404 => ProviderErrorKind::Validation,
        s if s >= 500 => ProviderErrorKind::Transient,
        _ => {
            // Some gateways report overload as 500-range text on odd codes.
            let lower = payload.message.to_lowercase();
            if lower.contains("overload") || payload.status_text == "UNAVAILABLE" {
                ProviderErrorKind::Overload
            } else {
                ProviderErrorKind::Fatal
            }
        }
    }
}

fn classify_quota(payload: &ApiErrorPayload) -> ProviderErrorKind {
    let quota_ids = extract_quota_ids(&payload.details);
    let retry_delay_secs =
        extract_retry_delay(&payload.details).or_else(|| parse_reset_hint(&payload.message));

    let dimension = quota_ids
        .iter()
        .map(|id| dimension_from_quota_id(id))
        .find(|d| *d != QuotaDimension::Unknown)
        .unwrap_or_else(|| dimension_from_message(&payload.message));

    ProviderErrorKind::Quota {
        dimension,
        retry_delay_secs,
        quota_ids,
    }
}

/// Pull quota ids and metrics out of `QuotaFailure` detail entries.
fn extract_quota_ids(details: &[serde_json::Value]) -> Vec<String> {
    let mut ids = Vec::new();
    for detail in details {
        let Some(violations) = detail.get("violations").and_then(|v| v.as_array()) else {
            continue;
        };
        for violation in violations {
            for key in ["quotaId", "quotaMetric"] {
                if let Some(id) = violation.get(key).and_then(|v| v.as_str()) {
                    ids.push(id.to_string());
                }
            }
        }
    }
    ids
}

/// Pull `retryDelay` ("45s") out of a `RetryInfo` detail entry.
fn extract_retry_delay(details: &[serde_json::Value]) -> Option<u64> {
    for detail in details {
        if let Some(delay) = detail.get("retryDelay").and_then(|v| v.as_str()) {
            if let Some(secs) = delay.strip_suffix('s') {
                // Delays come as "45s" or "12.5s"; round fractional up.
                if let Ok(secs) = secs.parse::<f64>() {
                    return Some(secs.ceil() as u64);
                }
            }
        }
    }
    None
}

/// Parse "Your quota will reset after Xs." style message hints.
fn parse_reset_hint(message: &str) -> Option<u64> {
    let rest = &message[message.find("reset after ")? + 12..];
    let s_pos = rest.find('s')?;
    rest[..s_pos].trim().parse().ok()
}

fn dimension_from_quota_id(id: &str) -> QuotaDimension {
    let lower = id.to_lowercase();
    if lower.contains("perday") || lower.contains("per_day") {
        QuotaDimension::Rpd
    } else if lower.contains("perminute") || lower.contains("per_minute") {
        if lower.contains("token") {
            QuotaDimension::Tpm
        } else {
            QuotaDimension::Rpm
        }
    } else {
        QuotaDimension::Unknown
    }
}

/// Documented keyword fallback for unstructured 429 bodies.
fn dimension_from_message(message: &str) -> QuotaDimension {
    let lower = message.to_lowercase();
    if lower.contains("per day") || lower.contains("daily") {
        QuotaDimension::Rpd
    } else if lower.contains("token") {
        QuotaDimension::Tpm
    } else if lower.contains("per minute") || lower.contains("rate") {
        QuotaDimension::Rpm
    } else {
        QuotaDimension::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quota_error(details: Vec<serde_json::Value>, message: &str) -> Error {
        Error::Api(ApiErrorPayload {
            status: 429,
            status_text: "RESOURCE_EXHAUSTED".to_string(),
            message: message.to_string(),
            details,
        })
    }

    #[test]
    fn test_classify_rpm_with_retry_info() {
        let err = quota_error(
            vec![
                json!({
                    "@type": "type.googleapis.com/google.rpc.QuotaFailure",
                    "violations": [{
                        "quotaId": "GenerateRequestsPerMinutePerProjectPerModel"
                    }]
                }),
                json!({
                    "@type": "type.googleapis.com/google.rpc.RetryInfo",
                    "retryDelay": "45s"
                }),
            ],
            "quota exceeded",
        );

        let kind = classify_provider_error(&err);
        assert_eq!(
            kind,
            ProviderErrorKind::Quota {
                dimension: QuotaDimension::Rpm,
                retry_delay_secs: Some(45),
                quota_ids: vec!["GenerateRequestsPerMinutePerProjectPerModel".to_string()],
            }
        );
    }

    #[test]
    fn test_classify_tpm_from_quota_metric() {
        let err = quota_error(
            vec![json!({
                "violations": [{
                    "quotaMetric": "generativelanguage.googleapis.com/generate_content_input_tokens_per_model_per_minute"
                }]
            })],
            "",
        );

        match classify_provider_error(&err) {
            ProviderErrorKind::Quota { dimension, .. } => {
                assert_eq!(dimension, QuotaDimension::Tpm);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_classify_rpd() {
        let err = quota_error(
            vec![json!({
                "violations": [{"quotaId": "GenerateRequestsPerDayPerProjectPerModel"}]
            })],
            "",
        );

        match classify_provider_error(&err) {
            ProviderErrorKind::Quota { dimension, .. } => {
                assert_eq!(dimension, QuotaDimension::Rpd);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_classify_retry_hint_from_message() {
        let err = quota_error(vec![], "Your quota will reset after 30s.");
        match classify_provider_error(&err) {
            ProviderErrorKind::Quota {
                retry_delay_secs, ..
            } => assert_eq!(retry_delay_secs, Some(30)),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_classify_keyword_fallback() {
        let err = quota_error(vec![], "daily limit reached");
        match classify_provider_error(&err) {
            ProviderErrorKind::Quota { dimension, .. } => {
                assert_eq!(dimension, QuotaDimension::Rpd);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_classify_overload() {
        let err = Error::Api(ApiErrorPayload::bare(503, "model is overloaded"));
        assert_eq!(classify_provider_error(&err), ProviderErrorKind::Overload);
    }

    #[test]
    fn test_classify_validation() {
        let err = Error::Api(ApiErrorPayload::bare(400, "invalid argument"));
        assert_eq!(classify_provider_error(&err), ProviderErrorKind::Validation);
        assert!(!classify_provider_error(&err).is_retryable());

        let err = Error::InvalidResponse("not json".to_string());
        assert_eq!(classify_provider_error(&err), ProviderErrorKind::Validation);
    }

    #[test]
    fn test_classify_transient() {
        let err = Error::Network("connection reset".to_string());
        assert_eq!(classify_provider_error(&err), ProviderErrorKind::Transient);

        let err = Error::Api(ApiErrorPayload::bare(500, "internal"));
        assert_eq!(classify_provider_error(&err), ProviderErrorKind::Transient);
    }

    #[test]
    fn test_classify_fatal_on_other_4xx() {
        let err = Error::Api(ApiErrorPayload::bare(403, "permission denied"));
        assert_eq!(classify_provider_error(&err), ProviderErrorKind::Fatal);
    }
}
