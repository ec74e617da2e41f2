//! Static quota tables
//!
//! Per-model request and token limits keyed by billing tier. The tables are
//! design-time constants; the active tier is process state on the ledger.

use serde::{Deserialize, Serialize};

/// Gemini 2.5 Pro
pub const GEMINI_PRO: &str = "gemini-2.5-pro";
/// Gemini 2.5 Flash
pub const GEMINI_FLASH: &str = "gemini-2.5-flash";
/// Gemini 2.5 Flash-Lite
pub const GEMINI_FLASH_LITE: &str = "gemini-2.5-flash-lite";

/// Model preference order for selection, best first.
///
/// Models at the same capability rank are listed in lexicographic order of
/// identifier, so the array order is the complete tie-break rule.
pub const MODEL_PREFERENCE: &[&str] = &[GEMINI_PRO, GEMINI_FLASH, GEMINI_FLASH_LITE];

/// Billing tier selecting the quota table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaTier {
    /// Free tier (tight daily caps)
    Free,
    /// Pay-as-you-go tier 1
    T1,
    /// Tier 2
    T2,
    /// Tier 3
    T3,
}

impl Default for QuotaTier {
    fn default() -> Self {
        Self::Free
    }
}

/// Limits for one `(tier, model)` cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLimits {
    /// Requests per calendar minute
    pub rpm: u32,
    /// Tokens per calendar minute
    pub tpm: u64,
    /// Requests per calendar day, unlimited when `None`
    pub rpd: Option<u32>,
    /// Hard cap on a single request's token estimate
    pub max_tokens_per_request: Option<u64>,
}

/// Input context window shared by the Gemini 2.5 family.
const CONTEXT_WINDOW: u64 = 1_048_576;

/// Look up the limits for a model in the given tier.
///
/// Returns `None` for models absent from the tier's table; callers fall back
/// to conservative defaults.
#[must_use]
pub fn limits_for(tier: QuotaTier, model: &str) -> Option<ModelLimits> {
    let limits = match (tier, model) {
        (QuotaTier::Free, GEMINI_PRO) => ModelLimits {
            rpm: 5,
            tpm: 250_000,
            rpd: Some(100),
            max_tokens_per_request: Some(CONTEXT_WINDOW),
        },
        (QuotaTier::Free, GEMINI_FLASH) => ModelLimits {
            rpm: 10,
            tpm: 250_000,
            rpd: Some(250),
            max_tokens_per_request: Some(CONTEXT_WINDOW),
        },
        (QuotaTier::Free, GEMINI_FLASH_LITE) => ModelLimits {
            rpm: 15,
            tpm: 250_000,
            rpd: Some(1_000),
            max_tokens_per_request: Some(CONTEXT_WINDOW),
        },

        (QuotaTier::T1, GEMINI_PRO) => ModelLimits {
            rpm: 150,
            tpm: 2_000_000,
            rpd: Some(10_000),
            max_tokens_per_request: Some(CONTEXT_WINDOW),
        },
        (QuotaTier::T1, GEMINI_FLASH) => ModelLimits {
            rpm: 1_000,
            tpm: 1_000_000,
            rpd: Some(10_000),
            max_tokens_per_request: Some(CONTEXT_WINDOW),
        },
        (QuotaTier::T1, GEMINI_FLASH_LITE) => ModelLimits {
            rpm: 4_000,
            tpm: 4_000_000,
            rpd: None,
            max_tokens_per_request: Some(CONTEXT_WINDOW),
        },

        (QuotaTier::T2, GEMINI_PRO) => ModelLimits {
            rpm: 1_000,
            tpm: 5_000_000,
            rpd: Some(50_000),
            max_tokens_per_request: Some(CONTEXT_WINDOW),
        },
        (QuotaTier::T2, GEMINI_FLASH) => ModelLimits {
            rpm: 2_000,
            tpm: 3_000_000,
            rpd: Some(100_000),
            max_tokens_per_request: Some(CONTEXT_WINDOW),
        },
        (QuotaTier::T2, GEMINI_FLASH_LITE) => ModelLimits {
            rpm: 10_000,
            tpm: 10_000_000,
            rpd: None,
            max_tokens_per_request: Some(CONTEXT_WINDOW),
        },

        (QuotaTier::T3, GEMINI_PRO) => ModelLimits {
            rpm: 2_000,
            tpm: 8_000_000,
            rpd: None,
            max_tokens_per_request: Some(CONTEXT_WINDOW),
        },
        (QuotaTier::T3, GEMINI_FLASH) => ModelLimits {
            rpm: 10_000,
            tpm: 8_000_000,
            rpd: None,
            max_tokens_per_request: Some(CONTEXT_WINDOW),
        },
        (QuotaTier::T3, GEMINI_FLASH_LITE) => ModelLimits {
            rpm: 30_000,
            tpm: 30_000_000,
            rpd: None,
            max_tokens_per_request: Some(CONTEXT_WINDOW),
        },

        _ => return None,
    };
    Some(limits)
}

/// Conservative fallback applied when a model has no table entry.
#[must_use]
pub fn fallback_limits() -> ModelLimits {
    ModelLimits {
        rpm: 5,
        tpm: 100_000,
        rpd: Some(100),
        max_tokens_per_request: Some(250_000),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_preferred_model_has_limits_in_every_tier() {
        for tier in [QuotaTier::Free, QuotaTier::T1, QuotaTier::T2, QuotaTier::T3] {
            for model in MODEL_PREFERENCE {
                assert!(limits_for(tier, model).is_some(), "{tier:?}/{model}");
            }
        }
    }

    #[test]
    fn test_unknown_model_has_no_limits() {
        assert!(limits_for(QuotaTier::Free, "gemini-9000").is_none());
    }

    #[test]
    fn test_free_tier_pro_caps() {
        let limits = limits_for(QuotaTier::Free, GEMINI_PRO).unwrap();
        assert_eq!(limits.rpm, 5);
        assert_eq!(limits.rpd, Some(100));
    }

    #[test]
    fn test_tier_parses_from_config_string() {
        let tier: QuotaTier = serde_json::from_str("\"t2\"").unwrap();
        assert_eq!(tier, QuotaTier::T2);
    }
}
