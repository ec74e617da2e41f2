//! Model selection
//!
//! Walks the fixed preference order and returns the first model that exists
//! in the active tier, is not excluded or overloaded, and passes the ledger's
//! admission check for the request's token estimate.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::ledger::{LimitDimension, QuotaLedger};
use crate::limits::{limits_for, MODEL_PREFERENCE};

/// Why no model could be chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoModelReason {
    /// The request exceeds `max_tokens_per_request` for every eligible model
    TooLarge,
    /// Every eligible model is inside an overload cool-down
    AllOverloaded,
    /// Quota denies everywhere; wait this long for the earliest window
    QuotaExhausted {
        /// Seconds until the soonest window rolls
        wait_secs: u64,
    },
    /// The exclusion set removed every candidate
    AllExcluded,
}

impl std::fmt::Display for NoModelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooLarge => write!(f, "request too large for every model"),
            Self::AllOverloaded => write!(f, "all models overloaded"),
            Self::QuotaExhausted { wait_secs } => {
                write!(f, "quota exhausted, earliest window in {wait_secs}s")
            }
            Self::AllExcluded => write!(f, "all models excluded"),
        }
    }
}

/// Picks the best currently-eligible model for a token estimate
#[derive(Clone)]
pub struct ModelSelector {
    ledger: Arc<QuotaLedger>,
}

impl ModelSelector {
    /// Create a selector over the shared ledger.
    #[must_use]
    pub fn new(ledger: Arc<QuotaLedger>) -> Self {
        Self { ledger }
    }

    /// Select a model for `est_tokens`, skipping anything in `exclude`.
    pub fn select(
        &self,
        est_tokens: u64,
        exclude: &HashSet<String>,
    ) -> Result<String, NoModelReason> {
        let tier = self.ledger.tier();
        let mut candidates = 0_usize;
        let mut too_large = 0_usize;
        let mut overloaded = 0_usize;
        let mut min_wait: Option<u64> = None;

        for &model in MODEL_PREFERENCE {
            if limits_for(tier, model).is_none() || exclude.contains(model) {
                continue;
            }
            candidates += 1;

            if self.ledger.is_overloaded(model) {
                overloaded += 1;
                continue;
            }

            let admission = self.ledger.can_make(model, est_tokens);
            if admission.allowed {
                debug!(model, est_tokens, "model selected");
                return Ok(model.to_string());
            }

            match admission.dimension {
                Some(LimitDimension::MaxTokens) => too_large += 1,
                _ => {
                    if let Some(wait) = admission.wait_secs {
                        min_wait = Some(min_wait.map_or(wait, |w| w.min(wait)));
                    }
                }
            }
        }

        if candidates == 0 {
            return Err(NoModelReason::AllExcluded);
        }
        if too_large == candidates {
            return Err(NoModelReason::TooLarge);
        }
        if overloaded == candidates {
            return Err(NoModelReason::AllOverloaded);
        }
        Err(NoModelReason::QuotaExhausted {
            wait_secs: min_wait.unwrap_or(60),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{GEMINI_FLASH, GEMINI_FLASH_LITE, GEMINI_PRO, QuotaTier};
    use std::time::Duration;

    fn selector() -> (Arc<QuotaLedger>, ModelSelector) {
        let ledger = Arc::new(QuotaLedger::new(QuotaTier::Free, Duration::from_secs(300)));
        let selector = ModelSelector::new(Arc::clone(&ledger));
        (ledger, selector)
    }

    #[test]
    fn test_prefers_pro_when_all_eligible() {
        let (_ledger, selector) = selector();
        let model = selector.select(10_000, &HashSet::new()).unwrap();
        assert_eq!(model, GEMINI_PRO);
    }

    #[test]
    fn test_falls_past_overloaded_model() {
        let (ledger, selector) = selector();
        ledger.mark_overloaded(GEMINI_PRO);

        let model = selector.select(10_000, &HashSet::new()).unwrap();
        assert_eq!(model, GEMINI_FLASH);
    }

    #[test]
    fn test_exclusions_respected() {
        let (_ledger, selector) = selector();
        let exclude: HashSet<String> =
            [GEMINI_PRO.to_string(), GEMINI_FLASH.to_string()].into();

        let model = selector.select(10_000, &exclude).unwrap();
        assert_eq!(model, GEMINI_FLASH_LITE);
    }

    #[test]
    fn test_all_excluded() {
        let (_ledger, selector) = selector();
        let exclude: HashSet<String> = MODEL_PREFERENCE
            .iter()
            .map(|m| (*m).to_string())
            .collect();

        assert_eq!(
            selector.select(10_000, &exclude),
            Err(NoModelReason::AllExcluded)
        );
    }

    #[test]
    fn test_too_large_everywhere() {
        let (_ledger, selector) = selector();
        // Larger than the shared context window.
        assert_eq!(
            selector.select(5_000_000, &HashSet::new()),
            Err(NoModelReason::TooLarge)
        );
    }

    #[test]
    fn test_all_overloaded() {
        let (ledger, selector) = selector();
        for model in MODEL_PREFERENCE {
            ledger.mark_overloaded(model);
        }

        assert_eq!(
            selector.select(10_000, &HashSet::new()),
            Err(NoModelReason::AllOverloaded)
        );
    }

    #[test]
    fn test_quota_exhausted_reports_min_wait() {
        let (ledger, selector) = selector();
        // Exhaust the per-minute request budget of every model.
        for model in MODEL_PREFERENCE {
            let rpm = ledger.get_usage(model).limits.rpm;
            for _ in 0..rpm {
                ledger.record(model, 10);
            }
        }

        match selector.select(10, &HashSet::new()) {
            Err(NoModelReason::QuotaExhausted { wait_secs }) => {
                assert!(wait_secs <= 60, "wait bounded by the minute window");
            }
            other => panic!("unexpected selection: {other:?}"),
        }
    }
}
