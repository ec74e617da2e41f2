//! Rate-limit coordination
//!
//! Bridges quota ledger decisions into worker-level throttling: preflight
//! checks become deferrals with a paused intake, provider quota violations
//! become measured pauses, and sustained pressure shrinks a queue's
//! effective throttle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use kinoscope_llm::{
    classify_provider_error, ProviderErrorKind, QuotaDimension, QuotaLedger, QuotaViolation,
    MODEL_PREFERENCE,
};

use crate::queue::{queues, QueueThrottle, WorkerHandle};

/// Preflight pauses are capped at 5 minutes.
const MAX_PREFLIGHT_PAUSE_MS: u64 = 300_000;

/// Default pause for a quota violation with a known dimension but no
/// provider-suggested delay.
const DEFAULT_VIOLATION_PAUSE: Duration = Duration::from_secs(120);

/// Pause applied when the violation payload cannot be interpreted.
const UNPARSEABLE_VIOLATION_PAUSE: Duration = Duration::from_secs(60);

/// Pause applied when coordination itself goes wrong (non-quota error fed
/// into the violation path).
const INTERNAL_FAILURE_PAUSE: Duration = Duration::from_secs(300);

/// Usage ratio past which a queue's throttle is shrunk.
const PRESSURE_THRESHOLD: f64 = 0.8;

/// Compile-time base throttles per queue.
///
/// Heavy AI queues run a conservative budget over a minute window;
/// everything else turns over quickly.
#[must_use]
pub fn base_throttle(queue: &str) -> QueueThrottle {
    match queue {
        queues::SEGMENT_ANALYSIS | queues::COMBINATION => QueueThrottle {
            max: 2,
            window_ms: 60_000,
        },
        queues::STATS | queues::QUOTA_CLEANUP => QueueThrottle {
            max: 5,
            window_ms: 10_000,
        },
        _ => QueueThrottle {
            max: 10,
            window_ms: 1_000,
        },
    }
}

/// Result of feeding a provider quota error through the coordinator
#[derive(Debug, Clone)]
pub struct ViolationOutcome {
    /// Classified error kind
    pub kind: ProviderErrorKind,
    /// How long the worker's intake was paused; also the job's defer delay
    pub pause: Duration,
}

impl ViolationOutcome {
    /// Whether the violation was a daily-quota exhaustion.
    #[must_use]
    pub fn is_daily(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Quota {
                dimension: QuotaDimension::Rpd,
                ..
            }
        )
    }
}

/// Translates ledger state and provider errors into worker throttling
#[derive(Clone)]
pub struct RateLimitCoordinator {
    ledger: Arc<QuotaLedger>,
}

impl RateLimitCoordinator {
    /// Create a coordinator over the shared ledger.
    #[must_use]
    pub fn new(ledger: Arc<QuotaLedger>) -> Self {
        Self { ledger }
    }

    /// Effective throttle for a queue, given the model it is burning quota
    /// against.
    ///
    /// When the model's minute usage crosses 80 % of its RPM limit, the
    /// budget shrinks by `clamp(1 - usage_ratio, 0.1, 1)` and the window
    /// doubles.
    #[must_use]
    pub fn queue_rate_limit(&self, queue: &str, model: Option<&str>) -> QueueThrottle {
        let base = base_throttle(queue);
        let Some(model) = model else {
            return base;
        };

        let snapshot = self.ledger.get_usage(model);
        let rpm = snapshot.limits.rpm.max(1);
        let ratio = f64::from(snapshot.requests_in_minute) / f64::from(rpm);
        if ratio <= PRESSURE_THRESHOLD {
            return base;
        }

        let factor = (1.0 - ratio).clamp(0.1, 1.0);
        let throttled = QueueThrottle {
            max: ((f64::from(base.max) * factor).floor() as u32).max(1),
            window_ms: base.window_ms * 2,
        };
        debug!(
            queue,
            model,
            usage_ratio = ratio,
            max = throttled.max,
            window_ms = throttled.window_ms,
            "queue throttle shrunk under quota pressure"
        );
        throttled
    }

    /// Re-tune a worker's effective throttle against current ledger state.
    pub fn tune_worker(&self, worker: &WorkerHandle, model: Option<&str>) {
        let throttle = self.queue_rate_limit(worker.queue(), model);
        worker.set_throttle(throttle);
    }

    /// Ledger preflight for an outbound call.
    ///
    /// On denial the worker's intake pauses for `min(wait, 5 min)` and the
    /// returned delay is surfaced as a rate-limit signal (a deferral, not a
    /// failure).
    pub fn apply_preflight(
        &self,
        worker: &WorkerHandle,
        model: &str,
        est_tokens: u64,
    ) -> Option<Duration> {
        let admission = self.ledger.can_make(model, est_tokens);
        if admission.allowed {
            return None;
        }

        let wait_ms = admission
            .wait_secs
            .map_or(MAX_PREFLIGHT_PAUSE_MS, |s| s.saturating_mul(1_000))
            .min(MAX_PREFLIGHT_PAUSE_MS);
        let pause = Duration::from_millis(wait_ms.max(1_000));
        worker.pause_for(pause);
        debug!(
            queue = worker.queue(),
            model,
            est_tokens,
            reason = admission.reason.as_deref().unwrap_or(""),
            pause_ms = pause.as_millis() as u64,
            "preflight denied, deferring"
        );
        Some(pause)
    }

    /// Handle a provider quota error observed mid-flight.
    ///
    /// Records the violation on the ledger, pauses the worker, and returns
    /// the classified outcome so the stage can decide between a deferral
    /// and a terminal failure.
    pub fn handle_quota_violation(
        &self,
        worker: &WorkerHandle,
        model: &str,
        err: &kinoscope_llm::Error,
    ) -> ViolationOutcome {
        let kind = classify_provider_error(err);

        let pause = match &kind {
            ProviderErrorKind::Quota {
                dimension,
                retry_delay_secs,
                ..
            } => {
                self.ledger.record_violation(QuotaViolation {
                    at: Utc::now(),
                    model: model.to_string(),
                    dimension: *dimension,
                    retry_delay_secs: *retry_delay_secs,
                    raw: err.to_string(),
                });

                match (dimension, retry_delay_secs) {
                    // Daily quota: nothing to do until the day rolls over.
                    (QuotaDimension::Rpd, _) => seconds_to_day_end(),
                    (_, Some(delay)) => Duration::from_secs(*delay),
                    (QuotaDimension::Unknown, None) => UNPARSEABLE_VIOLATION_PAUSE,
                    (_, None) => DEFAULT_VIOLATION_PAUSE,
                }
            }
            other => {
                warn!(
                    queue = worker.queue(),
                    model,
                    kind = ?other,
                    "non-quota error routed through violation handling"
                );
                INTERNAL_FAILURE_PAUSE
            }
        };

        worker.pause_for(pause);
        ViolationOutcome { kind, pause }
    }

    /// Extended pause when the model pool itself is degraded: with more
    /// than half the preference order overloaded, intake pauses for double
    /// the worker's window.
    pub fn apply_intelligent(&self, worker: &WorkerHandle) -> Option<Duration> {
        let overloaded = self.ledger.overloaded_count();
        if overloaded * 2 <= MODEL_PREFERENCE.len() {
            return None;
        }
        let pause = worker.effective().window() * 2;
        worker.pause_for(pause);
        debug!(
            queue = worker.queue(),
            overloaded,
            pause_ms = pause.as_millis() as u64,
            "majority of models overloaded, extended pause"
        );
        Some(pause)
    }
}

/// Time until the current UTC day ends, capped at 24 hours.
fn seconds_to_day_end() -> Duration {
    let now = Utc::now().timestamp();
    let remaining = 86_400 - now.rem_euclid(86_400);
    Duration::from_secs(remaining.clamp(1, 86_400) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinoscope_llm::{ApiErrorPayload, Error, QuotaTier};
    use serde_json::json;

    const MODEL: &str = "gemini-2.5-pro";

    fn setup() -> (Arc<QuotaLedger>, RateLimitCoordinator, Arc<WorkerHandle>) {
        let ledger = Arc::new(QuotaLedger::new(QuotaTier::Free, Duration::from_secs(300)));
        let coordinator = RateLimitCoordinator::new(Arc::clone(&ledger));
        let worker = WorkerHandle::detached(
            queues::SEGMENT_ANALYSIS,
            base_throttle(queues::SEGMENT_ANALYSIS),
        );
        (ledger, coordinator, worker)
    }

    fn quota_429(details: serde_json::Value, message: &str) -> Error {
        Error::Api(ApiErrorPayload {
            status: 429,
            status_text: "RESOURCE_EXHAUSTED".to_string(),
            message: message.to_string(),
            details: details.as_array().cloned().unwrap_or_default(),
        })
    }

    #[test]
    fn test_base_throttles() {
        assert_eq!(
            base_throttle(queues::SEGMENT_ANALYSIS),
            QueueThrottle {
                max: 2,
                window_ms: 60_000
            }
        );
        assert_eq!(
            base_throttle(queues::CHANNEL_DISCOVERY),
            QueueThrottle {
                max: 10,
                window_ms: 1_000
            }
        );
    }

    #[test]
    fn test_queue_rate_limit_shrinks_under_pressure() {
        let ledger = Arc::new(QuotaLedger::new(QuotaTier::Free, Duration::from_secs(300)));
        let coordinator = RateLimitCoordinator::new(Arc::clone(&ledger));

        // Free-tier pro: 5 rpm. Record 5 requests -> ratio 1.0 > 0.8.
        for _ in 0..5 {
            ledger.record(MODEL, 100);
        }

        let throttle = coordinator.queue_rate_limit(queues::SEGMENT_ANALYSIS, Some(MODEL));
        let base = base_throttle(queues::SEGMENT_ANALYSIS);
        assert_eq!(throttle.window_ms, base.window_ms * 2);
        assert!(throttle.max >= 1);
        assert!(throttle.max < base.max.max(2));
    }

    #[test]
    fn test_queue_rate_limit_unchanged_below_threshold() {
        let ledger = Arc::new(QuotaLedger::new(QuotaTier::Free, Duration::from_secs(300)));
        let coordinator = RateLimitCoordinator::new(Arc::clone(&ledger));
        ledger.record(MODEL, 100);

        let throttle = coordinator.queue_rate_limit(queues::SEGMENT_ANALYSIS, Some(MODEL));
        assert_eq!(throttle, base_throttle(queues::SEGMENT_ANALYSIS));
    }

    #[test]
    fn test_preflight_allows_when_quota_available() {
        let (_ledger, coordinator, worker) = setup();
        assert!(coordinator.apply_preflight(&worker, MODEL, 10_000).is_none());
        assert!(worker.paused_remaining().is_none());
    }

    #[test]
    fn test_preflight_denial_pauses_and_defers() {
        let (ledger, coordinator, worker) = setup();
        // Saturate the minute window.
        for _ in 0..5 {
            ledger.record(MODEL, 100);
        }

        let delay = coordinator
            .apply_preflight(&worker, MODEL, 100)
            .expect("denied");
        // Bounded by the minute window and the 5-minute cap.
        assert!(delay <= Duration::from_secs(60));
        assert!(worker.paused_remaining().is_some());
    }

    #[test]
    fn test_violation_with_retry_info_uses_provider_delay() {
        let (ledger, coordinator, worker) = setup();
        let err = quota_429(
            json!([
                {"violations": [{"quotaId": "GenerateRequestsPerMinutePerProjectPerModel"}]},
                {"retryDelay": "45s"}
            ]),
            "quota exceeded",
        );

        let outcome = coordinator.handle_quota_violation(&worker, MODEL, &err);
        assert_eq!(outcome.pause, Duration::from_secs(45));
        assert!(!outcome.is_daily());
        // The violation is on the ledger's history.
        assert_eq!(ledger.violations(10).len(), 1);
        assert!(worker.paused_remaining().is_some());
    }

    #[test]
    fn test_rpd_violation_pauses_until_day_end() {
        let (_ledger, coordinator, worker) = setup();
        let err = quota_429(
            json!([{"violations": [{"quotaId": "GenerateRequestsPerDayPerProjectPerModel"}]}]),
            "",
        );

        let outcome = coordinator.handle_quota_violation(&worker, MODEL, &err);
        assert!(outcome.is_daily());
        assert!(outcome.pause.as_secs() <= 86_400);
        assert!(outcome.pause.as_secs() >= 1);
    }

    #[test]
    fn test_unparseable_violation_short_pause() {
        let (_ledger, coordinator, worker) = setup();
        let err = quota_429(json!([]), "something went sideways");

        let outcome = coordinator.handle_quota_violation(&worker, MODEL, &err);
        assert_eq!(outcome.pause, UNPARSEABLE_VIOLATION_PAUSE);
    }

    #[test]
    fn test_known_dimension_without_delay_uses_default() {
        let (_ledger, coordinator, worker) = setup();
        let err = quota_429(
            json!([{"violations": [{"quotaId": "GenerateRequestsPerMinutePerProjectPerModel"}]}]),
            "",
        );

        let outcome = coordinator.handle_quota_violation(&worker, MODEL, &err);
        assert_eq!(outcome.pause, DEFAULT_VIOLATION_PAUSE);
    }

    #[test]
    fn test_non_quota_error_gets_internal_failure_pause() {
        let (_ledger, coordinator, worker) = setup();
        let err = Error::Network("connection reset".to_string());

        let outcome = coordinator.handle_quota_violation(&worker, MODEL, &err);
        assert_eq!(outcome.pause, INTERNAL_FAILURE_PAUSE);
    }

    #[test]
    fn test_intelligent_pause_on_majority_overload() {
        let (ledger, coordinator, worker) = setup();
        assert!(coordinator.apply_intelligent(&worker).is_none());

        ledger.mark_overloaded("gemini-2.5-pro");
        ledger.mark_overloaded("gemini-2.5-flash");

        let pause = coordinator.apply_intelligent(&worker).expect("paused");
        assert_eq!(pause, worker.effective().window() * 2);
    }

    #[test]
    fn test_tune_worker_applies_effective_throttle() {
        let (ledger, coordinator, worker) = setup();
        for _ in 0..5 {
            ledger.record(MODEL, 100);
        }

        coordinator.tune_worker(&worker, Some(MODEL));
        let effective = worker.effective();
        assert_eq!(effective.window_ms, worker.base().window_ms * 2);
    }

    #[test]
    fn test_seconds_to_day_end_bounds() {
        let remaining = seconds_to_day_end();
        assert!(remaining.as_secs() >= 1);
        assert!(remaining.as_secs() <= 86_400);
    }
}
