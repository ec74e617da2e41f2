//! Quota ledger
//!
//! Gates every outbound call to a metered model. Tracks per-model sliding
//! counters on calendar minute/day windows, holds overload cool-down marks,
//! and keeps a bounded history of provider quota violations.
//!
//! The ledger is a single shared instance injected into workers. Counter
//! updates go through the per-model map entry (per-shard locking), never a
//! process-wide lock. Callers must obtain a successful [`QuotaLedger::can_make`]
//! for the same window before calling [`QuotaLedger::record`]; counters only
//! ever grow within a window and reset exactly at the calendar boundary.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::classify::QuotaDimension;
use crate::error::{Error, Result};
use crate::limits::{fallback_limits, limits_for, ModelLimits, QuotaTier};


const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_DAY: i64 = 86_400;

/// Bounded violation history length.
const MAX_VIOLATIONS: usize = 200;
/// Violations older than this are evicted.
const VIOLATION_RETENTION_SECS: i64 = 7 * SECS_PER_DAY;
/// RPD-class violations age out faster; their window is at most a day.
const RPD_VIOLATION_RETENTION_SECS: i64 = SECS_PER_DAY;
/// Usage entries untouched for this long are prunable.
const STALE_USAGE_SECS: i64 = 3_600;

// ============================================================================
// Types
// ============================================================================

/// Which limit an admission decision tripped on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitDimension {
    /// Requests per minute
    Rpm,
    /// Tokens per minute
    Tpm,
    /// Requests per day
    Rpd,
    /// Single-request token cap
    MaxTokens,
}

/// Admission decision for one prospective request
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    /// Whether the request may proceed now
    pub allowed: bool,
    /// Human-readable denial reason
    pub reason: Option<String>,
    /// Seconds until the breached window rolls, when applicable
    pub wait_secs: Option<u64>,
    /// The limit that denied the request
    pub dimension: Option<LimitDimension>,
}

impl Admission {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            wait_secs: None,
            dimension: None,
        }
    }

    fn deny(dimension: LimitDimension, reason: String, wait_secs: Option<u64>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            wait_secs,
            dimension: Some(dimension),
        }
    }
}

/// Per-model counters for the current minute/day windows
#[derive(Debug, Clone, Copy, Default)]
struct ModelUsage {
    minute_epoch: i64,
    requests_in_minute: u32,
    tokens_in_minute: u64,
    day_epoch: i64,
    requests_in_day: u32,
    touched_at: i64,
}

impl ModelUsage {
    fn fresh(now: i64) -> Self {
        Self {
            minute_epoch: now / SECS_PER_MINUTE,
            day_epoch: now / SECS_PER_DAY,
            touched_at: now,
            ..Self::default()
        }
    }

    /// Zero any counter whose calendar window has rolled past `now`.
    fn roll(&mut self, now: i64) {
        let minute = now / SECS_PER_MINUTE;
        if minute != self.minute_epoch {
            self.minute_epoch = minute;
            self.requests_in_minute = 0;
            self.tokens_in_minute = 0;
        }
        let day = now / SECS_PER_DAY;
        if day != self.day_epoch {
            self.day_epoch = day;
            self.requests_in_day = 0;
        }
    }

    fn rolled(mut self, now: i64) -> Self {
        self.roll(now);
        self
    }
}

/// Read-only usage view for one model
#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    /// Model identifier
    pub model: String,
    /// Requests recorded in the current minute
    pub requests_in_minute: u32,
    /// Tokens recorded in the current minute
    pub tokens_in_minute: u64,
    /// Requests recorded in the current day
    pub requests_in_day: u32,
    /// The limits the counters are measured against
    pub limits: ModelLimits,
}

/// One recorded provider quota violation
#[derive(Debug, Clone, Serialize)]
pub struct QuotaViolation {
    /// When the violation was observed
    pub at: DateTime<Utc>,
    /// Model that was rejected
    pub model: String,
    /// Breached dimension as reported by the provider
    pub dimension: QuotaDimension,
    /// Provider-suggested wait
    pub retry_delay_secs: Option<u64>,
    /// Raw provider payload for diagnosis
    pub raw: String,
}

// ============================================================================
// QuotaLedger
// ============================================================================

/// Thread-safe, process-wide quota ledger
pub struct QuotaLedger {
    tier: RwLock<QuotaTier>,
    usage: DashMap<String, ModelUsage>,
    /// model -> overload mark expiry, epoch seconds
    overloaded: DashMap<String, i64>,
    violations: Mutex<VecDeque<QuotaViolation>>,
    overload_cooldown: Duration,
}

impl QuotaLedger {
    /// Create a ledger for the given billing tier.
    #[must_use]
    pub fn new(tier: QuotaTier, overload_cooldown: Duration) -> Self {
        Self {
            tier: RwLock::new(tier),
            usage: DashMap::new(),
            overloaded: DashMap::new(),
            violations: Mutex::new(VecDeque::new()),
            overload_cooldown,
        }
    }

    fn now_secs() -> i64 {
        Utc::now().timestamp()
    }

    /// The currently active billing tier.
    pub fn tier(&self) -> QuotaTier {
        *self.tier.read().expect("tier lock poisoned")
    }

    /// Switch the active tier. Resets usage counters; violation history is kept.
    pub fn set_tier(&self, tier: QuotaTier) {
        *self.tier.write().expect("tier lock poisoned") = tier;
        self.usage.clear();
        debug!(?tier, "quota tier switched, usage counters reset");
    }

    fn limits(&self, model: &str) -> ModelLimits {
        limits_for(self.tier(), model).unwrap_or_else(|| {
            warn!(model, "no quota limits configured, using conservative defaults");
            fallback_limits()
        })
    }

    /// Decide whether a request of `est_tokens` may go out for `model` now.
    pub fn can_make(&self, model: &str, est_tokens: u64) -> Admission {
        self.can_make_at(model, est_tokens, Self::now_secs())
    }

    fn can_make_at(&self, model: &str, est_tokens: u64, now: i64) -> Admission {
        let limits = self.limits(model);

        if let Some(max) = limits.max_tokens_per_request {
            if est_tokens > max {
                return Admission::deny(
                    LimitDimension::MaxTokens,
                    format!("request of {est_tokens} tokens exceeds per-request cap {max}"),
                    None,
                );
            }
        }

        let usage = self
            .usage
            .get(model)
            .map(|u| u.rolled(now))
            .unwrap_or_else(|| ModelUsage::fresh(now));

        let minute_wait = (SECS_PER_MINUTE - now % SECS_PER_MINUTE) as u64;

        if usage.requests_in_minute >= limits.rpm {
            return Admission::deny(
                LimitDimension::Rpm,
                format!(
                    "{}/{} requests this minute",
                    usage.requests_in_minute, limits.rpm
                ),
                Some(minute_wait),
            );
        }

        if usage.tokens_in_minute + est_tokens > limits.tpm {
            return Admission::deny(
                LimitDimension::Tpm,
                format!(
                    "{} + {} tokens would exceed {} this minute",
                    usage.tokens_in_minute, est_tokens, limits.tpm
                ),
                Some(minute_wait),
            );
        }

        if let Some(rpd) = limits.rpd {
            if usage.requests_in_day >= rpd {
                let day_wait = (SECS_PER_DAY - now % SECS_PER_DAY) as u64;
                return Admission::deny(
                    LimitDimension::Rpd,
                    format!("{}/{} requests today", usage.requests_in_day, rpd),
                    Some(day_wait),
                );
            }
        }

        Admission::allow()
    }

    /// Record a completed request against the current windows.
    pub fn record(&self, model: &str, actual_tokens: u64) {
        self.record_at(model, actual_tokens, Self::now_secs());
    }

    fn record_at(&self, model: &str, actual_tokens: u64, now: i64) {
        let mut entry = self
            .usage
            .entry(model.to_string())
            .or_insert_with(|| ModelUsage::fresh(now));
        let usage = entry.value_mut();
        usage.roll(now);
        usage.requests_in_minute += 1;
        usage.tokens_in_minute += actual_tokens;
        usage.requests_in_day += 1;
        usage.touched_at = now;
    }

    /// Current usage and limits for one model.
    pub fn get_usage(&self, model: &str) -> UsageSnapshot {
        let now = Self::now_secs();
        let usage = self
            .usage
            .get(model)
            .map(|u| u.rolled(now))
            .unwrap_or_else(|| ModelUsage::fresh(now));
        UsageSnapshot {
            model: model.to_string(),
            requests_in_minute: usage.requests_in_minute,
            tokens_in_minute: usage.tokens_in_minute,
            requests_in_day: usage.requests_in_day,
            limits: self.limits(model),
        }
    }

    /// Usage snapshots for every model seen so far.
    pub fn all_usage(&self) -> Vec<UsageSnapshot> {
        let models: Vec<String> = self.usage.iter().map(|e| e.key().clone()).collect();
        models.iter().map(|m| self.get_usage(m)).collect()
    }

    /// Drop usage entries that have not been touched for an hour.
    pub fn prune_stale_usage(&self) -> usize {
        let cutoff = Self::now_secs() - STALE_USAGE_SECS;
        let before = self.usage.len();
        self.usage.retain(|_, usage| usage.touched_at >= cutoff);
        before - self.usage.len()
    }

    // ------------------------------------------------------------------
    // Violations
    // ------------------------------------------------------------------

    /// Append a provider quota violation to the bounded history.
    pub fn record_violation(&self, violation: QuotaViolation) {
        let mut violations = self.violations.lock().expect("violations lock poisoned");
        violations.push_front(violation);
        Self::prune_violation_queue(&mut violations, Utc::now());
    }

    /// Most recent violations, newest first.
    pub fn violations(&self, limit: usize) -> Vec<QuotaViolation> {
        let mut violations = self.violations.lock().expect("violations lock poisoned");
        Self::prune_violation_queue(&mut violations, Utc::now());
        violations.iter().take(limit).cloned().collect()
    }

    fn prune_violation_queue(violations: &mut VecDeque<QuotaViolation>, now: DateTime<Utc>) {
        violations.retain(|v| {
            let retention = if v.dimension == QuotaDimension::Rpd {
                RPD_VIOLATION_RETENTION_SECS
            } else {
                VIOLATION_RETENTION_SECS
            };
            (now - v.at).num_seconds() < retention
        });
        violations.truncate(MAX_VIOLATIONS);
    }

    // ------------------------------------------------------------------
    // Overload marks
    // ------------------------------------------------------------------

    /// Exclude `model` from selection for the configured cool-down.
    pub fn mark_overloaded(&self, model: &str) {
        let expiry = Self::now_secs() + self.overload_cooldown.as_secs() as i64;
        self.overloaded.insert(model.to_string(), expiry);
        debug!(model, cooldown_secs = self.overload_cooldown.as_secs(), "model marked overloaded");
    }

    /// Whether `model` is inside an overload cool-down.
    pub fn is_overloaded(&self, model: &str) -> bool {
        // Copy the expiry out before touching the map again; removing under
        // a live shard guard would deadlock.
        let expiry = self.overloaded.get(model).map(|e| *e);
        match expiry {
            Some(expiry) if expiry > Self::now_secs() => true,
            Some(_) => {
                self.overloaded.remove(model);
                false
            }
            None => false,
        }
    }

    /// Number of models currently under an overload mark.
    pub fn overloaded_count(&self) -> usize {
        let now = Self::now_secs();
        self.overloaded.iter().filter(|e| *e.value() > now).count()
    }

    // ------------------------------------------------------------------
    // Cooperative waiting
    // ------------------------------------------------------------------

    /// Sleep until `can_make` admits the request or `cancel` fires.
    ///
    /// Re-checks after every wake; a denial with no wait hint re-polls on a
    /// short interval.
    pub async fn wait_for_quota(
        &self,
        model: &str,
        est_tokens: u64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            let admission = self.can_make(model, est_tokens);
            if admission.allowed {
                return Ok(());
            }
            let wait = admission.wait_secs.unwrap_or(5).clamp(1, 60);
            debug!(
                model,
                wait_secs = wait,
                reason = admission.reason.as_deref().unwrap_or(""),
                "waiting for quota"
            );
            tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep(Duration::from_secs(wait)) => {}
            }
        }
    }
}

impl std::fmt::Debug for QuotaLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaLedger")
            .field("tier", &self.tier())
            .field("tracked_models", &self.usage.len())
            .field("overloaded", &self.overloaded_count())
            .finish()
    }
}
