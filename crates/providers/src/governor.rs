//! Rate/model governor.
//!
//! Tracks per-model health: exponential cooldowns for models whose endpoint
//! rejected tool use, and adaptive request spacing that backs off on provider
//! rate-limit signals and decays on success. The completion client consults
//! the governor before every request and reports every outcome after.
//!
//! Locking discipline: the single mutex is never held across an await.
//! [`ModelGovernor::pace`] reserves a send slot and returns the wait as a
//! [`Duration`]; the caller sleeps outside the lock.

use leadscout_config::GovernorConfig;
use leadscout_core::error::UpstreamError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Per-model health state.
#[derive(Debug, Clone)]
struct ModelHealth {
    /// Consecutive endpoint-unsupported failures (resets on success)
    consecutive_failures: u32,
    /// Cooldown expiry; the model is skipped by selection until then
    blocked_until: Option<Instant>,
    /// Current minimum spacing between requests to this model
    spacing: Duration,
    /// When the next request slot opens
    next_slot: Option<Instant>,
    /// Round-trip time of the last successful completion
    last_latency: Option<Duration>,
    /// Lifetime counters for stats
    successes: u64,
    failures: u64,
}

impl ModelHealth {
    fn new(config: &GovernorConfig) -> Self {
        Self {
            consecutive_failures: 0,
            blocked_until: None,
            spacing: Duration::from_millis(config.min_spacing_ms),
            next_slot: None,
            last_latency: None,
            successes: 0,
            failures: 0,
        }
    }

    fn is_blocked(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }
}

/// A point-in-time snapshot of one model's health, for logs and the CLI.
#[derive(Debug, Clone)]
pub struct ModelStats {
    pub model: String,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub blocked_for: Option<Duration>,
    pub spacing: Duration,
    pub last_latency: Option<Duration>,
}

/// The rate/model governor.
pub struct ModelGovernor {
    config: GovernorConfig,
    health: Mutex<HashMap<String, ModelHealth>>,
}

impl ModelGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            health: Mutex::new(HashMap::new()),
        }
    }

    /// Pick the first usable model from the preferred model followed by the
    /// fallback chain. A model is usable when it is not inside a cooldown
    /// window. When every candidate is blocked, the preferred model is
    /// returned anyway: the caller surfaces the resulting failure rather
    /// than deadlocking here.
    pub fn select_model(&self, preferred: &str, fallbacks: &[String]) -> String {
        let now = Instant::now();
        let health = self.lock();

        let selected = std::iter::once(preferred)
            .chain(fallbacks.iter().map(String::as_str))
            .find(|candidate| {
                let blocked = health
                    .get(*candidate)
                    .is_some_and(|h| h.is_blocked(now));
                if blocked {
                    debug!(model = %candidate, "Skipping model in cooldown");
                }
                !blocked
            });

        match selected {
            Some(model) => model.to_string(),
            None => {
                warn!(model = %preferred, "Every candidate is cooling down, using preferred anyway");
                preferred.to_string()
            }
        }
    }

    /// Reserve the next request slot for `model` and return how long the
    /// caller must wait before sending. The slot is reserved immediately so
    /// concurrent callers space out instead of stampeding.
    pub fn pace(&self, model: &str) -> Duration {
        let now = Instant::now();
        let mut health = self.lock();
        let entry = health
            .entry(model.to_string())
            .or_insert_with(|| ModelHealth::new(&self.config));

        let wait = match entry.next_slot {
            Some(slot) if slot > now => slot - now,
            _ => Duration::ZERO,
        };

        entry.next_slot = Some(now + wait + entry.spacing);
        wait
    }

    /// Record a successful completion: clears the cooldown streak and decays
    /// the request spacing back toward its floor.
    pub fn record_success(&self, model: &str, latency: Duration) {
        let mut health = self.lock();
        let entry = health
            .entry(model.to_string())
            .or_insert_with(|| ModelHealth::new(&self.config));

        entry.successes += 1;
        entry.consecutive_failures = 0;
        entry.blocked_until = None;
        entry.last_latency = Some(latency);

        let floor = Duration::from_millis(self.config.min_spacing_ms);
        let decayed = entry.spacing.mul_f64(self.config.spacing_decay);
        entry.spacing = decayed.max(floor);

        debug!(
            model = %model,
            latency_ms = latency.as_millis() as u64,
            spacing_ms = entry.spacing.as_millis() as u64,
            "Recorded success"
        );
    }

    /// Record an upstream failure and adjust health accordingly.
    ///
    /// - Endpoint-unsupported: exponential cooldown, doubling from the base
    ///   up to the cap. The model is skipped by selection until it expires.
    /// - Rate-limited: multiply request spacing by the backoff factor and
    ///   honor the provider's retry-after as a spacing floor.
    /// - Timeout/unknown: counted, but no cooldown — transient by default.
    pub fn record_failure(&self, model: &str, error: &UpstreamError) {
        let now = Instant::now();
        let mut health = self.lock();
        let entry = health
            .entry(model.to_string())
            .or_insert_with(|| ModelHealth::new(&self.config));

        entry.failures += 1;

        match error {
            UpstreamError::EndpointUnsupported { .. } => {
                entry.consecutive_failures += 1;
                let exponent = entry.consecutive_failures.saturating_sub(1).min(16);
                let cooldown_ms = self
                    .config
                    .cooldown_base_ms
                    .saturating_mul(1u64 << exponent)
                    .min(self.config.cooldown_cap_ms);
                entry.blocked_until = Some(now + Duration::from_millis(cooldown_ms));
                warn!(
                    model = %model,
                    streak = entry.consecutive_failures,
                    cooldown_ms,
                    "Model endpoint unsupported, entering cooldown"
                );
            }
            UpstreamError::RateLimited { retry_after_secs } => {
                let seed = Duration::from_millis(self.config.cooldown_base_ms);
                let current = if entry.spacing.is_zero() {
                    seed
                } else {
                    entry.spacing
                };
                let backed_off = current.mul_f64(self.config.spacing_backoff);
                let retry_floor = Duration::from_secs(*retry_after_secs);
                let cap = Duration::from_millis(self.config.max_spacing_ms);
                entry.spacing = backed_off.max(retry_floor).min(cap);
                info!(
                    model = %model,
                    spacing_ms = entry.spacing.as_millis() as u64,
                    "Rate limited, widening request spacing"
                );
            }
            UpstreamError::Timeout(_) | UpstreamError::Unknown(_) => {
                debug!(model = %model, kind = error.kind(), "Transient failure recorded");
            }
        }
    }

    /// Snapshot current health for all tracked models.
    pub fn stats(&self) -> Vec<ModelStats> {
        let now = Instant::now();
        let health = self.lock();
        let mut stats: Vec<ModelStats> = health
            .iter()
            .map(|(model, h)| ModelStats {
                model: model.clone(),
                successes: h.successes,
                failures: h.failures,
                consecutive_failures: h.consecutive_failures,
                blocked_for: h
                    .blocked_until
                    .filter(|until| *until > now)
                    .map(|until| until - now),
                spacing: h.spacing,
                last_latency: h.last_latency,
            })
            .collect();
        stats.sort_by(|a, b| a.model.cmp(&b.model));
        stats
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ModelHealth>> {
        // Health bookkeeping is recoverable state; a poisoned lock just
        // means a panicking thread mid-update, so take the data as-is.
        self.health.lock().unwrap_or_else(|e| e.into_inner())
    }
}
