//! Per-source backoff after rate-limit responses.
//!
//! Delay for the n-th consecutive rate limit without a server hint:
//!
//! ```text
//! base * 2^(min(n, max_exponent) - 1) * (1 + U[-jitter, +jitter])
//! ```
//!
//! A `Retry-After` style hint from the source replaces the computed delay.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rand::prelude::*;
use rand_pcg::Mcg128Xsl64;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::storage::RateLimitConfig;

/// Backoff bookkeeping for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffState {
    pub backoff_until: DateTime<Utc>,
    pub consecutive_rate_limits: u32,
    pub last_retry_after: Option<u64>,
}

/// Upper bound on a server retry hint (one day).
const MAX_HINT_SECS: u64 = 86_400;

struct Inner {
    sources: HashMap<String, BackoffState>,
    rng: Mcg128Xsl64,
}

pub struct RateLimitManager {
    inner: Mutex<Inner>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimitManager {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let rng = match config.seed {
            Some(seed) => Mcg128Xsl64::seed_from_u64(seed),
            None => Mcg128Xsl64::from_entropy(),
        };
        Self {
            inner: Mutex::new(Inner {
                sources: HashMap::new(),
                rng,
            }),
            config,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a rate-limit response and return the delay applied.
    pub fn handle_rate_limit(&self, source_id: &str, retry_after_secs: Option<u64>) -> Duration {
        let now = self.clock.now();
        let mut inner = self.lock();
        let count = inner
            .sources
            .get(source_id)
            .map_or(0, |s| s.consecutive_rate_limits)
            .saturating_add(1);

        let delay = match retry_after_secs {
            Some(secs) => Duration::seconds(secs.min(MAX_HINT_SECS) as i64),
            None => {
                let jitter = sample_jitter(&mut inner.rng, self.config.jitter_ratio);
                exponential_delay(&self.config, count, jitter)
            }
        };

        inner.sources.insert(
            source_id.to_string(),
            BackoffState {
                backoff_until: now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC),
                consecutive_rate_limits: count,
                last_retry_after: retry_after_secs,
            },
        );
        tracing::info!(
            source_id,
            consecutive = count,
            delay_secs = delay.num_seconds(),
            "source rate limited; backing off"
        );
        delay
    }

    pub fn should_skip(&self, source_id: &str) -> bool {
        let now = self.clock.now();
        self.lock()
            .sources
            .get(source_id)
            .is_some_and(|s| now < s.backoff_until)
    }

    /// Forget the backoff after a successful fetch.
    pub fn clear_backoff(&self, source_id: &str) {
        if self.lock().sources.remove(source_id).is_some() {
            tracing::debug!(source_id, "backoff cleared");
        }
    }

    /// Time left in the backoff window, if one is active.
    pub fn backoff_remaining(&self, source_id: &str) -> Option<Duration> {
        let now = self.clock.now();
        self.lock()
            .sources
            .get(source_id)
            .map(|s| s.backoff_until - now)
            .filter(|d| *d > Duration::zero())
    }

    pub fn backoff_until(&self, source_id: &str) -> Option<DateTime<Utc>> {
        self.lock().sources.get(source_id).map(|s| s.backoff_until)
    }

    pub fn state(&self, source_id: &str) -> Option<BackoffState> {
        self.lock().sources.get(source_id).cloned()
    }
}

fn sample_jitter(rng: &mut Mcg128Xsl64, ratio: f64) -> f64 {
    if ratio > 0.0 {
        rng.gen_range(-ratio..=ratio)
    } else {
        0.0
    }
}

/// Delay for the `count`-th consecutive rate limit with a given jitter
/// factor in `[-jitter_ratio, jitter_ratio]`.
pub fn exponential_delay(config: &RateLimitConfig, count: u32, jitter: f64) -> Duration {
    let exponent = count.clamp(1, config.max_exponent.max(1)) - 1;
    let base = config.base_secs as f64 * 2f64.powi(exponent as i32);
    let millis = (base * (1.0 + jitter) * 1000.0).round();
    Duration::milliseconds(millis.max(0.0) as i64)
}
