//! Multi-source sync rounds.
//!
//! The coordinator owns the sync engine together with the rate-limit and
//! health bookkeeping. A round fans out one task per due source on a
//! [`JoinSet`], feeds each outcome back into backoff and health, and merges
//! the eligible events of every enabled source. A source whose fetch fails
//! keeps contributing its last good event set.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;

use super::health::HealthTracker;
use super::rate_limit::RateLimitManager;
use super::sync_engine::SyncEngine;
use super::types::{polling_interval_for, PollingInterval, PollingSchedule, SyncResult};
use crate::calendar::Event;
use crate::clock::{Clock, SystemClock};
use crate::error::{ErrorCategory, SyncError};

/// Shortest delay the coordinator will ask the caller to sleep.
const MIN_POLL_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    Disabled,
    BackingOff { until: DateTime<Utc> },
    NotDue { due: DateTime<Utc> },
}

#[derive(Debug)]
pub struct SourceFailure {
    pub source_id: String,
    pub error: SyncError,
    /// Whether the failure survived the transient retry.
    pub retried: bool,
}

impl SourceFailure {
    pub fn category(&self) -> ErrorCategory {
        self.error.category()
    }
}

/// Aggregate of one round.
#[derive(Debug, Default)]
pub struct SyncRound {
    pub successes: Vec<SyncResult>,
    pub failures: Vec<SourceFailure>,
    pub skipped: Vec<(String, SkipReason)>,
    /// Eligible events of every enabled source, ordered by start.
    pub events: Vec<Event>,
    pub interval: Option<PollingInterval>,
    /// How long to wait before the next round.
    pub next_poll: Duration,
}

impl SyncRound {
    pub fn failed_sources(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.source_id.as_str()).collect()
    }
}

pub struct SyncCoordinator {
    engine: Arc<SyncEngine>,
    rate_limits: Arc<RateLimitManager>,
    health: Arc<HealthTracker>,
    sources: RwLock<Vec<String>>,
    polling: PollingSchedule,
    transient_retry: Duration,
    last_good: Mutex<HashMap<String, Vec<Event>>>,
    next_due: Mutex<HashMap<String, DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl SyncCoordinator {
    pub fn new(
        engine: Arc<SyncEngine>,
        rate_limits: Arc<RateLimitManager>,
        health: Arc<HealthTracker>,
        sources: Vec<String>,
    ) -> Self {
        Self {
            engine,
            rate_limits,
            health,
            sources: RwLock::new(sources),
            polling: PollingSchedule::default(),
            transient_retry: Duration::from_secs(5),
            last_good: Mutex::new(HashMap::new()),
            next_due: Mutex::new(HashMap::new()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_polling(mut self, polling: PollingSchedule) -> Self {
        self.polling = polling;
        self
    }

    pub fn with_transient_retry(mut self, delay: Duration) -> Self {
        self.transient_retry = delay;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn rate_limits(&self) -> &Arc<RateLimitManager> {
        &self.rate_limits
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn sources(&self) -> Vec<String> {
        self.sources.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_sources(&self, sources: Vec<String>) {
        match self.sources.write() {
            Ok(mut guard) => *guard = sources,
            Err(poisoned) => *poisoned.into_inner() = sources,
        }
    }

    fn last_good(&self) -> MutexGuard<'_, HashMap<String, Vec<Event>>> {
        self.last_good.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_due(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.next_due.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed the last good sets from the event cache so alerts survive a
    /// restart while sources are unreachable.
    pub async fn prime_from_cache(&self) -> usize {
        let mut primed = 0;
        for source_id in self.sources() {
            match self.engine.cached_eligible(&source_id).await {
                Ok(events) if !events.is_empty() => {
                    primed += events.len();
                    self.last_good().entry(source_id).or_insert(events);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(source_id = %source_id, error = %e, "failed to read event cache")
                }
            }
        }
        primed
    }

    /// Sync every enabled source that is not backing off, ignoring poll
    /// schedules.
    pub async fn sync_all(&self) -> SyncRound {
        self.round(true).await
    }

    /// Sync only the sources whose poll time has come.
    pub async fn sync_due(&self) -> SyncRound {
        self.round(false).await
    }

    async fn round(&self, force: bool) -> SyncRound {
        let now = self.clock.now();
        let mut round = SyncRound::default();
        let mut tasks = JoinSet::new();

        for source_id in self.sources() {
            if self.health.is_disabled(&source_id) {
                round.skipped.push((source_id, SkipReason::Disabled));
                continue;
            }
            if self.rate_limits.should_skip(&source_id) {
                let until = self.rate_limits.backoff_until(&source_id).unwrap_or(now);
                round.skipped.push((source_id, SkipReason::BackingOff { until }));
                continue;
            }
            let due = self.next_due().get(&source_id).copied();
            match due {
                Some(due) if !force && due > now => {
                    round.skipped.push((source_id, SkipReason::NotDue { due }));
                    continue;
                }
                _ => {}
            }

            let engine = Arc::clone(&self.engine);
            let retry_delay = self.transient_retry;
            tasks.spawn(async move {
                let outcome = sync_with_retry(&engine, &source_id, retry_delay).await;
                (source_id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((source_id, (Ok(result), _))) => {
                    self.rate_limits.clear_backoff(&source_id);
                    self.health.mark_success(&source_id);
                    self.last_good().insert(source_id, result.eligible.clone());
                    round.successes.push(result);
                }
                Ok((source_id, (Err(error), retried))) => {
                    self.record_failure(&source_id, &error);
                    round.failures.push(SourceFailure {
                        source_id,
                        error,
                        retried,
                    });
                }
                Err(e) => tracing::warn!(error = %e, "sync task panicked or was cancelled"),
            }
        }
        round.successes.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        round.failures.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        round.events = self.combined_events();
        let now = self.clock.now();
        let interval = polling_interval_for(&round.events, now);
        round.interval = Some(interval);
        self.schedule_next_polls(&round, interval, now);
        round.next_poll = self.next_poll_delay(now);

        tracing::info!(
            synced = round.successes.len(),
            failed = round.failures.len(),
            skipped = round.skipped.len(),
            events = round.events.len(),
            next_poll_secs = round.next_poll.as_secs(),
            "sync round complete"
        );
        round
    }

    fn record_failure(&self, source_id: &str, error: &SyncError) {
        match error.category() {
            ErrorCategory::RateLimit => {
                let hint = error.source_error().and_then(|e| e.retry_after());
                self.rate_limits.handle_rate_limit(source_id, hint);
            }
            ErrorCategory::Authentication => {
                tracing::warn!(source_id, "source needs re-authentication");
            }
            _ => {}
        }
        if !matches!(error, SyncError::SyncInProgress(_)) {
            self.health.mark_failure(source_id, &error.to_string());
        }
        tracing::warn!(source_id, error = %error, "source sync failed");
    }

    /// Eligible events of every enabled source, ordered by start.
    pub fn combined_events(&self) -> Vec<Event> {
        let last_good = self.last_good();
        let mut events: Vec<Event> = self
            .sources()
            .iter()
            .filter(|id| !self.health.is_disabled(id))
            .filter_map(|id| last_good.get(id))
            .flatten()
            .cloned()
            .collect();
        events.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.key().cmp(&b.key())));
        events
    }

    fn schedule_next_polls(
        &self,
        round: &SyncRound,
        interval: PollingInterval,
        now: DateTime<Utc>,
    ) {
        let base = self.polling.delay(interval);
        let attempted = round
            .successes
            .iter()
            .map(|r| r.source_id.as_str())
            .chain(round.failures.iter().map(|f| f.source_id.as_str()));

        let mut next_due = self.next_due();
        for source_id in attempted {
            let Some(multiplier) = self.health.polling_multiplier(source_id) else {
                continue;
            };
            let delay = chrono::Duration::from_std(base * multiplier)
                .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
            next_due.insert(source_id.to_string(), now + delay);
        }
    }

    /// Time until the earliest enabled source is due (or leaves backoff).
    fn next_poll_delay(&self, now: DateTime<Utc>) -> Duration {
        let next_due = self.next_due();
        let wake = self
            .sources()
            .iter()
            .filter(|id| !self.health.is_disabled(id))
            .map(|id| {
                let due = next_due.get(id).copied().unwrap_or(now);
                match self.rate_limits.backoff_until(id) {
                    Some(until) if until > due => until,
                    _ => due,
                }
            })
            .min();

        match wake {
            Some(at) => (at - now).to_std().unwrap_or_default().max(MIN_POLL_DELAY),
            None => self.polling.idle,
        }
    }
}

/// One sync, retried once after `delay` when the failure is transient.
async fn sync_with_retry(
    engine: &SyncEngine,
    source_id: &str,
    delay: Duration,
) -> (Result<SyncResult, SyncError>, bool) {
    match engine.sync(source_id).await {
        Err(error)
            if error.category() == ErrorCategory::Transient
                && !matches!(error, SyncError::SyncInProgress(_)) =>
        {
            tracing::debug!(source_id, error = %error, "transient failure; retrying once");
            tokio::time::sleep(delay).await;
            (engine.sync(source_id).await, true)
        }
        other => (other, false),
    }
}
