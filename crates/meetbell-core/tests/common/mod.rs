//! Shared doubles and builders for the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use meetbell_core::alert::FireCallback;
use meetbell_core::storage::{CursorStore, DisabledSourceStore, EventCache, RateLimitConfig};
use meetbell_core::sync::{FetchResult, FetchWindow, PollingSchedule};
use meetbell_core::{
    AlertScheduler, Clock, EligibilityFilter, Event, EventSource, HealthTracker, ManualClock,
    RateLimitManager, SchedulerError, SourceError, SyncCoordinator, SyncEngine,
};

pub fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub fn at(min: i64) -> DateTime<Utc> {
    base_time() + Duration::minutes(min)
}

pub fn meeting(source: &str, id: &str, start: DateTime<Utc>) -> Event {
    Event::new(source, id, format!("Meeting {id}"), start, start + Duration::minutes(30))
}

/// Event source that replays queued responses per source id. An empty
/// queue answers with an empty success.
#[derive(Default)]
pub struct ScriptedSource {
    responses: Mutex<HashMap<String, VecDeque<Result<FetchResult, SourceError>>>>,
    calls: Mutex<Vec<(String, Option<String>, Option<FetchWindow>)>>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, source_id: &str, response: Result<FetchResult, SourceError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(source_id.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn push_events(&self, source_id: &str, events: Vec<Event>) {
        self.push(source_id, Ok(FetchResult::new(events, None)));
    }

    pub fn calls_for(&self, source_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| id == source_id)
            .count()
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn fetch(
        &self,
        source_id: &str,
        cursor: Option<&str>,
        window: Option<FetchWindow>,
    ) -> Result<FetchResult, SourceError> {
        self.calls
            .lock()
            .unwrap()
            .push((source_id.to_string(), cursor.map(str::to_string), window));
        self.responses
            .lock()
            .unwrap()
            .get_mut(source_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(FetchResult::default()))
    }
}

/// Scheduler that records armed timers and never fires them.
#[derive(Default)]
pub struct RecordingScheduler {
    armed: Mutex<HashMap<String, DateTime<Utc>>>,
    cancel_all_calls: Mutex<usize>,
}

impl RecordingScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn armed_at(&self, alert_id: &str) -> Option<DateTime<Utc>> {
        self.armed.lock().unwrap().get(alert_id).copied()
    }

    pub fn armed_count(&self) -> usize {
        self.armed.lock().unwrap().len()
    }

    pub fn cancel_all_calls(&self) -> usize {
        *self.cancel_all_calls.lock().unwrap()
    }
}

#[async_trait]
impl AlertScheduler for RecordingScheduler {
    async fn schedule(
        &self,
        alert_id: &str,
        fire_at: DateTime<Utc>,
        _callback: FireCallback,
    ) -> Result<(), SchedulerError> {
        self.armed.lock().unwrap().insert(alert_id.to_string(), fire_at);
        Ok(())
    }

    async fn cancel(&self, alert_id: &str) {
        self.armed.lock().unwrap().remove(alert_id);
    }

    async fn cancel_all(&self) {
        self.armed.lock().unwrap().clear();
        *self.cancel_all_calls.lock().unwrap() += 1;
    }
}

pub trait SyncStore: EventCache + CursorStore + DisabledSourceStore {}
impl<T: EventCache + CursorStore + DisabledSourceStore> SyncStore for T {}

/// Coordinator over `source` with seeded jitter and a near-zero transient
/// retry delay.
pub fn coordinator<S>(
    source: Arc<dyn EventSource>,
    store: Arc<S>,
    clock: Arc<ManualClock>,
    sources: &[&str],
) -> Arc<SyncCoordinator>
where
    S: SyncStore + 'static,
{
    let clock_dyn: Arc<dyn Clock> = clock;
    let engine = SyncEngine::new(source, store.clone(), store.clone())
        .with_filter(EligibilityFilter::default())
        .with_clock(clock_dyn.clone());
    let rate_limits = RateLimitManager::with_clock(
        RateLimitConfig {
            seed: Some(1),
            ..Default::default()
        },
        clock_dyn.clone(),
    );
    let health = HealthTracker::new(store);
    Arc::new(
        SyncCoordinator::new(
            Arc::new(engine),
            Arc::new(rate_limits),
            Arc::new(health),
            sources.iter().map(|s| s.to_string()).collect(),
        )
        .with_polling(PollingSchedule::default())
        .with_transient_retry(StdDuration::from_millis(1))
        .with_clock(clock_dyn),
    )
}
