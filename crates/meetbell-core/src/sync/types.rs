//! Core types for calendar synchronization.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::Event;

/// Time range for a full fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    /// Window starting at `now` and extending `length` forward.
    pub fn forward(now: DateTime<Utc>, length: chrono::Duration) -> Self {
        Self {
            start: now,
            end: now + length,
        }
    }

    pub fn contains(&self, event: &Event) -> bool {
        event.end > self.start && event.start < self.end
    }
}

/// What one fetch returned.
///
/// A full fetch lists every event in the window and no deletions. An
/// incremental fetch lists changed events plus the ids of deleted ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub events: Vec<Event>,
    #[serde(default)]
    pub deleted_ids: Vec<String>,
    /// Cursor for the next incremental fetch.
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl FetchResult {
    pub fn new(events: Vec<Event>, next_cursor: Option<String>) -> Self {
        Self {
            events,
            deleted_ids: Vec::new(),
            next_cursor,
        }
    }

    pub fn with_deleted(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.deleted_ids.extend(ids.into_iter().map(Into::into));
        self
    }
}

/// Outcome of one successful source sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub source_id: String,
    /// Every cached event for the source after the merge.
    pub events: Vec<Event>,
    /// `events` after the eligibility filter.
    pub eligible: Vec<Event>,
    pub was_full_sync: bool,
    pub next_cursor_stored: bool,
}

/// Polling tier, chosen from the time until the nearest upcoming event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollingInterval {
    /// Next event within 10 minutes.
    Imminent,
    /// Next event within the hour.
    Upcoming,
    /// Nothing within the hour.
    Idle,
}

pub const IMMINENT_THRESHOLD_SECS: i64 = 600;
pub const UPCOMING_THRESHOLD_SECS: i64 = 3600;

/// Choose a polling tier from the time until the next event (`None` when
/// nothing is upcoming). Both thresholds are inclusive.
pub fn calculate_polling_interval(until_next: Option<chrono::Duration>) -> PollingInterval {
    match until_next.map(|d| d.num_seconds()) {
        Some(secs) if secs <= IMMINENT_THRESHOLD_SECS => PollingInterval::Imminent,
        Some(secs) if secs <= UPCOMING_THRESHOLD_SECS => PollingInterval::Upcoming,
        _ => PollingInterval::Idle,
    }
}

/// Polling tier for a set of events.
pub fn polling_interval_for(events: &[Event], now: DateTime<Utc>) -> PollingInterval {
    let next = crate::calendar::next_upcoming(events, now);
    calculate_polling_interval(next.map(|e| e.start - now))
}

/// Base delay for each polling tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingSchedule {
    pub imminent: Duration,
    pub upcoming: Duration,
    pub idle: Duration,
}

impl PollingSchedule {
    pub fn delay(&self, interval: PollingInterval) -> Duration {
        match interval {
            PollingInterval::Imminent => self.imminent,
            PollingInterval::Upcoming => self.upcoming,
            PollingInterval::Idle => self.idle,
        }
    }
}

impl Default for PollingSchedule {
    fn default() -> Self {
        Self {
            imminent: Duration::from_secs(60),
            upcoming: Duration::from_secs(300),
            idle: Duration::from_secs(900),
        }
    }
}
