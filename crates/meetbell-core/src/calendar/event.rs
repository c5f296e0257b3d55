//! Calendar event model.
//!
//! Events are immutable values owned by the sync engine. Every sync
//! replaces a source's events wholesale; nothing mutates one in place.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Separator between source id and event id in an event key.
pub const KEY_SEPARATOR: &str = "::";

/// The user's reply to an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Accepted,
    Tentative,
    Declined,
    NeedsAction,
    #[default]
    None,
}

/// A calendar event as fetched from a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Source this event came from. Filled in by the sync engine.
    #[serde(default)]
    pub source_id: String,
    /// Identifier within the source.
    pub id: String,
    pub title: String,
    /// Calendar within the source (used for calendar enablement).
    #[serde(default)]
    pub calendar_id: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default)]
    pub meeting_links: Vec<String>,
    #[serde(default)]
    pub is_organizer: bool,
    #[serde(default)]
    pub attendee_count: u32,
    #[serde(default)]
    pub response_status: ResponseStatus,
    #[serde(default)]
    pub location: Option<String>,
}

impl Event {
    pub fn new(
        source_id: impl Into<String>,
        id: impl Into<String>,
        title: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            id: id.into(),
            title: title.into(),
            calendar_id: None,
            start,
            end,
            is_all_day: false,
            meeting_links: Vec::new(),
            is_organizer: false,
            attendee_count: 0,
            response_status: ResponseStatus::None,
            location: None,
        }
    }

    /// Globally unique identity: `sourceId::eventId`.
    pub fn key(&self) -> String {
        format!("{}{}{}", self.source_id, KEY_SEPARATOR, self.id)
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Whether the event is in progress at `now`.
    pub fn is_in_progress(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }

    /// Check if this event overlaps with a time range.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && self.end > start
    }

    pub fn primary_meeting_link(&self) -> Option<&str> {
        self.meeting_links.first().map(String::as_str)
    }

    pub fn with_calendar(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = Some(calendar_id.into());
        self
    }

    pub fn with_meeting_link(mut self, url: impl Into<String>) -> Self {
        self.meeting_links.push(url.into());
        self
    }

    pub fn with_response(mut self, status: ResponseStatus) -> Self {
        self.response_status = status;
        self
    }

    pub fn all_day(mut self) -> Self {
        self.is_all_day = true;
        self
    }
}

/// The earliest event starting strictly after `now`.
pub fn next_upcoming(events: &[Event], now: DateTime<Utc>) -> Option<&Event> {
    events
        .iter()
        .filter(|e| !e.is_all_day && e.start > now)
        .min_by_key(|e| e.start)
}
