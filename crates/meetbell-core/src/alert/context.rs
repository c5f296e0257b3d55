//! Back-to-back context for stage-1 downgrades.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::types::ScheduledAlert;
use crate::calendar::{current_meeting, is_back_to_back, Event};
use crate::clock::{Clock, SystemClock};

/// What the user is doing when an alert fires.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeetingContext {
    pub is_in_meeting: bool,
    /// The alert's meeting follows the current one back-to-back.
    pub is_back_to_back_situation: bool,
    pub current_meeting: Option<Event>,
}

#[async_trait]
pub trait MeetingContextProvider: Send + Sync {
    async fn context_for(&self, alert: &ScheduledAlert) -> MeetingContext;
}

/// Always reports "not in a meeting".
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContext;

#[async_trait]
impl MeetingContextProvider for NoContext {
    async fn context_for(&self, _alert: &ScheduledAlert) -> MeetingContext {
        MeetingContext::default()
    }
}

/// Derives meeting context from the latest synced events.
pub struct CalendarContextProvider {
    events: RwLock<Vec<Event>>,
    clock: Arc<dyn Clock>,
}

impl CalendarContextProvider {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            clock,
        }
    }

    /// Replace the known events after a sync round.
    pub fn update(&self, events: Vec<Event>) {
        match self.events.write() {
            Ok(mut guard) => *guard = events,
            Err(poisoned) => *poisoned.into_inner() = events,
        }
    }

    fn context_at(&self, alert: &ScheduledAlert) -> MeetingContext {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        let others: Vec<Event> = events
            .iter()
            .filter(|e| e.key() != alert.event_key)
            .cloned()
            .collect();
        let Some(current) = current_meeting(&others, self.clock.now()) else {
            return MeetingContext::default();
        };
        MeetingContext {
            is_in_meeting: true,
            is_back_to_back_situation: is_back_to_back(current, alert.event_start),
            current_meeting: Some(current.clone()),
        }
    }
}

impl Default for CalendarContextProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MeetingContextProvider for CalendarContextProvider {
    async fn context_for(&self, alert: &ScheduledAlert) -> MeetingContext {
        self.context_at(alert)
    }
}
