//! Per-source sync: incremental fetch with cursor fallback, cache merge and
//! eligibility filtering.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock, Weak};

use chrono::{DateTime, Duration, Utc};

use super::source::EventSource;
use super::types::{polling_interval_for, FetchResult, FetchWindow, PollingInterval, SyncResult};
use crate::calendar::{EligibilityFilter, Event};
use crate::clock::{Clock, SystemClock};
use crate::error::{SourceError, SyncError};
use crate::storage::{CursorStore, EventCache};

/// Default forward window for full fetches.
pub const DEFAULT_FETCH_WINDOW_HOURS: i64 = 24;

/// Receives the outcome of every sync call.
pub trait SyncDelegate: Send + Sync {
    fn sync_succeeded(&self, result: &SyncResult);
    fn sync_failed(&self, source_id: &str, error: &SyncError);
}

/// Removes a source from the in-flight set when dropped.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    source_id: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<String>>, source_id: &str) -> Result<Self, SyncError> {
        let mut set = in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(source_id.to_string()) {
            return Err(SyncError::SyncInProgress(source_id.to_string()));
        }
        Ok(Self {
            in_flight,
            source_id: source_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.source_id);
    }
}

/// Sync engine for one event source backend.
pub struct SyncEngine {
    source: Arc<dyn EventSource>,
    cache: Arc<dyn EventCache>,
    cursors: Arc<dyn CursorStore>,
    filter: RwLock<EligibilityFilter>,
    window: Duration,
    in_flight: Mutex<HashSet<String>>,
    delegate: Mutex<Option<Weak<dyn SyncDelegate>>>,
    clock: Arc<dyn Clock>,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn EventSource>,
        cache: Arc<dyn EventCache>,
        cursors: Arc<dyn CursorStore>,
    ) -> Self {
        Self {
            source,
            cache,
            cursors,
            filter: RwLock::new(EligibilityFilter::default()),
            window: Duration::hours(DEFAULT_FETCH_WINDOW_HOURS),
            in_flight: Mutex::new(HashSet::new()),
            delegate: Mutex::new(None),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_filter(self, filter: EligibilityFilter) -> Self {
        self.set_filter(filter);
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn set_filter(&self, filter: EligibilityFilter) {
        match self.filter.write() {
            Ok(mut guard) => *guard = filter,
            Err(poisoned) => *poisoned.into_inner() = filter,
        }
    }

    /// Register the delegate. The engine holds it weakly.
    pub fn set_delegate(&self, delegate: &Arc<dyn SyncDelegate>) {
        let mut slot = self.delegate.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::downgrade(delegate));
    }

    fn delegate(&self) -> Option<Arc<dyn SyncDelegate>> {
        self.delegate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub fn is_syncing(&self, source_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(source_id)
    }

    /// Apply the current eligibility filter.
    pub fn filter_events(&self, events: &[Event]) -> Vec<Event> {
        let filter = self.filter.read().unwrap_or_else(|e| e.into_inner());
        filter.apply(events)
    }

    /// Cached events for a source, filtered. Used to seed alerts before the
    /// first successful fetch.
    pub async fn cached_eligible(&self, source_id: &str) -> Result<Vec<Event>, SyncError> {
        let now = self.clock.now();
        let mut events = self.cache.load_events(source_id).await?;
        events.retain(|e| e.end > now);
        Ok(self.filter_events(&events))
    }

    /// Polling tier from the nearest upcoming event.
    pub fn next_polling_interval(&self, events: &[Event]) -> PollingInterval {
        polling_interval_for(events, self.clock.now())
    }

    /// Sync one source.
    ///
    /// # Errors
    /// - [`SyncError::SyncInProgress`] when a sync for the same source is
    ///   already running
    /// - [`SyncError::Source`] when the fetch fails (a cursor invalidated
    ///   twice in one call is terminal)
    /// - [`SyncError::Store`] when the cursor or cache cannot be read
    pub async fn sync(&self, source_id: &str) -> Result<SyncResult, SyncError> {
        let _guard = InFlightGuard::acquire(&self.in_flight, source_id)?;

        let result = self.sync_inner(source_id).await;
        if let Some(delegate) = self.delegate() {
            match &result {
                Ok(r) => delegate.sync_succeeded(r),
                Err(e) => delegate.sync_failed(source_id, e),
            }
        }
        result
    }

    async fn sync_inner(&self, source_id: &str) -> Result<SyncResult, SyncError> {
        let cursor = self.cursors.get_cursor(source_id).await?;

        let (fetched, was_full_sync) = match cursor {
            Some(cursor) => match self
                .source
                .fetch(source_id, Some(&cursor), Some(self.current_window()))
                .await
            {
                Ok(result) => (result, false),
                Err(SourceError::CursorInvalid) => {
                    tracing::info!(source_id, "cursor invalidated; falling back to full sync");
                    if let Err(e) = self.cursors.clear_cursor(source_id).await {
                        tracing::warn!(source_id, error = %e, "failed to clear cursor");
                    }
                    (self.fetch_full(source_id).await?, true)
                }
                Err(error) => return Err(source_failure(source_id, error)),
            },
            None => (self.fetch_full(source_id).await?, true),
        };

        let now = self.clock.now();
        let previous = if was_full_sync {
            Vec::new()
        } else {
            self.cache.load_events(source_id).await?
        };
        let events = merge_events(previous, &fetched, source_id, now);

        if let Err(e) = self.cache.save_events(source_id, &events).await {
            tracing::warn!(source_id, error = %e, "failed to cache events");
        }
        let next_cursor_stored = match &fetched.next_cursor {
            Some(cursor) => match self.cursors.set_cursor(source_id, cursor).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(source_id, error = %e, "failed to store cursor");
                    false
                }
            },
            None => false,
        };

        let eligible = self.filter_events(&events);
        tracing::debug!(
            source_id,
            was_full_sync,
            total = events.len(),
            eligible = eligible.len(),
            "sync complete"
        );
        Ok(SyncResult {
            source_id: source_id.to_string(),
            events,
            eligible,
            was_full_sync,
            next_cursor_stored,
        })
    }

    fn current_window(&self) -> FetchWindow {
        FetchWindow::forward(self.clock.now(), self.window)
    }

    async fn fetch_full(&self, source_id: &str) -> Result<FetchResult, SyncError> {
        self.source
            .fetch(source_id, None, Some(self.current_window()))
            .await
            .map_err(|error| source_failure(source_id, error))
    }
}

fn source_failure(source_id: &str, error: SourceError) -> SyncError {
    SyncError::Source {
        source_id: source_id.to_string(),
        error,
    }
}

/// Merge a fetch into the cached set: deleted and updated ids are replaced,
/// events that already ended are dropped. Output is ordered by start.
pub fn merge_events(
    previous: Vec<Event>,
    fetched: &FetchResult,
    source_id: &str,
    now: DateTime<Utc>,
) -> Vec<Event> {
    let replaced: HashSet<&str> = fetched
        .deleted_ids
        .iter()
        .map(String::as_str)
        .chain(fetched.events.iter().map(|e| e.id.as_str()))
        .collect();

    let mut merged: Vec<Event> = previous
        .into_iter()
        .filter(|e| !replaced.contains(e.id.as_str()))
        .chain(fetched.events.iter().cloned().map(|mut e| {
            e.source_id = source_id.to_string();
            e
        }))
        .filter(|e| e.end > now)
        .collect();
    merged.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
    merged
}
