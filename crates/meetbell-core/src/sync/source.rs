//! Event source adapters.
//!
//! The transport behind a source (HTTP, auth, paging) lives outside the
//! core; the sync engine only sees [`EventSource`].

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::types::{FetchResult, FetchWindow};
use crate::calendar::Event;
use crate::error::SourceError;

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch events for one source.
    ///
    /// With a cursor the result is incremental (changes since the cursor,
    /// plus events that entered `window` since the cursor was issued).
    /// Without one it is a full listing of `window`.
    async fn fetch(
        &self,
        source_id: &str,
        cursor: Option<&str>,
        window: Option<FetchWindow>,
    ) -> Result<FetchResult, SourceError>;
}

const CURSOR_PREFIX: &str = "mtime";
const OPEN_END: &str = "open";

/// Decoded file cursor: the file stamp it was issued for and how far ahead
/// the events it covers reach (`None` when the listing was unbounded).
struct FileCursor<'a> {
    stamp: &'a str,
    covered_until: Option<DateTime<Utc>>,
}

impl<'a> FileCursor<'a> {
    fn parse(cursor: &'a str) -> Option<Self> {
        if !cursor.starts_with(CURSOR_PREFIX) {
            return None;
        }
        let (stamp, end) = cursor.rsplit_once(':')?;
        let covered_until = match end {
            OPEN_END => None,
            millis => Some(DateTime::from_timestamp_millis(millis.parse().ok()?)?),
        };
        Some(Self {
            stamp,
            covered_until,
        })
    }
}

fn encode_cursor(stamp: &str, covered_until: Option<DateTime<Utc>>) -> String {
    match covered_until {
        Some(end) => format!("{stamp}:{}", end.timestamp_millis()),
        None => format!("{stamp}:{OPEN_END}"),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SourceFile {
    Document { events: Vec<Event> },
    List(Vec<Event>),
}

impl SourceFile {
    fn into_events(self) -> Vec<Event> {
        match self {
            SourceFile::Document { events } | SourceFile::List(events) => events,
        }
    }
}

/// Reads `<dir>/<source_id>.json`.
///
/// The file holds either a JSON array of events or `{"events": [...]}`.
/// The cursor is the file's modification stamp plus the end of the window
/// already delivered. A changed file invalidates the cursor so the engine
/// falls back to a full read. For an unchanged file the increment holds only
/// the events that entered the window since the cursor was issued.
#[derive(Debug, Clone)]
pub struct FileEventSource {
    dir: PathBuf,
}

impl FileEventSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, source_id: &str) -> PathBuf {
        self.dir.join(format!("{source_id}.json"))
    }

    async fn stamp(&self, path: &Path, source_id: &str) -> Result<String, SourceError> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SourceError::SourceNotFound(source_id.to_string()),
            _ => SourceError::Network(e.to_string()),
        })?;
        let modified = metadata
            .modified()
            .map_err(|e| SourceError::Network(e.to_string()))?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Ok(format!("{CURSOR_PREFIX}:{modified}:{}", metadata.len()))
    }

    async fn read_events(&self, path: &Path, source_id: &str) -> Result<Vec<Event>, SourceError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;
        let file: SourceFile =
            serde_json::from_str(&raw).map_err(|e| SourceError::InvalidData(e.to_string()))?;
        Ok(file
            .into_events()
            .into_iter()
            .map(|mut event| {
                event.source_id = source_id.to_string();
                event
            })
            .collect())
    }
}

#[async_trait]
impl EventSource for FileEventSource {
    async fn fetch(
        &self,
        source_id: &str,
        cursor: Option<&str>,
        window: Option<FetchWindow>,
    ) -> Result<FetchResult, SourceError> {
        let path = self.path_for(source_id);
        let stamp = self.stamp(&path, source_id).await?;
        let window_end = window.map(|w| w.end);

        let Some(cursor) = cursor else {
            let events = self
                .read_events(&path, source_id)
                .await?
                .into_iter()
                .filter(|event| window.map_or(true, |w| w.contains(event)))
                .collect::<Vec<_>>();
            tracing::debug!(source_id, count = events.len(), "read event file");
            return Ok(FetchResult::new(events, Some(encode_cursor(&stamp, window_end))));
        };

        let parsed = FileCursor::parse(cursor).ok_or(SourceError::CursorInvalid)?;
        if parsed.stamp != stamp {
            return Err(SourceError::CursorInvalid);
        }
        let (Some(covered), Some(window)) = (parsed.covered_until, window) else {
            return Ok(FetchResult::new(Vec::new(), Some(cursor.to_string())));
        };
        if window.end <= covered {
            return Ok(FetchResult::new(Vec::new(), Some(cursor.to_string())));
        }

        let entered = self
            .read_events(&path, source_id)
            .await?
            .into_iter()
            .filter(|event| window.contains(event) && event.start >= covered)
            .collect::<Vec<_>>();
        tracing::debug!(source_id, count = entered.len(), "events entered the window");
        Ok(FetchResult::new(entered, Some(encode_cursor(&stamp, Some(window.end)))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn write_events(dir: &Path, source_id: &str, json: &str) {
        std::fs::write(dir.join(format!("{source_id}.json")), json).unwrap();
    }

    #[tokio::test]
    async fn full_fetch_reads_and_tags_events() {
        let dir = tempfile::tempdir().unwrap();
        let start = Utc::now() + Duration::hours(1);
        let json = serde_json::json!([{
            "id": "e1",
            "title": "Planning",
            "start": start,
            "end": start + Duration::minutes(30),
        }])
        .to_string();
        write_events(dir.path(), "work", &json);

        let source = FileEventSource::new(dir.path());
        let result = source.fetch("work", None, None).await.unwrap();
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].source_id, "work");
        assert_eq!(result.events[0].key(), "work::e1");
        assert!(result.next_cursor.is_some());
    }

    #[tokio::test]
    async fn window_filters_events() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        write_events(dir.path(), "work", &soon_and_far(now));

        let source = FileEventSource::new(dir.path());
        let window = FetchWindow::forward(now, Duration::hours(24));
        let result = source.fetch("work", None, Some(window)).await.unwrap();
        let ids: Vec<&str> = result.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["soon"]);
    }

    fn soon_and_far(now: DateTime<Utc>) -> String {
        let event = |id: &str, hours: i64| {
            serde_json::json!({
                "id": id,
                "title": id,
                "start": now + Duration::hours(hours),
                "end": now + Duration::hours(hours + 1),
            })
        };
        serde_json::json!({"events": [event("soon", 1), event("far", 30)]}).to_string()
    }

    #[tokio::test]
    async fn unchanged_file_delivers_events_entering_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        write_events(dir.path(), "work", &soon_and_far(now));
        let source = FileEventSource::new(dir.path());

        let first_window = FetchWindow::forward(now, Duration::hours(24));
        let first = source.fetch("work", None, Some(first_window)).await.unwrap();
        assert_eq!(first.events.len(), 1);
        let cursor = first.next_cursor.unwrap();

        // Same horizon: nothing new.
        let same = source
            .fetch("work", Some(&cursor), Some(first_window))
            .await
            .unwrap();
        assert!(same.events.is_empty());
        assert_eq!(same.next_cursor.as_deref(), Some(cursor.as_str()));

        // Horizon moved past the far event.
        let later = FetchWindow::forward(now + Duration::hours(10), Duration::hours(24));
        let moved = source
            .fetch("work", Some(&cursor), Some(later))
            .await
            .unwrap();
        let ids: Vec<&str> = moved.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["far"]);
        let advanced = moved.next_cursor.unwrap();
        assert_ne!(advanced, cursor);

        let again = source
            .fetch("work", Some(&advanced), Some(later))
            .await
            .unwrap();
        assert!(again.events.is_empty());
    }

    #[tokio::test]
    async fn changed_file_invalidates_cursor() {
        let dir = tempfile::tempdir().unwrap();
        write_events(dir.path(), "work", "[]");
        let source = FileEventSource::new(dir.path());
        let cursor = source
            .fetch("work", None, None)
            .await
            .unwrap()
            .next_cursor
            .unwrap();

        write_events(dir.path(), "work", &soon_and_far(Utc::now()));
        assert_eq!(
            source.fetch("work", Some(&cursor), None).await,
            Err(SourceError::CursorInvalid)
        );
    }

    #[tokio::test]
    async fn unchanged_file_gives_empty_increment() {
        let dir = tempfile::tempdir().unwrap();
        write_events(dir.path(), "work", "[]");
        let source = FileEventSource::new(dir.path());

        let first = source.fetch("work", None, None).await.unwrap();
        let cursor = first.next_cursor.unwrap();
        let second = source.fetch("work", Some(&cursor), None).await.unwrap();
        assert!(second.events.is_empty());
        assert_eq!(second.next_cursor.as_deref(), Some(cursor.as_str()));
    }

    #[tokio::test]
    async fn foreign_cursor_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        write_events(dir.path(), "work", "[]");
        let source = FileEventSource::new(dir.path());
        assert_eq!(
            source.fetch("work", Some("page-token-42"), None).await,
            Err(SourceError::CursorInvalid)
        );
    }

    #[tokio::test]
    async fn missing_file_is_source_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileEventSource::new(dir.path());
        assert_eq!(
            source.fetch("nope", None, None).await,
            Err(SourceError::SourceNotFound("nope".into()))
        );
    }

    #[tokio::test]
    async fn malformed_file_is_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        write_events(dir.path(), "work", "{not json");
        let source = FileEventSource::new(dir.path());
        assert!(matches!(
            source.fetch("work", None, None).await,
            Err(SourceError::InvalidData(_))
        ));
    }
}
