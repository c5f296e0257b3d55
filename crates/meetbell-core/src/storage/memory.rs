//! In-memory store, for tests and ephemeral runs.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{AlertStore, CursorStore, DisabledSourceStore, EventCache};
use crate::alert::AlertSnapshot;
use crate::calendar::Event;
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Inner {
    events: HashMap<String, Vec<Event>>,
    cursors: HashMap<String, String>,
    alerts: Option<AlertSnapshot>,
    disabled: HashSet<String>,
    fail_writes: bool,
    alert_saves: usize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    fn writable(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let inner = self.lock()?;
        if inner.fail_writes {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "writes disabled",
            )));
        }
        Ok(inner)
    }

    /// Make every subsequent write fail with an IO error.
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut inner) = self.lock() {
            inner.fail_writes = fail;
        }
    }

    /// Number of successful alert snapshot writes so far.
    pub fn alert_save_count(&self) -> usize {
        self.lock().map(|i| i.alert_saves).unwrap_or(0)
    }
}

#[async_trait]
impl EventCache for MemoryStore {
    async fn save_events(&self, source_id: &str, events: &[Event]) -> Result<(), StoreError> {
        self.writable()?
            .events
            .insert(source_id.to_string(), events.to_vec());
        Ok(())
    }

    async fn load_events(&self, source_id: &str) -> Result<Vec<Event>, StoreError> {
        Ok(self.lock()?.events.get(source_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn get_cursor(&self, source_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.cursors.get(source_id).cloned())
    }

    async fn set_cursor(&self, source_id: &str, cursor: &str) -> Result<(), StoreError> {
        self.writable()?
            .cursors
            .insert(source_id.to_string(), cursor.to_string());
        Ok(())
    }

    async fn clear_cursor(&self, source_id: &str) -> Result<(), StoreError> {
        self.writable()?.cursors.remove(source_id);
        Ok(())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn save_alerts(&self, snapshot: &AlertSnapshot) -> Result<(), StoreError> {
        let mut inner = self.writable()?;
        inner.alerts = Some(snapshot.clone());
        inner.alert_saves += 1;
        Ok(())
    }

    async fn load_alerts(&self) -> Result<Option<AlertSnapshot>, StoreError> {
        Ok(self.lock()?.alerts.clone())
    }
}

#[async_trait]
impl DisabledSourceStore for MemoryStore {
    async fn load_disabled(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self.lock()?.disabled.clone())
    }

    async fn save_disabled(&self, source_ids: &HashSet<String>) -> Result<(), StoreError> {
        self.writable()?.disabled = source_ids.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failing_writes_leave_state_untouched() {
        let store = MemoryStore::new();
        store.set_cursor("work", "a").await.unwrap();
        store.set_fail_writes(true);
        assert!(store.set_cursor("work", "b").await.is_err());
        assert_eq!(store.get_cursor("work").await.unwrap().as_deref(), Some("a"));
        store.set_fail_writes(false);
        store.clear_cursor("work").await.unwrap();
        assert_eq!(store.get_cursor("work").await.unwrap(), None);
    }
}
