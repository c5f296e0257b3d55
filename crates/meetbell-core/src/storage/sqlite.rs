//! SQLite-backed store for events, cursors, alerts and disabled sources.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{data_dir, migrations, AlertStore, CursorStore, DisabledSourceStore, EventCache};
use crate::alert::AlertSnapshot;
use crate::calendar::Event;
use crate::error::StoreError;

/// SQLite database shared by every persistence collaborator.
///
/// Statements are short; they run directly on the calling task while the
/// connection mutex is held.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open the database at `~/.config/meetbell/meetbell.db`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, StoreError> {
        Self::open_at(data_dir()?.join("meetbell.db"))
    }

    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        migrations::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Source ids that have cached events.
    pub fn cached_sources(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT source_id FROM event_cache ORDER BY source_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl EventCache for SqliteStore {
    async fn save_events(&self, source_id: &str, events: &[Event]) -> Result<(), StoreError> {
        let json = serde_json::to_string(events)?;
        self.conn()?.execute(
            "INSERT INTO event_cache (source_id, events_json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(source_id) DO UPDATE SET events_json = ?2, updated_at = ?3",
            params![source_id, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn load_events(&self, source_id: &str) -> Result<Vec<Event>, StoreError> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT events_json FROM event_cache WHERE source_id = ?1",
                [source_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl CursorStore for SqliteStore {
    async fn get_cursor(&self, source_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT cursor FROM cursors WHERE source_id = ?1",
                [source_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    async fn set_cursor(&self, source_id: &str, cursor: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO cursors (source_id, cursor, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(source_id) DO UPDATE SET cursor = ?2, updated_at = ?3",
            params![source_id, cursor, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn clear_cursor(&self, source_id: &str) -> Result<(), StoreError> {
        self.conn()?
            .execute("DELETE FROM cursors WHERE source_id = ?1", [source_id])?;
        Ok(())
    }
}

#[async_trait]
impl AlertStore for SqliteStore {
    async fn save_alerts(&self, snapshot: &AlertSnapshot) -> Result<(), StoreError> {
        let json = snapshot.to_json()?;
        self.conn()?.execute(
            "INSERT INTO alert_snapshot (id, snapshot_json, saved_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET snapshot_json = ?1, saved_at = ?2",
            params![json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn load_alerts(&self) -> Result<Option<AlertSnapshot>, StoreError> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT snapshot_json FROM alert_snapshot WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| AlertSnapshot::from_json(&j)).transpose()
    }
}

#[async_trait]
impl DisabledSourceStore for SqliteStore {
    async fn load_disabled(&self) -> Result<HashSet<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT source_id FROM disabled_sources")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<HashSet<_>, _>>()?)
    }

    async fn save_disabled(&self, source_ids: &HashSet<String>) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM disabled_sources", [])?;
        let now = Utc::now().to_rfc3339();
        for id in source_ids {
            tx.execute(
                "INSERT INTO disabled_sources (source_id, disabled_at) VALUES (?1, ?2)",
                params![id, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}
