//! Persistence collaborators.
//!
//! The engines only see the async traits below. [`SqliteStore`] backs all
//! four with one database file; [`MemoryStore`] keeps everything in memory.

mod config;
pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use config::{AlertConfig, Config, RateLimitConfig, SyncConfig};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::alert::AlertSnapshot;
use crate::calendar::Event;
use crate::error::StoreError;

/// Last fetched events per source.
#[async_trait]
pub trait EventCache: Send + Sync {
    async fn save_events(&self, source_id: &str, events: &[Event]) -> Result<(), StoreError>;
    async fn load_events(&self, source_id: &str) -> Result<Vec<Event>, StoreError>;
}

/// Resumption cursors per source.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get_cursor(&self, source_id: &str) -> Result<Option<String>, StoreError>;
    async fn set_cursor(&self, source_id: &str, cursor: &str) -> Result<(), StoreError>;
    async fn clear_cursor(&self, source_id: &str) -> Result<(), StoreError>;
}

/// The alert engine's scheduled alerts and acknowledged set.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn save_alerts(&self, snapshot: &AlertSnapshot) -> Result<(), StoreError>;
    async fn load_alerts(&self) -> Result<Option<AlertSnapshot>, StoreError>;
}

/// Sources the user switched off.
#[async_trait]
pub trait DisabledSourceStore: Send + Sync {
    async fn load_disabled(&self) -> Result<HashSet<String>, StoreError>;
    async fn save_disabled(&self, source_ids: &HashSet<String>) -> Result<(), StoreError>;
}

/// Returns `~/.config/meetbell[-dev]/` based on MEETBELL_ENV.
///
/// Set MEETBELL_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("MEETBELL_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("meetbell-dev")
    } else {
        base_dir.join("meetbell")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
