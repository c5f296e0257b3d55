//! # meetbell Core Library
//!
//! Scheduling core for meeting reminders. It keeps calendar events fresh
//! from any number of sources and turns them into two-stage reminders that
//! fire on time across sleep, restarts, clock changes and partial source
//! outages. The `meetbell` CLI is a thin layer over this crate.
//!
//! ## Architecture
//!
//! - **Sync**: per-source incremental fetch with cursor fallback, backoff
//!   after rate limits, health tracking, multi-source rounds
//! - **Alerts**: persisted, timer-backed reminders with snooze,
//!   acknowledgment, reconciliation and missed-alert recovery
//! - **Calendar**: event model and pure helpers (eligibility, conflicts,
//!   back-to-back detection)
//! - **Storage**: SQLite persistence and TOML configuration
//!
//! ## Key Components
//!
//! - [`AlertEngine`]: alert state machine
//! - [`SyncCoordinator`]: multi-source sync rounds
//! - [`ReminderService`]: the long-running loop tying both together
//! - [`Config`]: application configuration management

pub mod alert;
pub mod calendar;
pub mod clock;
pub mod error;
pub mod service;
pub mod storage;
pub mod sync;

pub use alert::{
    AlertDelivery, AlertEngine, AlertOffsets, AlertScheduler, AlertStage, ScheduledAlert,
    TokioScheduler,
};
pub use calendar::{EligibilityFilter, Event, ResponseStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    AlertError, ConfigError, CoreError, ErrorCategory, SchedulerError, SourceError, StoreError,
    SyncError,
};
pub use service::ReminderService;
pub use storage::{Config, MemoryStore, SqliteStore};
pub use sync::{
    EventSource, FileEventSource, HealthTracker, RateLimitManager, SyncCoordinator, SyncEngine,
};
