//! Calendar synchronization and resilience.
//!
//! Feeds the alert engine with events from any number of sources while
//! tolerating rate limits, cursor invalidation and partial outages.

pub mod coordinator;
pub mod health;
pub mod rate_limit;
pub mod source;
pub mod sync_engine;
pub mod types;

#[cfg(test)]
mod types_tests;

pub use coordinator::{SkipReason, SourceFailure, SyncCoordinator, SyncRound};
pub use health::{HealthDelegate, HealthState, HealthTracker, SourceHealth, FAILURE_THRESHOLD};
pub use rate_limit::{BackoffState, RateLimitManager};
pub use source::{EventSource, FileEventSource};
pub use sync_engine::{merge_events, SyncDelegate, SyncEngine};
pub use types::{
    calculate_polling_interval, polling_interval_for, FetchResult, FetchWindow, PollingInterval,
    PollingSchedule, SyncResult,
};
