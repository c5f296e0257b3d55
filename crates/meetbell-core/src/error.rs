//! Core error types for meetbell-core.
//!
//! This module defines the error hierarchy using thiserror. Each layer has
//! its own enum ([`SourceError`] for the calendar transport, [`SyncError`]
//! for the sync engine, [`AlertError`] for user-facing alert operations,
//! [`StoreError`] for persistence, [`ConfigError`] for configuration) and
//! [`CoreError`] wraps them all for callers that only need one type.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for meetbell-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Sync-related errors
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Alert operation errors
    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of a failure, used to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Needs user action upstream; never retried automatically.
    Authentication,
    /// Retried after the rate-limit manager's backoff.
    RateLimit,
    /// Network or timeout; retried after a short delay.
    Transient,
    /// Handled by a transparent full resync.
    CursorInvalid,
    /// Server-side or configuration failure; counted against health.
    Permanent,
}

/// Failures reported by an event source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Authentication required")]
    AuthRequired,

    #[error("Rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Resumption cursor is no longer valid")]
    CursorInvalid,

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Server error: HTTP {code}")]
    Server { code: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Malformed source data: {0}")]
    InvalidData(String),
}

impl SourceError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SourceError::AuthRequired => ErrorCategory::Authentication,
            SourceError::RateLimited { .. } => ErrorCategory::RateLimit,
            SourceError::CursorInvalid => ErrorCategory::CursorInvalid,
            SourceError::Network(_) | SourceError::Timeout => ErrorCategory::Transient,
            SourceError::SourceNotFound(_)
            | SourceError::Server { .. }
            | SourceError::InvalidData(_) => ErrorCategory::Permanent,
        }
    }

    /// Retry hint in seconds carried by a rate-limit response.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            SourceError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Sync engine errors.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync already in progress for source '{0}'")]
    SyncInProgress(String),

    #[error("Source '{source_id}' failed: {error}")]
    Source {
        source_id: String,
        #[source]
        error: SourceError,
    },

    #[error("Storage failed during sync: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// The underlying source failure, if this error came from a fetch.
    pub fn source_error(&self) -> Option<&SourceError> {
        match self {
            SyncError::Source { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Source { error, .. } => error.category(),
            SyncError::SyncInProgress(_) => ErrorCategory::Transient,
            SyncError::Store(_) => ErrorCategory::Permanent,
        }
    }
}

/// User-facing alert operation errors. The operation is rejected and the
/// alert set is left unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlertError {
    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    #[error("Meeting has already started")]
    MeetingAlreadyStarted,

    #[error("Snooze would end after the meeting starts")]
    SnoozePastMeetingStart,
}

/// Timer registration errors. Logged by the alert engine, never surfaced.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("No async runtime available to arm timers")]
    RuntimeUnavailable,

    #[error("Timer registration failed: {0}")]
    Registration(String),
}

/// Persistence errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot written by a newer build.
    #[error("Unsupported format version {found} (newest supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_categories() {
        assert_eq!(SourceError::AuthRequired.category(), ErrorCategory::Authentication);
        assert_eq!(
            SourceError::RateLimited { retry_after_secs: Some(30) }.category(),
            ErrorCategory::RateLimit
        );
        assert_eq!(SourceError::Timeout.category(), ErrorCategory::Transient);
        assert_eq!(
            SourceError::Network("reset".into()).category(),
            ErrorCategory::Transient
        );
        assert_eq!(SourceError::Server { code: 503 }.category(), ErrorCategory::Permanent);
        assert_eq!(SourceError::CursorInvalid.category(), ErrorCategory::CursorInvalid);
    }

    #[test]
    fn retry_after_only_on_rate_limit() {
        assert_eq!(
            SourceError::RateLimited { retry_after_secs: Some(12) }.retry_after(),
            Some(12)
        );
        assert_eq!(SourceError::Timeout.retry_after(), None);
    }

    #[test]
    fn sync_error_exposes_source_error() {
        let err = SyncError::Source {
            source_id: "work".into(),
            error: SourceError::Timeout,
        };
        assert_eq!(err.source_error(), Some(&SourceError::Timeout));
        assert_eq!(err.category(), ErrorCategory::Transient);
        assert!(err.to_string().contains("work"));
    }
}
