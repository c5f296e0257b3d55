//! Two-stage meeting alerts.
//!
//! - [`types`]: alert records, stages, offsets and the persisted snapshot
//! - [`scheduler`]: timer backends
//! - [`delivery`]: where fired alerts go
//! - [`context`]: in-meeting / back-to-back detection for downgrades
//! - [`missed`]: classification of alerts missed during sleep or restart
//! - [`engine`]: the [`AlertEngine`] tying them together

pub mod context;
pub mod delivery;
mod engine;
pub mod missed;
pub mod scheduler;
pub mod types;


pub use context::{CalendarContextProvider, MeetingContext, MeetingContextProvider, NoContext};
pub use delivery::{AlertDelivery, ChannelDelivery, Delivered, LogDelivery, NoopDelivery};
pub use engine::{
    AlertEngine, AlertEngineBuilder, FireOutcome, ReconcileOutcome, RelaunchOutcome,
    ScheduleOutcome,
};
pub use missed::{classify_missed, MissedAlert, JUST_STARTED_WINDOW_MINUTES};
pub use scheduler::{AlertScheduler, FireCallback, TokioScheduler, DEFAULT_MAX_SLICE};
pub use types::{
    AlertFraming, AlertOffsets, AlertSnapshot, AlertStage, DowngradeReason, MissedAlertResult,
    ScheduledAlert, ALERT_FORMAT_VERSION,
};
