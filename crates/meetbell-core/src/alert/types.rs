//! Alert value types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::Event;
use crate::error::StoreError;

/// Which lead-time reminder an alert is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStage {
    /// Early warning.
    Stage1,
    /// Urgent, close to the start.
    Stage2,
}

impl AlertStage {
    pub const ALL: [AlertStage; 2] = [AlertStage::Stage1, AlertStage::Stage2];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStage::Stage1 => "stage1",
            AlertStage::Stage2 => "stage2",
        }
    }
}

impl std::fmt::Display for AlertStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minutes before the meeting start for each stage. Zero disables a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertOffsets {
    pub stage1_minutes: u32,
    pub stage2_minutes: u32,
}

impl AlertOffsets {
    pub fn new(stage1_minutes: u32, stage2_minutes: u32) -> Self {
        Self {
            stage1_minutes,
            stage2_minutes,
        }
    }

    /// Lead time for `stage`, or `None` when the stage is disabled.
    pub fn offset(&self, stage: AlertStage) -> Option<Duration> {
        let minutes = match stage {
            AlertStage::Stage1 => self.stage1_minutes,
            AlertStage::Stage2 => self.stage2_minutes,
        };
        (minutes > 0).then(|| Duration::minutes(i64::from(minutes)))
    }
}

impl Default for AlertOffsets {
    fn default() -> Self {
        Self::new(5, 1)
    }
}

/// A persisted, timer-backed reminder for one stage of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledAlert {
    /// `eventKey-stage`.
    pub id: String,
    /// Key of the event (`sourceId::eventId`).
    pub event_key: String,
    pub stage: AlertStage,
    pub fire_at: DateTime<Utc>,
    #[serde(default)]
    pub snooze_count: u32,
    /// Fire time before the first snooze.
    #[serde(default)]
    pub original_fire_at: Option<DateTime<Utc>>,
    /// Title when the alert was scheduled.
    pub event_title: String,
    /// Start when the alert was scheduled.
    pub event_start: DateTime<Utc>,
    #[serde(default)]
    pub meeting_link: Option<String>,
}

impl ScheduledAlert {
    pub fn alert_id(event_key: &str, stage: AlertStage) -> String {
        format!("{event_key}-{}", stage.as_str())
    }

    pub fn for_event(event: &Event, stage: AlertStage, fire_at: DateTime<Utc>) -> Self {
        let event_key = event.key();
        Self {
            id: Self::alert_id(&event_key, stage),
            event_key,
            stage,
            fire_at,
            snooze_count: 0,
            original_fire_at: None,
            event_title: event.title.clone(),
            event_start: event.start,
            meeting_link: event.primary_meeting_link().map(str::to_string),
        }
    }

    /// The fire time this alert had before any snooze.
    pub fn base_fire_at(&self) -> DateTime<Utc> {
        self.original_fire_at.unwrap_or(self.fire_at)
    }

    pub fn is_snoozed(&self) -> bool {
        self.snooze_count > 0
    }

    /// Whole minutes until the meeting starts, negative once it has.
    pub fn minutes_until_start(&self, now: DateTime<Utc>) -> i64 {
        (self.event_start - now).num_minutes()
    }

    pub(crate) fn snoozed_until(&self, fire_at: DateTime<Utc>) -> Self {
        Self {
            fire_at,
            snooze_count: self.snooze_count + 1,
            original_fire_at: Some(self.base_fire_at()),
            ..self.clone()
        }
    }
}

/// How a recovered alert should be handled after a sleep or restart gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MissedAlertResult {
    /// Meeting has not started yet; deliver now.
    FireNow,
    /// Meeting started moments ago; deliver with "just started" wording.
    MeetingJustStarted { minutes_since_start: i64 },
    /// Too late to be useful; discard.
    TooOld,
}

/// Wording hint passed to delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertFraming {
    Normal,
    JustStarted,
}

/// Why an alert went through the passive channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DowngradeReason {
    BackToBack,
    ScreenSharing,
    DoNotDisturb,
}

/// Current on-disk format of [`AlertSnapshot`].
pub const ALERT_FORMAT_VERSION: u32 = 1;

/// Everything the alert engine persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSnapshot {
    pub format_version: u32,
    pub alerts: Vec<ScheduledAlert>,
    #[serde(default)]
    pub acknowledged: Vec<String>,
}

impl AlertSnapshot {
    pub fn new(
        mut alerts: Vec<ScheduledAlert>,
        acknowledged: impl IntoIterator<Item = String>,
    ) -> Self {
        alerts.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.id.cmp(&b.id)));
        let mut acknowledged: Vec<String> = acknowledged.into_iter().collect();
        acknowledged.sort();
        Self {
            format_version: ALERT_FORMAT_VERSION,
            alerts,
            acknowledged,
        }
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored snapshot, rejecting ones written by a newer build.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let snapshot: AlertSnapshot = serde_json::from_str(json)?;
        if snapshot.format_version > ALERT_FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: snapshot.format_version,
                supported: ALERT_FORMAT_VERSION,
            });
        }
        Ok(snapshot)
    }
}
