//! Where fired alerts go.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::types::{AlertFraming, DowngradeReason, ScheduledAlert};

/// Delivery sink for fired alerts.
///
/// `deliver` is the interruptive path (banner, sound, full-screen);
/// `deliver_downgraded` is the passive one used when interrupting would be
/// counter-productive.
#[async_trait]
pub trait AlertDelivery: Send + Sync {
    async fn deliver(&self, alert: &ScheduledAlert, framing: AlertFraming);

    async fn deliver_downgraded(&self, alert: &ScheduledAlert, reason: DowngradeReason);
}

/// Drops every alert.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelivery;

#[async_trait]
impl AlertDelivery for NoopDelivery {
    async fn deliver(&self, _alert: &ScheduledAlert, _framing: AlertFraming) {}

    async fn deliver_downgraded(&self, _alert: &ScheduledAlert, _reason: DowngradeReason) {}
}

/// Writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDelivery;

#[async_trait]
impl AlertDelivery for LogDelivery {
    async fn deliver(&self, alert: &ScheduledAlert, framing: AlertFraming) {
        let minutes = alert.minutes_until_start(Utc::now());
        let headline = match framing {
            AlertFraming::Normal if minutes <= 0 => {
                format!("{} is starting now", alert.event_title)
            }
            AlertFraming::Normal => format!("{} starts in {minutes} min", alert.event_title),
            AlertFraming::JustStarted => format!("{} just started", alert.event_title),
        };
        tracing::info!(
            alert_id = %alert.id,
            stage = %alert.stage,
            link = alert.meeting_link.as_deref().unwrap_or(""),
            "{headline}"
        );
    }

    async fn deliver_downgraded(&self, alert: &ScheduledAlert, reason: DowngradeReason) {
        tracing::info!(
            alert_id = %alert.id,
            stage = %alert.stage,
            ?reason,
            "(quiet) {} starts at {}",
            alert.event_title,
            alert.event_start.format("%H:%M")
        );
    }
}

/// One delivered alert, as seen by a [`ChannelDelivery`] receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "channel")]
pub enum Delivered {
    Interruptive {
        alert: ScheduledAlert,
        framing: AlertFraming,
    },
    Passive {
        alert: ScheduledAlert,
        reason: DowngradeReason,
    },
}

impl Delivered {
    pub fn alert(&self) -> &ScheduledAlert {
        match self {
            Delivered::Interruptive { alert, .. } | Delivered::Passive { alert, .. } => alert,
        }
    }
}

/// Forwards alerts to a channel, for a UI task or a test to consume.
#[derive(Debug, Clone)]
pub struct ChannelDelivery {
    tx: mpsc::UnboundedSender<Delivered>,
}

impl ChannelDelivery {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivered>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, delivered: Delivered) {
        if self.tx.send(delivered).is_err() {
            tracing::debug!("alert receiver dropped");
        }
    }
}

#[async_trait]
impl AlertDelivery for ChannelDelivery {
    async fn deliver(&self, alert: &ScheduledAlert, framing: AlertFraming) {
        self.send(Delivered::Interruptive {
            alert: alert.clone(),
            framing,
        });
    }

    async fn deliver_downgraded(&self, alert: &ScheduledAlert, reason: DowngradeReason) {
        self.send(Delivered::Passive {
            alert: alert.clone(),
            reason,
        });
    }
}
