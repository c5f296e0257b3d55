//! Classification of alerts whose fire time passed while nobody was
//! listening (sleep, restart, stalled runtime).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::types::{MissedAlertResult, ScheduledAlert};

/// How long after the start a missed alert is still worth showing.
pub const JUST_STARTED_WINDOW_MINUTES: i64 = 5;

/// A recovered alert and what was done with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissedAlert {
    pub alert: ScheduledAlert,
    pub result: MissedAlertResult,
}

pub fn classify_missed(alert: &ScheduledAlert, now: DateTime<Utc>) -> MissedAlertResult {
    let since_start = now - alert.event_start;
    if since_start < Duration::zero() {
        MissedAlertResult::FireNow
    } else if since_start < Duration::minutes(JUST_STARTED_WINDOW_MINUTES) {
        MissedAlertResult::MeetingJustStarted {
            minutes_since_start: since_start.num_minutes(),
        }
    } else {
        MissedAlertResult::TooOld
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::types::AlertStage;
    use crate::calendar::Event;

    fn alert_starting_at(start: DateTime<Utc>, fire_at: DateTime<Utc>) -> ScheduledAlert {
        let event = Event::new("work", "e", "Retro", start, start + Duration::minutes(30));
        ScheduledAlert::for_event(&event, AlertStage::Stage1, fire_at)
    }

    #[test]
    fn future_start_fires_now() {
        let now = Utc::now();
        let alert = alert_starting_at(now + Duration::minutes(5), now - Duration::minutes(10));
        assert_eq!(classify_missed(&alert, now), MissedAlertResult::FireNow);
    }

    #[test]
    fn recent_start_is_just_started() {
        let now = Utc::now();
        let alert = alert_starting_at(now - Duration::minutes(2), now - Duration::minutes(7));
        assert_eq!(
            classify_missed(&alert, now),
            MissedAlertResult::MeetingJustStarted {
                minutes_since_start: 2
            }
        );
    }

    #[test]
    fn old_start_is_discarded() {
        let now = Utc::now();
        let alert = alert_starting_at(now - Duration::minutes(10), now - Duration::minutes(15));
        assert_eq!(classify_missed(&alert, now), MissedAlertResult::TooOld);
    }

    #[test]
    fn boundaries() {
        let now = Utc::now();
        let at_start = alert_starting_at(now, now - Duration::minutes(1));
        assert_eq!(
            classify_missed(&at_start, now),
            MissedAlertResult::MeetingJustStarted {
                minutes_since_start: 0
            }
        );
        let at_window = alert_starting_at(now - Duration::minutes(5), now - Duration::minutes(6));
        assert_eq!(classify_missed(&at_window, now), MissedAlertResult::TooOld);
    }
}
