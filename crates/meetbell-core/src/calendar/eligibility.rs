//! Decides which fetched events deserve a reminder.

use serde::{Deserialize, Serialize};

use super::event::{Event, ResponseStatus};

/// Eligibility rules, read from the `[filter]` config section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EligibilityFilter {
    /// When non-empty, a title must contain at least one of these.
    #[serde(default)]
    pub include_keywords: Vec<String>,
    /// A title containing any of these is never alerted.
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
    /// Calendar ids whose events are ignored.
    #[serde(default)]
    pub disabled_calendars: Vec<String>,
    #[serde(default)]
    pub include_all_day: bool,
    #[serde(default)]
    pub include_declined: bool,
    #[serde(default)]
    pub require_meeting_link: bool,
}

impl EligibilityFilter {
    pub fn is_eligible(&self, event: &Event) -> bool {
        if event.is_all_day && !self.include_all_day {
            return false;
        }
        if event.response_status == ResponseStatus::Declined && !self.include_declined {
            return false;
        }
        if let Some(calendar) = &event.calendar_id {
            if self.disabled_calendars.iter().any(|c| c == calendar) {
                return false;
            }
        }
        if self.require_meeting_link && event.meeting_links.is_empty() {
            return false;
        }

        let title = event.title.to_lowercase();
        if self
            .exclude_keywords
            .iter()
            .any(|k| !k.is_empty() && title.contains(&k.to_lowercase()))
        {
            return false;
        }
        if !self.include_keywords.is_empty()
            && !self
                .include_keywords
                .iter()
                .any(|k| title.contains(&k.to_lowercase()))
        {
            return false;
        }
        true
    }

    /// Keep only the alert-worthy events, preserving order.
    pub fn apply(&self, events: &[Event]) -> Vec<Event> {
        events.iter().filter(|e| self.is_eligible(e)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn event(title: &str) -> Event {
        let start = Utc::now() + Duration::hours(1);
        Event::new("work", title, title, start, start + Duration::minutes(30))
    }

    #[test]
    fn default_filter_accepts_plain_meeting() {
        assert!(EligibilityFilter::default().is_eligible(&event("Planning")));
    }

    #[test]
    fn all_day_and_declined_are_skipped_by_default() {
        let filter = EligibilityFilter::default();
        assert!(!filter.is_eligible(&event("Offsite").all_day()));
        assert!(!filter.is_eligible(&event("Sync").with_response(ResponseStatus::Declined)));

        let permissive = EligibilityFilter {
            include_all_day: true,
            include_declined: true,
            ..Default::default()
        };
        assert!(permissive.is_eligible(&event("Offsite").all_day()));
        assert!(permissive.is_eligible(&event("Sync").with_response(ResponseStatus::Declined)));
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let filter = EligibilityFilter {
            include_keywords: vec!["sync".into()],
            exclude_keywords: vec!["OPTIONAL".into()],
            ..Default::default()
        };
        assert!(filter.is_eligible(&event("Weekly Sync")));
        assert!(!filter.is_eligible(&event("Lunch")));
        assert!(!filter.is_eligible(&event("Team sync (optional)")));
    }

    #[test]
    fn disabled_calendar_and_link_requirement() {
        let filter = EligibilityFilter {
            disabled_calendars: vec!["holidays".into()],
            require_meeting_link: true,
            ..Default::default()
        };
        assert!(!filter.is_eligible(&event("Call").with_calendar("holidays")));
        assert!(!filter.is_eligible(&event("Call").with_calendar("primary")));
        assert!(filter.is_eligible(
            &event("Call")
                .with_calendar("primary")
                .with_meeting_link("https://meet.example.com/abc")
        ));
    }

    #[test]
    fn apply_preserves_order() {
        let filter = EligibilityFilter {
            exclude_keywords: vec!["focus".into()],
            ..Default::default()
        };
        let events = vec![event("A"), event("Focus time"), event("B")];
        let kept: Vec<_> = filter.apply(&events).into_iter().map(|e| e.title).collect();
        assert_eq!(kept, vec!["A", "B"]);
    }
}
