//! Tests for sync types module.

#[cfg(test)]
mod tests {
    use super::super::types::*;
    use crate::calendar::Event;
    use chrono::{DateTime, Duration, Utc};

    fn secs(n: i64) -> Option<Duration> {
        Some(Duration::seconds(n))
    }

    #[test]
    fn test_polling_tiers() {
        assert_eq!(calculate_polling_interval(secs(30)), PollingInterval::Imminent);
        assert_eq!(calculate_polling_interval(secs(600)), PollingInterval::Imminent);
        assert_eq!(calculate_polling_interval(secs(601)), PollingInterval::Upcoming);
        assert_eq!(calculate_polling_interval(secs(700)), PollingInterval::Upcoming);
        assert_eq!(calculate_polling_interval(secs(3600)), PollingInterval::Upcoming);
        assert_eq!(calculate_polling_interval(secs(4000)), PollingInterval::Idle);
        assert_eq!(calculate_polling_interval(None), PollingInterval::Idle);
    }

    #[test]
    fn test_polling_interval_for_events() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let events = vec![
            Event::new("s", "past", "Past", now - Duration::hours(2), now - Duration::hours(1)),
            Event::new(
                "s",
                "later",
                "Later",
                now + Duration::minutes(45),
                now + Duration::minutes(60),
            ),
        ];
        assert_eq!(polling_interval_for(&events, now), PollingInterval::Upcoming);
        assert_eq!(polling_interval_for(&[], now), PollingInterval::Idle);
    }

    #[test]
    fn test_polling_schedule_delay() {
        let schedule = PollingSchedule::default();
        assert_eq!(schedule.delay(PollingInterval::Imminent).as_secs(), 60);
        assert_eq!(schedule.delay(PollingInterval::Upcoming).as_secs(), 300);
        assert_eq!(schedule.delay(PollingInterval::Idle).as_secs(), 900);
    }

    #[test]
    fn test_fetch_window_contains() {
        let now = Utc::now();
        let window = FetchWindow::forward(now, Duration::hours(24));
        let inside = Event::new("s", "a", "A", now + Duration::hours(1), now + Duration::hours(2));
        let outside =
            Event::new("s", "b", "B", now + Duration::hours(30), now + Duration::hours(31));
        assert!(window.contains(&inside));
        assert!(!window.contains(&outside));
    }

    #[test]
    fn test_fetch_result_deserializes_without_optional_fields() {
        let result: FetchResult = serde_json::from_str(r#"{"events": []}"#).unwrap();
        assert!(result.deleted_ids.is_empty());
        assert_eq!(result.next_cursor, None);
    }
}
