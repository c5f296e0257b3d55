//! Back-to-back meeting detection.
//!
//! A meeting is back-to-back with the one in progress when it starts no
//! later than [`BACK_TO_BACK_GAP_MINUTES`] after the current one ends.

use chrono::{DateTime, Duration, Utc};

use super::event::Event;

pub const BACK_TO_BACK_GAP_MINUTES: i64 = 5;

/// The meeting in progress and whatever follows it back-to-back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackToBackState {
    pub current: Option<Event>,
    pub next: Option<Event>,
}

impl BackToBackState {
    pub fn is_back_to_back(&self) -> bool {
        self.current.is_some() && self.next.is_some()
    }
}

/// Whether `next_start` follows `current` closely enough to count as
/// back-to-back. Starts that overlap the tail of `current` count too.
pub fn is_back_to_back(current: &Event, next_start: DateTime<Utc>) -> bool {
    next_start > current.start
        && next_start <= current.end + Duration::minutes(BACK_TO_BACK_GAP_MINUTES)
}

/// The in-progress timed meeting at `now`, preferring the one ending last.
pub fn current_meeting(events: &[Event], now: DateTime<Utc>) -> Option<&Event> {
    events
        .iter()
        .filter(|e| !e.is_all_day && e.is_in_progress(now))
        .max_by_key(|e| e.end)
}

pub fn detect_back_to_back(events: &[Event], now: DateTime<Utc>) -> BackToBackState {
    let Some(current) = current_meeting(events, now) else {
        return BackToBackState::default();
    };
    let current_key = current.key();
    let next = events
        .iter()
        .filter(|e| !e.is_all_day && e.key() != current_key)
        .filter(|e| e.start >= now && is_back_to_back(current, e.start))
        .min_by_key(|e| e.start)
        .cloned();

    BackToBackState {
        current: Some(current.clone()),
        next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(min: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::minutes(min)
    }

    #[test]
    fn nothing_in_progress() {
        let events = vec![Event::new("s", "a", "A", at(10), at(40))];
        let state = detect_back_to_back(&events, at(0));
        assert!(state.current.is_none());
        assert!(!state.is_back_to_back());
    }

    #[test]
    fn next_within_gap_is_back_to_back() {
        let events = vec![
            Event::new("s", "a", "A", at(0), at(30)),
            Event::new("s", "b", "B", at(35), at(60)),
        ];
        let state = detect_back_to_back(&events, at(20));
        assert_eq!(state.current.as_ref().map(|e| e.id.as_str()), Some("a"));
        assert_eq!(state.next.as_ref().map(|e| e.id.as_str()), Some("b"));
        assert!(state.is_back_to_back());
    }

    #[test]
    fn next_beyond_gap_is_not() {
        let events = vec![
            Event::new("s", "a", "A", at(0), at(30)),
            Event::new("s", "b", "B", at(36), at(60)),
        ];
        let state = detect_back_to_back(&events, at(20));
        assert!(state.current.is_some());
        assert!(state.next.is_none());
    }

    #[test]
    fn overlapping_start_counts() {
        let current = Event::new("s", "a", "A", at(0), at(30));
        assert!(is_back_to_back(&current, at(25)));
        assert!(is_back_to_back(&current, at(30)));
        assert!(is_back_to_back(&current, at(35)));
        assert!(!is_back_to_back(&current, at(0)));
    }
}
