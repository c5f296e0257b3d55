//! Overlapping-meeting detection.

use serde::{Deserialize, Serialize};

use super::event::Event;

/// Two events whose time ranges overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Key of the event that starts first (ties broken by key).
    pub first: String,
    pub second: String,
    /// Overlap length in minutes.
    pub overlap_minutes: i64,
}

/// Find every overlapping pair among timed events.
///
/// Ranges are half-open: an event ending exactly when another starts does
/// not conflict with it.
pub fn find_conflicts(events: &[Event]) -> Vec<Conflict> {
    let mut timed: Vec<&Event> = events.iter().filter(|e| !e.is_all_day).collect();
    timed.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.key().cmp(&b.key())));

    let mut conflicts = Vec::new();
    for (i, a) in timed.iter().enumerate() {
        for b in &timed[i + 1..] {
            // Sorted by start: nothing later can overlap `a` either.
            if b.start >= a.end {
                break;
            }
            if a.overlaps(b.start, b.end) {
                let overlap = a.end.min(b.end) - b.start.max(a.start);
                conflicts.push(Conflict {
                    first: a.key(),
                    second: b.key(),
                    overlap_minutes: overlap.num_minutes(),
                });
            }
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    fn at(min: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::minutes(min)
    }

    #[test]
    fn identical_ranges_conflict_once() {
        let events = vec![
            Event::new("s", "a", "A", at(0), at(30)),
            Event::new("s", "b", "B", at(0), at(30)),
        ];
        let conflicts = find_conflicts(&events);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].first, "s::a");
        assert_eq!(conflicts[0].second, "s::b");
        assert_eq!(conflicts[0].overlap_minutes, 30);
    }

    #[test]
    fn touching_ranges_do_not_conflict() {
        let events = vec![
            Event::new("s", "a", "A", at(0), at(30)),
            Event::new("s", "b", "B", at(30), at(60)),
        ];
        assert!(find_conflicts(&events).is_empty());
    }

    #[test]
    fn long_meeting_conflicts_with_each_contained_one() {
        let events = vec![
            Event::new("s", "long", "Workshop", at(0), at(120)),
            Event::new("s", "x", "X", at(10), at(20)),
            Event::new("s", "y", "Y", at(60), at(90)),
        ];
        let conflicts = find_conflicts(&events);
        assert_eq!(conflicts.len(), 2);
        assert!(conflicts.iter().all(|c| c.first == "s::long"));
    }

    #[test]
    fn all_day_events_are_ignored() {
        let events = vec![
            Event::new("s", "day", "Holiday", at(0), at(24 * 60)).all_day(),
            Event::new("s", "a", "A", at(60), at(90)),
        ];
        assert!(find_conflicts(&events).is_empty());
    }
}
