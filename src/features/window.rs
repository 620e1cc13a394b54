//! Sorted event arrays with binary-search range counts.
//!
//! All times are microseconds since the epoch and windows are half-open,
//! `[end - width, end)`.

use std::collections::HashMap;

pub const SECOND_MICROS: i64 = 1_000_000;
pub const HOUR_MICROS: i64 = 3_600 * SECOND_MICROS;
pub const DAY_MICROS: i64 = 24 * HOUR_MICROS;

/// Shift a fraud report date to the last microsecond of its day.
///
/// Report dates are day-granular, so a fraud reported "on day D" is treated as
/// known only by the end of D.
pub fn end_of_report_day(report_micros: i64) -> i64 {
    report_micros + DAY_MICROS - 1
}

/// Sorted event times of one key
#[derive(Debug, Clone, Default)]
pub struct EventTimes {
    times: Vec<i64>,
}

impl EventTimes {
    pub fn from_unsorted(mut times: Vec<i64>) -> Self {
        times.sort_unstable();
        Self { times }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Events strictly before `end`
    pub fn count_before(&self, end: i64) -> usize {
        self.times.partition_point(|&t| t < end)
    }

    /// Events in `[end - width, end)`
    pub fn count_in_window(&self, end: i64, width: i64) -> usize {
        self.count_before(end) - self.count_before(end.saturating_sub(width))
    }
}

/// Events tagged with an owner; counts distinct owners seen before a time.
#[derive(Debug, Clone)]
pub struct DistinctOwners {
    times: Vec<i64>,
    /// `distinct[i]` = distinct owners among the first `i` events
    distinct: Vec<usize>,
    /// Each owner's events as `(time, row)`, ascending
    by_owner: HashMap<String, Vec<(i64, usize)>>,
}

impl DistinctOwners {
    /// Build from `(time, owner, row)` events, where `row` names the source record.
    pub fn from_unsorted(mut events: Vec<(i64, String, usize)>) -> Self {
        events.sort_by_key(|(t, _, _)| *t);

        let mut by_owner: HashMap<String, Vec<(i64, usize)>> = HashMap::new();
        let mut times = Vec::with_capacity(events.len());
        let mut distinct = Vec::with_capacity(events.len() + 1);
        distinct.push(0);
        for (t, owner, row) in events {
            by_owner.entry(owner).or_default().push((t, row));
            times.push(t);
            distinct.push(by_owner.len());
        }

        Self {
            times,
            distinct,
            by_owner,
        }
    }

    /// Distinct owners with an event strictly before `end`
    pub fn distinct_before(&self, end: i64) -> usize {
        self.distinct[self.times.partition_point(|&t| t < end)]
    }

    /// Earliest event of `owner` whose row is not `excluded`
    pub fn first_event(&self, owner: &str, excluded: impl Fn(usize) -> bool) -> Option<i64> {
        self.by_owner
            .get(owner)?
            .iter()
            .find(|(_, row)| !excluded(*row))
            .map(|(t, _)| *t)
    }
}

impl Default for DistinctOwners {
    fn default() -> Self {
        Self::from_unsorted(Vec::new())
    }
}

/// Change in a distinct-owner count after some owners' first events move.
///
/// Built from `(before, after)` first-event pairs, one per owner; `None` means
/// the owner has no event on that side.
#[derive(Debug, Clone, Default)]
pub struct FirstEventShift {
    gained_from: EventTimes,
    gained_until: EventTimes,
    lost_from: EventTimes,
    lost_until: EventTimes,
}

impl FirstEventShift {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Option<i64>, Option<i64>)>) -> Self {
        let (mut gained_from, mut gained_until) = (Vec::new(), Vec::new());
        let (mut lost_from, mut lost_until) = (Vec::new(), Vec::new());
        for pair in pairs {
            match pair {
                (Some(before), Some(after)) if after < before => {
                    gained_from.push(after);
                    gained_until.push(before);
                }
                (Some(before), Some(after)) if before < after => {
                    lost_from.push(before);
                    lost_until.push(after);
                }
                (None, Some(after)) => gained_from.push(after),
                (Some(before), None) => lost_from.push(before),
                _ => {}
            }
        }

        Self {
            gained_from: EventTimes::from_unsorted(gained_from),
            gained_until: EventTimes::from_unsorted(gained_until),
            lost_from: EventTimes::from_unsorted(lost_from),
            lost_until: EventTimes::from_unsorted(lost_until),
        }
    }

    /// Owners gained minus owners lost, counting first events strictly before `end`
    pub fn delta_before(&self, end: i64) -> isize {
        let before = |events: &EventTimes| events.count_before(end) as isize;
        before(&self.gained_from) - before(&self.gained_until) - before(&self.lost_from)
            + before(&self.lost_until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_is_half_open() {
        let events = EventTimes::from_unsorted(vec![30, 10, 20, 40]);
        assert_eq!(events.count_in_window(40, 20), 2); // 20, 30
        assert_eq!(events.count_in_window(41, 20), 2); // 30, 40
        assert_eq!(events.count_in_window(40, 21), 2); // 19 is empty, 40 is the end
        assert_eq!(events.count_in_window(40, 30), 3); // 10, 20, 30
        assert_eq!(events.count_before(10), 0);
    }

    #[test]
    fn test_seven_day_boundary() {
        let end = 100 * DAY_MICROS;
        let width = 7 * DAY_MICROS;
        let on_boundary = EventTimes::from_unsorted(vec![end - width]);
        let just_outside = EventTimes::from_unsorted(vec![end - width - 1]);
        assert_eq!(on_boundary.count_in_window(end, width), 1);
        assert_eq!(just_outside.count_in_window(end, width), 0);
    }

    #[test]
    fn test_end_of_report_day() {
        assert_eq!(end_of_report_day(0), DAY_MICROS - 1);
    }

    #[test]
    fn test_distinct_owners_counts_each_owner_once() {
        let events = [(5, "a", 0), (1, "a", 1), (3, "b", 2), (9, "c", 3)]
            .into_iter()
            .map(|(t, owner, row)| (t, owner.to_string(), row))
            .collect();
        let owners = DistinctOwners::from_unsorted(events);
        assert_eq!(owners.distinct_before(1), 0);
        assert_eq!(owners.distinct_before(2), 1);
        assert_eq!(owners.distinct_before(6), 2);
        assert_eq!(owners.distinct_before(100), 3);

        assert_eq!(owners.first_event("a", |_| false), Some(1));
        assert_eq!(owners.first_event("a", |row| row == 1), Some(5));
        assert_eq!(owners.first_event("b", |row| row == 2), None);
        assert_eq!(DistinctOwners::default().distinct_before(10), 0);
    }

    #[test]
    fn test_first_event_shift() {
        // a moves from 10 to 5, b appears at 3, c disappears from 2
        let shift = FirstEventShift::from_pairs([(Some(10), Some(5)), (None, Some(3)), (Some(2), None)]);
        assert_eq!(shift.delta_before(2), 0);
        assert_eq!(shift.delta_before(3), -1);
        assert_eq!(shift.delta_before(4), 0);
        assert_eq!(shift.delta_before(6), 1);
        assert_eq!(shift.delta_before(10), 1);
        assert_eq!(shift.delta_before(11), 0);

        // a later first event is a loss until the new one
        let later = FirstEventShift::from_pairs([(Some(4), Some(8)), (Some(7), Some(7))]);
        assert_eq!(later.delta_before(5), -1);
        assert_eq!(later.delta_before(9), 0);
    }
}
