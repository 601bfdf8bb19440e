//! Availability search.
//!
//! The interval arithmetic is pure and database-free so it can be
//! property-tested directly; [`mod@super`] wires it to the busy-range
//! queries.

use chrono::{DateTime, Duration, Utc};

use crate::adapters::Timeslot;

/// Invert `busy` (assumed already clipped to `[window_start,
/// window_end)` and not necessarily sorted or merged) to the free
/// ranges within the window, then slice each free range into
/// `duration`-long sub-windows at `granularity` steps.
pub fn free_slots(mut busy: Vec<Timeslot>, window_start: DateTime<Utc>, window_end: DateTime<Utc>, duration: Duration, granularity: Duration) -> Vec<Timeslot> {
    if duration <= Duration::zero || granularity <= Duration::zero || window_end <= window_start {
        return Vec::new();
    }

    busy.sort_by_key(|t| t.start);
    let merged = merge(&busy);

    let mut free_ranges = Vec::new();
    let mut cursor = window_start;
    for b in &merged {
        let start = b.start.max(window_start);
        let end = b.end.min(window_end);
        if start > cursor {
            free_ranges.push(Timeslot { start: cursor, end: start, });
        }
        cursor = cursor.max(end);
    }
    if cursor < window_end {
        free_ranges.push(Timeslot { start: cursor, end: window_end, });
    }

    let mut slots = Vec::new();
    for range in free_ranges {
        let mut slot_start = range.start;
        while slot_start + duration <= range.end {
            slots.push(Timeslot { start: slot_start, end: slot_start + duration, });
            slot_start = slot_start + granularity;
        }
    }
    slots
}

/// Merge overlapping/adjacent busy ranges so the sweep in
/// [`free_slots`] doesn't need to track more than one active interval.
fn merge(sorted_busy: &[Timeslot]) -> Vec<Timeslot> {
    let mut out: Vec<Timeslot> = Vec::new();
    for &t in sorted_busy {
        match out.last_mut() {
            Some(last) if t.start <= last.end => {
                if t.end > last.end {
                    last.end = t.end;
                }
            }
            _ => out.push(t),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn empty_busy_fills_window_at_granularity() {
        let slots = free_slots(
            vec![],
            t(9, 0),
            t(10, 0),
            Duration::minutes(30),
            Duration::minutes(15));
        // window is 60 minutes; 30-minute slots starting every 15
        // minutes that still fit: 9:00, 9:15, 9:30 (9:45 would end at // 10:15, past the window).
        assert_eq!(
            slots,
            vec![
                Timeslot { start: t(9, 0), end: t(9, 30) },
                Timeslot { start: t(9, 15), end: t(9, 45) },
                Timeslot { start: t(9, 30), end: t(10, 0) },
            ]
        );
    }

    #[test]
    fn busy_range_is_excluded() {
        let busy = vec![Timeslot { start: t(9, 15), end: t(9, 45) }];
        let slots = free_slots(busy, t(9, 0), t(10, 0), Duration::minutes(15), Duration::minutes(15));
        for slot in &slots {
            assert!(slot.end <= t(9, 15) || slot.start >= t(9, 45));
        }
        assert!(slots.contains(&Timeslot { start: t(9, 0), end: t(9, 15) }));
        assert!(slots.contains(&Timeslot { start: t(9, 45), end: t(10, 0) }));
    }

    #[test]
    fn overlapping_busy_ranges_are_merged() {
        let busy = vec![
            Timeslot { start: t(9, 0), end: t(9, 30) },
            Timeslot { start: t(9, 20), end: t(9, 50) },
        ];
        let slots = free_slots(busy, t(9, 0), t(10, 0), Duration::minutes(10), Duration::minutes(10));
        assert!(slots.iter().all(|s| s.start >= t(9, 50)));
    }

    #[test]
    fn zero_duration_yields_no_slots() {
        assert!(free_slots(vec![], t(9, 0), t(10, 0), Duration::zero, Duration::minutes(15)).is_empty());
    }

    #[test]
    fn fully_busy_window_yields_no_slots() {
        let busy = vec![Timeslot { start: t(9, 0), end: t(10, 0) }];
        let slots = free_slots(busy, t(9, 0), t(10, 0), Duration::minutes(15), Duration::minutes(15));
        assert!(slots.is_empty());
    }
}
