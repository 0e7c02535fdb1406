//! Expected-timestamp arithmetic for interval series.
//!
//! Everything here is pure and deterministic: two calls with the same
//! arguments yield identical output, which is what lets scans be restarted
//! or re-run without coordination. Boundaries align to calendar epochs
//! because Unix epoch millis are already UTC-aligned: flooring to a 1d step
//! lands on UTC midnight, flooring to the 8h funding step lands on
//! 00:00/08:00/16:00 UTC. Misaligned expectations would manufacture
//! false-positive gaps against exchange data.

use crate::series::{Cadence, TimestampMS, MS_PER_SECOND};

/// Round `ts` down to the nearest step boundary.
pub fn align_down(ts: TimestampMS, step_ms: i64) -> TimestampMS {
    ts.div_euclid(step_ms) * step_ms
}

/// Round `ts` up to the nearest step boundary.
pub fn align_up(ts: TimestampMS, step_ms: i64) -> TimestampMS {
    let floored = align_down(ts, step_ms);
    if floored == ts {
        ts
    } else {
        floored + step_ms
    }
}

/// The ordered sequence of timestamps that should exist in `[start, end)`
/// for an interval cadence. Event-driven cadences have no fixed expectation
/// and return an empty sequence.
pub fn expected_timestamps(cadence: Cadence, start: TimestampMS, end: TimestampMS) -> Vec<TimestampMS> {
    let step_ms = match cadence {
        Cadence::Interval { step } => step as i64 * MS_PER_SECOND,
        Cadence::EventDriven { .. } => return Vec::new(),
    };
    if start >= end || step_ms <= 0 {
        return Vec::new();
    }

    let first = align_up(start, step_ms);
    let mut out = Vec::with_capacity(((end - first) / step_ms).max(0) as usize + 1);
    let mut ts = first;
    while ts < end {
        out.push(ts);
        ts += step_ms;
    }
    out
}

/// Count of expected records in `[start, end)` without materializing them.
pub fn records_in_range(step_ms: i64, start: TimestampMS, end: TimestampMS) -> u32 {
    if start >= end || step_ms <= 0 {
        return 0;
    }
    let first = align_up(start, step_ms);
    if first >= end {
        return 0;
    }
    ((end - first + step_ms - 1) / step_ms) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{Cadence, SeriesKind};
    use chrono::{TimeZone, Utc};

    #[test]
    fn one_minute_sequence_is_inclusive_start_exclusive_end() {
        let t0 = 1_700_000_040_000; // already minute-aligned
        let ts = expected_timestamps(Cadence::Interval { step: 60 }, t0, t0 + 3600_000);
        assert_eq!(ts.len(), 60);
        assert_eq!(ts[0], t0);
        assert_eq!(*ts.last().unwrap(), t0 + 3540_000);
    }

    #[test]
    fn unaligned_start_rounds_up() {
        let ts = expected_timestamps(Cadence::Interval { step: 60 }, 61_000, 241_000);
        assert_eq!(ts, vec![120_000, 180_000, 240_000]);
    }

    #[test]
    fn daily_boundaries_land_on_utc_midnight() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 7, 30, 0).unwrap().timestamp_millis();
        let end = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 1).unwrap().timestamp_millis();
        let ts = expected_timestamps(Cadence::Interval { step: 86400 }, start, end);
        let expected: Vec<i64> = (2..=4)
            .map(|d| Utc.with_ymd_and_hms(2024, 3, d, 0, 0, 0).unwrap().timestamp_millis())
            .collect();
        assert_eq!(ts, expected);
    }

    #[test]
    fn funding_settlements_align_to_8h_utc() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap().timestamp_millis();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 0, 30, 0).unwrap().timestamp_millis();
        let ts = expected_timestamps(SeriesKind::FundingRates.cadence(), start, end);
        let hours: Vec<u32> = ts
            .iter()
            .map(|ms| chrono::DateTime::from_timestamp_millis(*ms).unwrap().format("%H").to_string().parse().unwrap())
            .collect();
        assert_eq!(hours, vec![8, 16, 0]);
    }

    #[test]
    fn deterministic() {
        let a = expected_timestamps(Cadence::Interval { step: 300 }, 12_345, 9_999_999);
        let b = expected_timestamps(Cadence::Interval { step: 300 }, 12_345, 9_999_999);
        assert_eq!(a, b);
    }

    #[test]
    fn event_driven_has_no_expectation() {
        assert!(expected_timestamps(Cadence::EventDriven { granularity: 3600 }, 0, 10_000_000).is_empty());
    }

    #[test]
    fn records_in_range_matches_sequence_length() {
        for (start, end) in [(0, 600_000), (61_000, 241_000), (59_999, 60_000), (60_000, 60_000)] {
            let seq = expected_timestamps(Cadence::Interval { step: 60 }, start, end);
            assert_eq!(records_in_range(60_000, start, end) as usize, seq.len());
        }
    }
}
