//! Gap scanning: diff stored timestamps against expectations.
//!
//! The scanner works over the result of a single ranged store query rather
//! than probing the store point-by-point; that keeps it one query per series
//! per scan and makes it robust against partial writes happening underneath.

use rustc_hash::FxHashSet;
use tracing::debug;

use super::classifier::{classify, ClassifierConfig};
use super::expectation::{align_down, expected_timestamps};
use super::structs::{Gap, GapStatus, Scenario};
use crate::series::{Cadence, SeriesId, TimestampMS, MS_PER_SECOND};

/// Scan one series' window for gaps.
///
/// `actual` is the set of timestamps stored in `[window_start, window_end)`,
/// in any order. Interval series get exact-timestamp matching with adjacent
/// missing points merged into maximal contiguous runs; event-driven series
/// degrade to an activity check per granularity bucket and come back as
/// non-dispatchable `Observed` gaps.
pub fn scan_series(
    series: &SeriesId,
    window_start: TimestampMS,
    window_end: TimestampMS,
    actual: &[TimestampMS],
    now: TimestampMS,
    scenario: Scenario,
    cfg: &ClassifierConfig,
) -> Vec<Gap> {
    match series.kind.cadence() {
        Cadence::Interval { .. } => {
            scan_interval(series, window_start, window_end, actual, now, scenario, cfg)
        }
        Cadence::EventDriven { granularity } => scan_event_activity(
            series,
            granularity as i64 * MS_PER_SECOND,
            window_start,
            window_end,
            actual,
            now,
            scenario,
            cfg,
        ),
    }
}

#[allow(clippy::too_many_arguments)]
fn scan_interval(
    series: &SeriesId,
    window_start: TimestampMS,
    window_end: TimestampMS,
    actual: &[TimestampMS],
    now: TimestampMS,
    scenario: Scenario,
    cfg: &ClassifierConfig,
) -> Vec<Gap> {
    let step_ms = series.kind.step_ms();
    let expected = expected_timestamps(series.kind.cadence(), window_start, window_end);
    if expected.is_empty() {
        return Vec::new();
    }

    let present: FxHashSet<TimestampMS> = actual.iter().copied().collect();

    let mut gaps = Vec::new();
    let mut run_start: Option<TimestampMS> = None;
    let mut run_len: u32 = 0;
    let mut last_missing: TimestampMS = 0;

    for &ts in &expected {
        if present.contains(&ts) {
            if let Some(start) = run_start.take() {
                gaps.push(make_gap(series, start, last_missing + step_ms, run_len, now, scenario, cfg));
                run_len = 0;
            }
        } else {
            if run_start.is_none() {
                run_start = Some(ts);
            }
            last_missing = ts;
            run_len += 1;
        }
    }
    if let Some(start) = run_start {
        gaps.push(make_gap(series, start, last_missing + step_ms, run_len, now, scenario, cfg));
    }

    if !gaps.is_empty() {
        debug!(
            series = %series,
            gaps = gaps.len(),
            expected = expected.len(),
            present = present.len(),
            "gap scan found missing ranges"
        );
    }
    gaps
}

/// Event-driven coverage: each fully elapsed granularity bucket must contain
/// at least one event. Empty adjacent buckets merge into one gap, flagged
/// `Observed` because an event series cannot be gap-completed by a range
/// fetch the way an interval series can.
#[allow(clippy::too_many_arguments)]
fn scan_event_activity(
    series: &SeriesId,
    bucket_ms: i64,
    window_start: TimestampMS,
    window_end: TimestampMS,
    actual: &[TimestampMS],
    now: TimestampMS,
    scenario: Scenario,
    cfg: &ClassifierConfig,
) -> Vec<Gap> {
    if window_start >= window_end || bucket_ms <= 0 {
        return Vec::new();
    }

    let occupied: FxHashSet<TimestampMS> = actual
        .iter()
        .map(|ts| align_down(*ts, bucket_ms))
        .collect();

    // Only judge buckets that have fully elapsed; the bucket containing
    // `now` may legitimately still be empty.
    let horizon = window_end.min(align_down(now, bucket_ms));

    let mut gaps = Vec::new();
    let mut run_start: Option<TimestampMS> = None;
    // A partial leading bucket cannot be judged fairly; start at the first
    // bucket fully inside the window.
    let mut bucket = super::expectation::align_up(window_start, bucket_ms);
    let mut last_empty = 0;

    while bucket + bucket_ms <= horizon {
        if occupied.contains(&bucket) {
            if let Some(start) = run_start.take() {
                let mut gap = make_gap(series, start, last_empty + bucket_ms, 0, now, scenario, cfg);
                gap.status = GapStatus::Observed;
                gaps.push(gap);
            }
        } else {
            if run_start.is_none() {
                run_start = Some(bucket);
            }
            last_empty = bucket;
        }
        bucket += bucket_ms;
    }
    if let Some(start) = run_start {
        let mut gap = make_gap(series, start, last_empty + bucket_ms, 0, now, scenario, cfg);
        gap.status = GapStatus::Observed;
        gaps.push(gap);
    }
    gaps
}

fn make_gap(
    series: &SeriesId,
    start: TimestampMS,
    end: TimestampMS,
    records_expected: u32,
    now: TimestampMS,
    scenario: Scenario,
    cfg: &ClassifierConfig,
) -> Gap {
    let (kind, priority) = classify(end, now, scenario, cfg);
    Gap {
        series: series.clone(),
        start,
        end,
        kind,
        priority,
        scenario,
        status: GapStatus::Pending,
        records_expected,
        records_filled: 0,
        retry_count: 0,
        next_attempt_at: now,
        detected_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gap::GapKind;
    use crate::series::SeriesKind;

    fn minute_series() -> SeriesId {
        SeriesId::new("BTC-USDT-PERP", SeriesKind::Candles { interval: 60 })
    }

    fn cfg() -> ClassifierConfig {
        ClassifierConfig::default()
    }

    #[test]
    fn complete_window_yields_no_gaps() {
        let series = minute_series();
        let t0: i64 = 1_700_000_040_000;
        let actual: Vec<i64> = (0..60).map(|i| t0 + i * 60_000).collect();
        let gaps = scan_series(&series, t0, t0 + 3_600_000, &actual, t0 + 3_700_000, Scenario::Periodic, &cfg());
        assert!(gaps.is_empty());
    }

    #[test]
    fn empty_store_yields_one_gap_for_whole_window() {
        let series = minute_series();
        let t0: i64 = 1_700_000_040_000;
        let gaps = scan_series(&series, t0, t0 + 3_600_000, &[], t0 + 3_700_000, Scenario::Periodic, &cfg());
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].start, t0);
        assert_eq!(gaps[0].end, t0 + 3_600_000);
        assert_eq!(gaps[0].records_expected, 60);
    }

    #[test]
    fn single_missing_subrange_yields_exact_bounds() {
        // Everything present except [T0+600s, T0+720s): two 1m candles.
        let series = minute_series();
        let t0: i64 = 1_700_000_040_000;
        let actual: Vec<i64> = (0..60)
            .map(|i| t0 + i * 60_000)
            .filter(|ts| *ts < t0 + 600_000 || *ts >= t0 + 720_000)
            .collect();
        let gaps = scan_series(&series, t0, t0 + 3_600_000, &actual, t0 + 3_700_000, Scenario::Periodic, &cfg());
        assert_eq!(gaps.len(), 1);
        let gap = &gaps[0];
        assert_eq!(gap.start, t0 + 600_000);
        assert_eq!(gap.end, t0 + 720_000);
        assert_eq!(gap.records_expected, 2);
        assert_eq!(gap.kind, GapKind::Urgent);
        assert_eq!(gap.priority, 10);
    }

    #[test]
    fn separate_missing_runs_do_not_merge() {
        let series = minute_series();
        let t0: i64 = 1_700_000_040_000;
        // Missing minute 3 and minute 7, present elsewhere.
        let actual: Vec<i64> = (0..10)
            .filter(|i| *i != 3 && *i != 7)
            .map(|i| t0 + i * 60_000)
            .collect();
        let gaps = scan_series(&series, t0, t0 + 600_000, &actual, t0 + 700_000, Scenario::Periodic, &cfg());
        assert_eq!(gaps.len(), 2);
        assert_eq!((gaps[0].start, gaps[0].end), (t0 + 180_000, t0 + 240_000));
        assert_eq!((gaps[1].start, gaps[1].end), (t0 + 420_000, t0 + 480_000));
        // Non-overlapping and ordered by start.
        assert!(gaps[0].end <= gaps[1].start);
    }

    #[test]
    fn adjacent_missing_points_merge_into_one_gap() {
        let series = minute_series();
        let t0: i64 = 1_700_000_040_000;
        let actual: Vec<i64> = (0..10)
            .filter(|i| !(3..=5).contains(i))
            .map(|i| t0 + i * 60_000)
            .collect();
        let gaps = scan_series(&series, t0, t0 + 600_000, &actual, t0 + 700_000, Scenario::Periodic, &cfg());
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].records_expected, 3);
    }

    #[test]
    fn unordered_input_is_handled() {
        let series = minute_series();
        let t0: i64 = 1_700_000_040_000;
        let mut actual: Vec<i64> = (0..10).filter(|i| *i != 4).map(|i| t0 + i * 60_000).collect();
        actual.reverse();
        let gaps = scan_series(&series, t0, t0 + 600_000, &actual, t0 + 700_000, Scenario::Periodic, &cfg());
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].start, t0 + 240_000);
    }

    #[test]
    fn event_series_flags_empty_hours_as_observed() {
        let series = SeriesId::new("BTC-USDT-PERP", SeriesKind::Trades);
        let h = 3_600_000i64;
        let t0 = 1_699_999_200_000 / h * h; // hour aligned
        // Trades in hours 0, 1 and 3; hour 2 silent.
        let actual = vec![t0 + 10_000, t0 + h + 500_000, t0 + 3 * h + 1];
        let gaps = scan_series(&series, t0, t0 + 4 * h, &actual, t0 + 4 * h + 60_000, Scenario::Periodic, &cfg());
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].status, GapStatus::Observed);
        assert_eq!((gaps[0].start, gaps[0].end), (t0 + 2 * h, t0 + 3 * h));
        assert_eq!(gaps[0].records_expected, 0);
    }

    #[test]
    fn event_series_ignores_bucket_still_in_progress() {
        let series = SeriesId::new("ETH-USDT-PERP", SeriesKind::Trades);
        let h = 3_600_000i64;
        let t0 = 1_699_999_200_000 / h * h;
        // Only the first hour has activity; scan at 90 minutes in. The second
        // hour is still running and must not be flagged.
        let actual = vec![t0 + 1_000];
        let gaps = scan_series(&series, t0, t0 + 2 * h, &actual, t0 + h + 1_800_000, Scenario::Periodic, &cfg());
        assert!(gaps.is_empty());
    }
}
