//! Per-series completeness status.
//!
//! One row per (symbol, kind), overwritten on every scan and every fill.
//! The gap log is the append-only history; this is the live summary the
//! status endpoints serve.

use serde::{Deserialize, Serialize};

use crate::gap::{Gap, GapKind, GapStatus};
use crate::series::{SeriesId, TimestampMS};

/// Coarse health of a series over the checked window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeriesState {
    /// No missing expected records.
    Complete,
    /// Some data present, some expected records missing.
    Partial,
    /// No data at all in the checked window.
    Missing,
}

impl SeriesState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesState::Complete => "complete",
            SeriesState::Partial => "partial",
            SeriesState::Missing => "missing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "complete" => Some(SeriesState::Complete),
            "partial" => Some(SeriesState::Partial),
            "missing" => Some(SeriesState::Missing),
            _ => None,
        }
    }
}

/// Live status row for one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStatus {
    pub series: SeriesId,
    pub state: SeriesState,
    /// When the series was last scanned for gaps.
    pub last_check_time: TimestampMS,
    /// Newest stored record timestamp, if any.
    pub last_data_time: Option<TimestampMS>,
    /// Oldest stored record timestamp, if any.
    pub oldest_data_time: Option<TimestampMS>,
    pub data_count: u64,
    /// Worst outstanding gap kind after the last scan.
    pub gap_kind: Option<GapKind>,
    /// Priority of that worst gap, 0 when none.
    pub priority: u8,
    /// Dispatchable gaps still open after the last scan.
    pub pending_gaps: u32,
    /// Trailing edge of the oldest pending gap, for judging staleness.
    pub oldest_pending_end: Option<TimestampMS>,
    pub last_backfill_time: Option<TimestampMS>,
    /// Supersession key: a write only lands if its updated_at is not older
    /// than the stored row's.
    pub updated_at: TimestampMS,
}

/// Aggregate counts the store reports for one series without loading rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeriesOverview {
    pub data_count: u64,
    pub oldest: Option<TimestampMS>,
    pub newest: Option<TimestampMS>,
}

/// Builds status rows from scan and fill outcomes. All status mutations go
/// through here so the derivation rules live in one place.
pub struct StatusRecorder;

impl StatusRecorder {
    /// Status after a gap scan of one series.
    ///
    /// State is a quick three-way check: no data at all is `Missing`, data
    /// with outstanding dispatchable gaps is `Partial`, otherwise `Complete`.
    /// Event-only observations do not demote a series below `Complete`.
    pub fn after_scan(
        series: &SeriesId,
        overview: SeriesOverview,
        gaps: &[Gap],
        previous: Option<&SeriesStatus>,
        now: TimestampMS,
    ) -> SeriesStatus {
        let open: Vec<&Gap> = gaps
            .iter()
            .filter(|g| g.status != GapStatus::Completed && g.status != GapStatus::Observed)
            .collect();

        let state = if overview.data_count == 0 {
            SeriesState::Missing
        } else if open.is_empty() {
            SeriesState::Complete
        } else {
            SeriesState::Partial
        };

        let worst = open.iter().max_by_key(|g| g.priority);

        SeriesStatus {
            series: series.clone(),
            state,
            last_check_time: now,
            last_data_time: overview.newest,
            oldest_data_time: overview.oldest,
            data_count: overview.data_count,
            gap_kind: worst.map(|g| g.kind),
            priority: worst.map(|g| g.priority).unwrap_or(0),
            pending_gaps: open.len() as u32,
            oldest_pending_end: open.iter().map(|g| g.end).min(),
            last_backfill_time: previous.and_then(|p| p.last_backfill_time),
            updated_at: now,
        }
    }

    /// Status after a fill attempt resolved a gap (fully or partially).
    pub fn after_fill(previous: &SeriesStatus, gap: &Gap, now: TimestampMS) -> SeriesStatus {
        let mut status = previous.clone();
        status.last_backfill_time = Some(now);
        status.updated_at = now;
        if gap.status == GapStatus::Completed {
            status.data_count += gap.records_filled as u64;
            // pending_gaps is refreshed exactly on the next scan; in between,
            // a completed fill is known to have closed one.
            status.pending_gaps = status.pending_gaps.saturating_sub(1);
            if status.pending_gaps == 0 {
                status.oldest_pending_end = None;
                status.gap_kind = None;
                status.priority = 0;
                status.state = SeriesState::Complete;
            }
            let newest = status.last_data_time.unwrap_or(i64::MIN);
            if gap.end > newest {
                status.last_data_time = Some(gap.end - gap.series.kind.step_ms());
            }
            let oldest = status.oldest_data_time.unwrap_or(i64::MAX);
            if gap.start < oldest {
                status.oldest_data_time = Some(gap.start);
            }
        } else {
            status.data_count += gap.records_filled as u64;
        }
        status
    }

    /// Last-writer-wins: true when `candidate` may replace `stored`.
    pub fn supersedes(candidate: &SeriesStatus, stored: &SeriesStatus) -> bool {
        candidate.updated_at >= stored.updated_at
    }
}
