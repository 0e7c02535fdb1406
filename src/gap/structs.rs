use std::fmt;

use serde::{Deserialize, Serialize};

use crate::series::{SeriesId, TimestampMS};

/// Age category of a gap, relative to scan time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GapKind {
    Urgent,
    Recent,
    Historical,
}

impl GapKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapKind::Urgent => "urgent",
            GapKind::Recent => "recent",
            GapKind::Historical => "historical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "urgent" => Some(GapKind::Urgent),
            "recent" => Some(GapKind::Recent),
            "historical" => Some(GapKind::Historical),
            _ => None,
        }
    }
}

impl fmt::Display for GapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fill lifecycle of a gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapStatus {
    Pending,
    InFlight,
    Completed,
    /// Fewer records than expected were recovered; a residual gap was queued.
    Partial,
    /// Retries exhausted or the source data is unusable. Surfaced, never dropped.
    Failed,
    /// Event-driven series: recorded for monitoring, not dispatchable.
    Observed,
}

impl GapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapStatus::Pending => "pending",
            GapStatus::InFlight => "in_flight",
            GapStatus::Completed => "completed",
            GapStatus::Partial => "partial",
            GapStatus::Failed => "failed",
            GapStatus::Observed => "observed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(GapStatus::Pending),
            "in_flight" => Some(GapStatus::InFlight),
            "completed" => Some(GapStatus::Completed),
            "partial" => Some(GapStatus::Partial),
            "failed" => Some(GapStatus::Failed),
            "observed" => Some(GapStatus::Observed),
            _ => None,
        }
    }
}

/// Triggering context for a gap scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scenario {
    /// Fixed-interval scan over the full retention horizon.
    Periodic,
    /// Startup scan covering the window since the last recorded check.
    Restart,
    /// Scan after a detected connectivity loss of the live feed.
    NetworkRecovery,
    /// Operator-requested audit.
    ManualCheck,
}

impl Scenario {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Periodic => "periodic",
            Scenario::Restart => "restart",
            Scenario::NetworkRecovery => "network_recovery",
            Scenario::ManualCheck => "manual_check",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "periodic" => Some(Scenario::Periodic),
            "restart" => Some(Scenario::Restart),
            "network_recovery" => Some(Scenario::NetworkRecovery),
            "manual_check" => Some(Scenario::ManualCheck),
            _ => None,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous range of expected-but-absent data points for one series.
///
/// `start` and `end` are exact expected timestamps bounding a maximal missing
/// run; `end` is exclusive. Retry state lives on the entity so a scheduling
/// pass can resume correctly after a restart instead of relying on an
/// in-memory call stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub series: SeriesId,
    pub start: TimestampMS,
    pub end: TimestampMS,
    pub kind: GapKind,
    pub priority: u8,
    /// Scan context this gap was detected under; retries keep it, so the
    /// audit trail records the original trigger.
    pub scenario: Scenario,
    pub status: GapStatus,
    pub records_expected: u32,
    pub records_filled: u32,
    pub retry_count: u32,
    /// Earliest time this gap may be attempted again (backoff as data).
    pub next_attempt_at: TimestampMS,
    pub detected_at: TimestampMS,
}

impl Gap {
    /// Key identifying one gap occurrence for in-flight tracking.
    pub fn key(&self) -> (SeriesId, TimestampMS) {
        (self.series.clone(), self.start)
    }
}

/// Immutable audit row written once per detected gap occurrence with its
/// final outcome. Pruned after a bounded retention window; the per-series
/// status row stays authoritative for live state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapLogEntry {
    pub series: SeriesId,
    pub start: TimestampMS,
    pub end: TimestampMS,
    pub kind: GapKind,
    pub priority: u8,
    pub scenario: Scenario,
    pub records_expected: u32,
    pub records_filled: u32,
    pub outcome: GapStatus,
    pub error: Option<String>,
    pub detected_at: TimestampMS,
    pub resolved_at: Option<TimestampMS>,
}

impl GapLogEntry {
    pub fn from_gap(gap: &Gap, resolved_at: Option<TimestampMS>) -> Self {
        Self {
            series: gap.series.clone(),
            start: gap.start,
            end: gap.end,
            kind: gap.kind,
            priority: gap.priority,
            scenario: gap.scenario,
            records_expected: gap.records_expected,
            records_filled: gap.records_filled,
            outcome: gap.status,
            error: None,
            detected_at: gap.detected_at,
            resolved_at,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
