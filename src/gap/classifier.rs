//! Gap classification: age category and numeric priority.
//!
//! Pure function of (gap boundaries, now, scenario) with no hidden state,
//! so two classifications of the same inputs always agree.

use serde::Deserialize;

use super::structs::{GapKind, Scenario};
use crate::series::TimestampMS;

/// Classification thresholds and weights. These are operational tuning
/// constants, exposed through config rather than hard-coded.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Gaps ending within this many seconds of `now` are urgent.
    pub urgent_within_secs: u64,
    /// Gaps ending within this many seconds (but not urgent) are recent.
    pub recent_within_secs: u64,
    pub urgent_priority: u8,
    pub recent_priority: u8,
    pub historical_priority: u8,
    /// Added for restart / network-recovery scenarios, capped at max_priority.
    pub scenario_boost: u8,
    pub max_priority: u8,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            urgent_within_secs: 3600,
            recent_within_secs: 24 * 3600,
            urgent_priority: 10,
            recent_priority: 6,
            historical_priority: 2,
            scenario_boost: 2,
            max_priority: 10,
        }
    }
}

/// Classify a gap by the age of its trailing edge.
///
/// Operational discontinuities (restart, network recovery) tend to produce
/// narrow, high-value gaps right behind the live edge, so those scenarios
/// get a fixed priority boost over a manual audit of equal age.
pub fn classify(
    gap_end: TimestampMS,
    now: TimestampMS,
    scenario: Scenario,
    cfg: &ClassifierConfig,
) -> (GapKind, u8) {
    let age_ms = now - gap_end;
    let (kind, base) = if age_ms <= cfg.urgent_within_secs as i64 * 1000 {
        (GapKind::Urgent, cfg.urgent_priority)
    } else if age_ms <= cfg.recent_within_secs as i64 * 1000 {
        (GapKind::Recent, cfg.recent_priority)
    } else {
        (GapKind::Historical, cfg.historical_priority)
    };

    let boost = match scenario {
        Scenario::Restart | Scenario::NetworkRecovery => cfg.scenario_boost,
        Scenario::Periodic | Scenario::ManualCheck => 0,
    };

    (kind, base.saturating_add(boost).min(cfg.max_priority))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ClassifierConfig {
        ClassifierConfig::default()
    }

    #[test]
    fn recent_gap_is_urgent() {
        // Gap [T0+600s, T0+720s), now = T0+3700s: age ~2980s, under an hour.
        let t0: i64 = 1_700_000_000_000;
        let (kind, priority) = classify(t0 + 720_000, t0 + 3_700_000, Scenario::ManualCheck, &cfg());
        assert_eq!(kind, GapKind::Urgent);
        assert_eq!(priority, 10);
    }

    #[test]
    fn same_gap_a_day_later_is_historical() {
        let t0: i64 = 1_700_000_000_000;
        let (kind, priority) = classify(t0 + 720_000, t0 + 90_000_000, Scenario::ManualCheck, &cfg());
        assert_eq!(kind, GapKind::Historical);
        assert_eq!(priority, 2);
    }

    #[test]
    fn boundary_exactly_one_hour_is_still_urgent() {
        let (kind, _) = classify(0, 3_600_000, Scenario::Periodic, &cfg());
        assert_eq!(kind, GapKind::Urgent);
        let (kind, _) = classify(0, 3_600_001, Scenario::Periodic, &cfg());
        assert_eq!(kind, GapKind::Recent);
    }

    #[test]
    fn restart_boost_applies_and_caps() {
        let c = cfg();
        // Historical 2 -> 4 under restart.
        let (_, p) = classify(0, 100_000_000, Scenario::Restart, &c);
        assert_eq!(p, 4);
        // Urgent already at the cap stays there.
        let (_, p) = classify(0, 1_000, Scenario::NetworkRecovery, &c);
        assert_eq!(p, 10);
        // Manual check gets no boost.
        let (_, p) = classify(0, 100_000_000, Scenario::ManualCheck, &c);
        assert_eq!(p, 2);
    }

    #[test]
    fn pure_function() {
        let a = classify(123_456, 999_999_999, Scenario::Restart, &cfg());
        let b = classify(123_456, 999_999_999, Scenario::Restart, &cfg());
        assert_eq!(a, b);
    }
}
