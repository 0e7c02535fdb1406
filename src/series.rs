use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type TimestampMS = i64;
pub type Seconds = u64;

pub const MS_PER_SECOND: i64 = 1000;

/// Funding settlements land on UTC 00:00 / 08:00 / 16:00.
pub const FUNDING_SETTLEMENT_STEP: Seconds = 8 * 3600;
/// Open interest snapshots are published every 5 minutes.
pub const OPEN_INTEREST_STEP: Seconds = 5 * 60;

#[derive(Error, Debug)]
#[error("unknown series kind: {0}")]
pub struct ParseSeriesKindError(String);

/// The cadence of a data series decides how completeness is judged.
///
/// Interval series have an exact arithmetic expectation and can be healed by
/// a bounded range fetch. Event-driven series only support an activity check
/// per sub-window and cannot be gap-completed the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Interval { step: Seconds },
    EventDriven { granularity: Seconds },
}

/// A tracked data series kind for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeriesKind {
    /// OHLCV candles at a fixed interval (seconds).
    Candles { interval: Seconds },
    /// Funding rate settlements (8h cadence).
    FundingRates,
    /// Open interest snapshots (5m cadence).
    OpenInterest,
    /// Raw trades (event-driven).
    Trades,
    /// Forced liquidations (event-driven, sparse).
    Liquidations,
}

impl SeriesKind {
    pub fn cadence(&self) -> Cadence {
        match self {
            SeriesKind::Candles { interval } => Cadence::Interval { step: *interval },
            SeriesKind::FundingRates => Cadence::Interval { step: FUNDING_SETTLEMENT_STEP },
            SeriesKind::OpenInterest => Cadence::Interval { step: OPEN_INTEREST_STEP },
            SeriesKind::Trades => Cadence::EventDriven { granularity: 3600 },
            // One bucket per day: even liquid symbols can go hours without one.
            SeriesKind::Liquidations => Cadence::EventDriven { granularity: 86400 },
        }
    }

    /// Whether a gap in this series can be healed by a historical range fetch.
    pub fn is_fillable(&self) -> bool {
        matches!(
            self.cadence(),
            Cadence::Interval { .. }
        )
    }

    /// Interval step in milliseconds for interval series, or the activity
    /// granularity for event-driven ones.
    pub fn step_ms(&self) -> i64 {
        match self.cadence() {
            Cadence::Interval { step } => step as i64 * MS_PER_SECOND,
            Cadence::EventDriven { granularity } => granularity as i64 * MS_PER_SECOND,
        }
    }

    /// Stable identifier used for storage keys and config ("candle:1m", "funding").
    pub fn label(&self) -> String {
        match self {
            SeriesKind::Candles { interval } => format!("candle:{}", interval_label(*interval)),
            SeriesKind::FundingRates => "funding".to_string(),
            SeriesKind::OpenInterest => "open_interest".to_string(),
            SeriesKind::Trades => "trades".to_string(),
            SeriesKind::Liquidations => "liquidations".to_string(),
        }
    }

    pub fn parse(label: &str) -> Result<Self, ParseSeriesKindError> {
        match label {
            "funding" => Ok(SeriesKind::FundingRates),
            "open_interest" => Ok(SeriesKind::OpenInterest),
            "trades" => Ok(SeriesKind::Trades),
            "liquidations" => Ok(SeriesKind::Liquidations),
            other => {
                if let Some(interval) = other.strip_prefix("candle:") {
                    parse_interval(interval)
                        .map(|secs| SeriesKind::Candles { interval: secs })
                        .ok_or_else(|| ParseSeriesKindError(other.to_string()))
                } else {
                    Err(ParseSeriesKindError(other.to_string()))
                }
            }
        }
    }
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Unique identity for all status tracking: one (symbol, kind) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesId {
    pub symbol: String,
    pub kind: SeriesKind,
}

impl SeriesId {
    pub fn new(symbol: impl Into<String>, kind: SeriesKind) -> Self {
        Self { symbol: symbol.into(), kind }
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.symbol, self.kind)
    }
}

/// Human interval labels for candle kinds ("1m", "4h", "1d").
pub fn interval_label(seconds: Seconds) -> String {
    match seconds {
        s if s % 86400 == 0 => format!("{}d", s / 86400),
        s if s % 3600 == 0 => format!("{}h", s / 3600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

pub fn parse_interval(label: &str) -> Option<Seconds> {
    let (digits, unit) = label.split_at(label.len().checked_sub(1)?);
    let value: Seconds = digits.parse().ok()?;
    match unit {
        "s" => Some(value),
        "m" => Some(value * 60),
        "h" => Some(value * 3600),
        "d" => Some(value * 86400),
        _ => None,
    }
}

/// OHLCV candle in the store's canonical schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: TimestampMS,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trade_count: u64,
}

/// Funding rate settlement record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    pub time: TimestampMS,
    pub rate: f64,
    pub mark_price: Option<f64>,
}

/// Open interest snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenInterest {
    pub time: TimestampMS,
    pub open_interest: f64,
}

/// A single normalized record of any series kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketRecord {
    Candle(Candle),
    Funding(FundingRate),
    OpenInterest(OpenInterest),
}

impl MarketRecord {
    pub fn timestamp(&self) -> TimestampMS {
        match self {
            MarketRecord::Candle(c) => c.open_time,
            MarketRecord::Funding(f) => f.time,
            MarketRecord::OpenInterest(o) => o.time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels_round_trip() {
        let kinds = [
            SeriesKind::Candles { interval: 60 },
            SeriesKind::Candles { interval: 14400 },
            SeriesKind::Candles { interval: 86400 },
            SeriesKind::FundingRates,
            SeriesKind::OpenInterest,
            SeriesKind::Trades,
            SeriesKind::Liquidations,
        ];
        for kind in kinds {
            assert_eq!(SeriesKind::parse(&kind.label()).unwrap(), kind);
        }
    }

    #[test]
    fn candle_label_uses_largest_unit() {
        assert_eq!(SeriesKind::Candles { interval: 60 }.label(), "candle:1m");
        assert_eq!(SeriesKind::Candles { interval: 1800 }.label(), "candle:30m");
        assert_eq!(SeriesKind::Candles { interval: 14400 }.label(), "candle:4h");
        assert_eq!(SeriesKind::Candles { interval: 86400 }.label(), "candle:1d");
    }

    #[test]
    fn cadence_dispatch() {
        assert_eq!(
            SeriesKind::FundingRates.cadence(),
            Cadence::Interval { step: 28800 }
        );
        assert!(matches!(
            SeriesKind::Trades.cadence(),
            Cadence::EventDriven { granularity: 3600 }
        ));
        assert!(SeriesKind::Candles { interval: 60 }.is_fillable());
        assert!(!SeriesKind::Liquidations.is_fillable());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(SeriesKind::parse("candle:banana").is_err());
        assert!(SeriesKind::parse("ticks").is_err());
    }
}
