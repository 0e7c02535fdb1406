pub mod binance;
pub mod types;

use std::future::Future;

pub use binance::BinanceFuturesClient;
pub use types::{ApiConfig, ApiError};

use crate::series::{MarketRecord, SeriesId, TimestampMS};

/// A historical market-data source the backfill pipeline can draw from.
///
/// Contract: at most `limit` records per call, ascending time order. The
/// caller owns throttling; implementations do not sleep.
pub trait HistoricalSource: Send + Sync {
    fn fetch(
        &self,
        series: &SeriesId,
        start: TimestampMS,
        end: TimestampMS,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<MarketRecord>, ApiError>> + Send;
}
