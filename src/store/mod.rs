//! Persistence seam for market records, status rows and the gap log.

pub mod postgres;

#[cfg(test)]
pub mod memory;

use std::future::Future;

use thiserror::Error;

pub use postgres::{PostgresConfig, PostgresStore};

use crate::gap::GapLogEntry;
use crate::series::{MarketRecord, SeriesId, TimestampMS};
use crate::status::{SeriesOverview, SeriesStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database connection error: {0}")]
    Connection(#[from] tokio_postgres::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Database configuration error: {0}")]
    Config(String),

    #[error("Data conversion error: {0}")]
    Conversion(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// Storage operations the gap engine needs.
///
/// All record writes are idempotent upserts keyed on (symbol, kind,
/// timestamp): re-filling an already-filled range changes nothing.
pub trait SeriesStore: Send + Sync {
    /// Timestamps stored for one series in `[start, end)`, ascending.
    fn stored_timestamps(
        &self,
        series: &SeriesId,
        start: TimestampMS,
        end: TimestampMS,
    ) -> impl Future<Output = Result<Vec<TimestampMS>, StoreError>> + Send;

    /// Aggregate count and time bounds for one series, without loading rows.
    fn series_overview(
        &self,
        series: &SeriesId,
    ) -> impl Future<Output = Result<SeriesOverview, StoreError>> + Send;

    /// Atomically upsert fetched records, the updated status row and the gap
    /// log entry for one resolved gap. Either all three land or none do.
    /// Returns the number of record rows written.
    fn commit_fill(
        &self,
        series: &SeriesId,
        records: &[MarketRecord],
        status: &SeriesStatus,
        log: &GapLogEntry,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Upsert a status row, honoring updated_at supersession.
    fn write_status(
        &self,
        status: &SeriesStatus,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn read_status(
        &self,
        series: &SeriesId,
    ) -> impl Future<Output = Result<Option<SeriesStatus>, StoreError>> + Send;

    fn read_all_statuses(
        &self,
    ) -> impl Future<Output = Result<Vec<SeriesStatus>, StoreError>> + Send;

    /// Append one audit row to the gap detection log.
    fn append_gap_log(
        &self,
        entry: &GapLogEntry,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Most recent gap log rows, newest first, capped at `limit`.
    fn recent_gap_log(
        &self,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<GapLogEntry>, StoreError>> + Send;

    /// Delete gap log rows detected before `older_than`. Returns rows removed.
    fn prune_gap_log(
        &self,
        older_than: TimestampMS,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;
}
