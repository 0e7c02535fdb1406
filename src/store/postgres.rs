//! PostgreSQL store: one table per record kind, a live status table and the
//! append-only gap detection log. All timestamps are stored as BIGINT epoch
//! milliseconds so range predicates stay integer comparisons.

use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod};
use serde::Deserialize;
use tokio_postgres::{GenericClient, NoTls};
use tracing::{debug, info};

use super::{SeriesStore, StoreError};
use crate::gap::{GapKind, GapLogEntry, GapStatus, Scenario};
use crate::series::{interval_label, MarketRecord, SeriesId, SeriesKind, TimestampMS};
use crate::status::{SeriesOverview, SeriesState, SeriesStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_connections: usize,
    pub connection_timeout_seconds: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "market_data".to_string(),
            username: "postgres".to_string(),
            password: "password".to_string(),
            max_connections: 10,
            connection_timeout_seconds: 30,
        }
    }
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS candles (
        symbol TEXT NOT NULL,
        interval TEXT NOT NULL,
        open_time BIGINT NOT NULL,
        open DOUBLE PRECISION NOT NULL,
        high DOUBLE PRECISION NOT NULL,
        low DOUBLE PRECISION NOT NULL,
        close DOUBLE PRECISION NOT NULL,
        volume DOUBLE PRECISION NOT NULL,
        trade_count BIGINT NOT NULL,
        PRIMARY KEY (symbol, interval, open_time)
    );
    CREATE TABLE IF NOT EXISTS funding_rates (
        symbol TEXT NOT NULL,
        time BIGINT NOT NULL,
        rate DOUBLE PRECISION NOT NULL,
        mark_price DOUBLE PRECISION,
        PRIMARY KEY (symbol, time)
    );
    CREATE TABLE IF NOT EXISTS open_interest (
        symbol TEXT NOT NULL,
        time BIGINT NOT NULL,
        open_interest DOUBLE PRECISION NOT NULL,
        PRIMARY KEY (symbol, time)
    );
    CREATE TABLE IF NOT EXISTS trades (
        symbol TEXT NOT NULL,
        time BIGINT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS trades_symbol_time ON trades (symbol, time);
    CREATE TABLE IF NOT EXISTS liquidations (
        symbol TEXT NOT NULL,
        time BIGINT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS liquidations_symbol_time ON liquidations (symbol, time);
    CREATE TABLE IF NOT EXISTS series_status (
        symbol TEXT NOT NULL,
        kind TEXT NOT NULL,
        state TEXT NOT NULL,
        last_check_time BIGINT NOT NULL,
        last_data_time BIGINT,
        oldest_data_time BIGINT,
        data_count BIGINT NOT NULL,
        gap_kind TEXT,
        priority SMALLINT NOT NULL,
        pending_gaps INTEGER NOT NULL,
        oldest_pending_end BIGINT,
        last_backfill_time BIGINT,
        updated_at BIGINT NOT NULL,
        PRIMARY KEY (symbol, kind)
    );
    CREATE TABLE IF NOT EXISTS gap_detection_log (
        id BIGSERIAL PRIMARY KEY,
        symbol TEXT NOT NULL,
        kind TEXT NOT NULL,
        gap_start BIGINT NOT NULL,
        gap_end BIGINT NOT NULL,
        gap_kind TEXT NOT NULL,
        priority SMALLINT NOT NULL,
        scenario TEXT NOT NULL,
        records_expected INTEGER NOT NULL,
        records_filled INTEGER NOT NULL,
        outcome TEXT NOT NULL,
        error TEXT,
        detected_at BIGINT NOT NULL,
        resolved_at BIGINT
    );
    CREATE INDEX IF NOT EXISTS gap_log_detected_at ON gap_detection_log (detected_at);
"#;

const UPSERT_CANDLE_SQL: &str = r#"
    INSERT INTO candles (symbol, interval, open_time, open, high, low, close, volume, trade_count)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    ON CONFLICT (symbol, interval, open_time) DO UPDATE SET
        open = EXCLUDED.open,
        high = EXCLUDED.high,
        low = EXCLUDED.low,
        close = EXCLUDED.close,
        volume = EXCLUDED.volume,
        trade_count = EXCLUDED.trade_count
"#;

const UPSERT_FUNDING_SQL: &str = r#"
    INSERT INTO funding_rates (symbol, time, rate, mark_price)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (symbol, time) DO UPDATE SET
        rate = EXCLUDED.rate,
        mark_price = EXCLUDED.mark_price
"#;

const UPSERT_OPEN_INTEREST_SQL: &str = r#"
    INSERT INTO open_interest (symbol, time, open_interest)
    VALUES ($1, $2, $3)
    ON CONFLICT (symbol, time) DO UPDATE SET
        open_interest = EXCLUDED.open_interest
"#;

/// Status upsert is last-writer-wins on updated_at: a stale writer's row is
/// silently dropped instead of clobbering a newer one.
const UPSERT_STATUS_SQL: &str = r#"
    INSERT INTO series_status (symbol, kind, state, last_check_time, last_data_time,
        oldest_data_time, data_count, gap_kind, priority, pending_gaps,
        oldest_pending_end, last_backfill_time, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
    ON CONFLICT (symbol, kind) DO UPDATE SET
        state = EXCLUDED.state,
        last_check_time = EXCLUDED.last_check_time,
        last_data_time = EXCLUDED.last_data_time,
        oldest_data_time = EXCLUDED.oldest_data_time,
        data_count = EXCLUDED.data_count,
        gap_kind = EXCLUDED.gap_kind,
        priority = EXCLUDED.priority,
        pending_gaps = EXCLUDED.pending_gaps,
        oldest_pending_end = EXCLUDED.oldest_pending_end,
        last_backfill_time = EXCLUDED.last_backfill_time,
        updated_at = EXCLUDED.updated_at
    WHERE series_status.updated_at <= EXCLUDED.updated_at
"#;

const INSERT_GAP_LOG_SQL: &str = r#"
    INSERT INTO gap_detection_log (symbol, kind, gap_start, gap_end, gap_kind, priority,
        scenario, records_expected, records_filled, outcome, error, detected_at, resolved_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
"#;

#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Connect, verify the connection and bootstrap the schema.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "connecting to PostgreSQL"
        );

        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.dbname = Some(config.database.clone());
        cfg.user = Some(config.username.clone());
        cfg.password = Some(config.password.clone());
        cfg.ssl_mode = Some(deadpool_postgres::SslMode::Disable);
        cfg.manager = Some(ManagerConfig { recycling_method: RecyclingMethod::Fast });
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: config.max_connections,
            timeouts: deadpool_postgres::Timeouts::default(),
        });

        let pool = cfg
            .create_pool(None, NoTls)
            .map_err(|e| StoreError::Config(format!("Failed to create connection pool: {}", e)))?;

        let client = pool.get().await?;
        client.query_one("SELECT 1", &[]).await?;
        client.batch_execute(SCHEMA).await?;
        info!("PostgreSQL schema ready");

        Ok(Self { pool })
    }

    fn timestamp_query(series: &SeriesId) -> (String, Option<String>) {
        match series.kind {
            SeriesKind::Candles { interval } => (
                "SELECT open_time FROM candles WHERE symbol = $1 AND interval = $2 \
                 AND open_time >= $3 AND open_time < $4 ORDER BY open_time"
                    .to_string(),
                Some(interval_label(interval)),
            ),
            SeriesKind::FundingRates => (range_query("funding_rates"), None),
            SeriesKind::OpenInterest => (range_query("open_interest"), None),
            SeriesKind::Trades => (range_query("trades"), None),
            SeriesKind::Liquidations => (range_query("liquidations"), None),
        }
    }

    fn overview_query(series: &SeriesId) -> (String, Option<String>) {
        match series.kind {
            SeriesKind::Candles { interval } => (
                "SELECT COUNT(*), MIN(open_time), MAX(open_time) FROM candles \
                 WHERE symbol = $1 AND interval = $2"
                    .to_string(),
                Some(interval_label(interval)),
            ),
            SeriesKind::FundingRates => (overview_sql("funding_rates"), None),
            SeriesKind::OpenInterest => (overview_sql("open_interest"), None),
            SeriesKind::Trades => (overview_sql("trades"), None),
            SeriesKind::Liquidations => (overview_sql("liquidations"), None),
        }
    }

    async fn upsert_records<C>(
        client: &C,
        series: &SeriesId,
        records: &[MarketRecord],
    ) -> Result<u64, StoreError>
    where
        C: GenericClient + Sync,
    {
        if records.is_empty() {
            return Ok(0);
        }

        let mut written = 0u64;
        match series.kind {
            SeriesKind::Candles { interval } => {
                let stmt = client.prepare(UPSERT_CANDLE_SQL).await?;
                let label = interval_label(interval);
                for record in records {
                    let MarketRecord::Candle(c) = record else {
                        return Err(StoreError::Conversion(format!(
                            "Expected candle record for {}",
                            series
                        )));
                    };
                    written += client
                        .execute(
                            &stmt,
                            &[
                                &series.symbol,
                                &label,
                                &c.open_time,
                                &c.open,
                                &c.high,
                                &c.low,
                                &c.close,
                                &c.volume,
                                &(c.trade_count as i64),
                            ],
                        )
                        .await?;
                }
            }
            SeriesKind::FundingRates => {
                let stmt = client.prepare(UPSERT_FUNDING_SQL).await?;
                for record in records {
                    let MarketRecord::Funding(f) = record else {
                        return Err(StoreError::Conversion(format!(
                            "Expected funding record for {}",
                            series
                        )));
                    };
                    written += client
                        .execute(&stmt, &[&series.symbol, &f.time, &f.rate, &f.mark_price])
                        .await?;
                }
            }
            SeriesKind::OpenInterest => {
                let stmt = client.prepare(UPSERT_OPEN_INTEREST_SQL).await?;
                for record in records {
                    let MarketRecord::OpenInterest(o) = record else {
                        return Err(StoreError::Conversion(format!(
                            "Expected open interest record for {}",
                            series
                        )));
                    };
                    written += client
                        .execute(&stmt, &[&series.symbol, &o.time, &o.open_interest])
                        .await?;
                }
            }
            SeriesKind::Trades | SeriesKind::Liquidations => {
                return Err(StoreError::Conversion(format!(
                    "Series {} is event-driven and not backfillable",
                    series
                )));
            }
        }
        Ok(written)
    }

    async fn write_status_with<C>(client: &C, status: &SeriesStatus) -> Result<(), StoreError>
    where
        C: GenericClient + Sync,
    {
        let stmt = client.prepare(UPSERT_STATUS_SQL).await?;
        client
            .execute(
                &stmt,
                &[
                    &status.series.symbol,
                    &status.series.kind.label(),
                    &status.state.as_str(),
                    &status.last_check_time,
                    &status.last_data_time,
                    &status.oldest_data_time,
                    &(status.data_count as i64),
                    &status.gap_kind.map(|k| k.as_str()),
                    &(status.priority as i16),
                    &(status.pending_gaps as i32),
                    &status.oldest_pending_end,
                    &status.last_backfill_time,
                    &status.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn append_gap_log_with<C>(client: &C, entry: &GapLogEntry) -> Result<(), StoreError>
    where
        C: GenericClient + Sync,
    {
        let stmt = client.prepare(INSERT_GAP_LOG_SQL).await?;
        client
            .execute(
                &stmt,
                &[
                    &entry.series.symbol,
                    &entry.series.kind.label(),
                    &entry.start,
                    &entry.end,
                    &entry.kind.as_str(),
                    &(entry.priority as i16),
                    &entry.scenario.as_str(),
                    &(entry.records_expected as i32),
                    &(entry.records_filled as i32),
                    &entry.outcome.as_str(),
                    &entry.error,
                    &entry.detected_at,
                    &entry.resolved_at,
                ],
            )
            .await?;
        Ok(())
    }

    fn row_to_status(row: &tokio_postgres::Row) -> Result<SeriesStatus, StoreError> {
        let symbol: String = row.get("symbol");
        let kind_label: String = row.get("kind");
        let kind = SeriesKind::parse(&kind_label)
            .map_err(|e| StoreError::Conversion(e.to_string()))?;
        let state_label: String = row.get("state");
        let state = SeriesState::parse(&state_label)
            .ok_or_else(|| StoreError::Conversion(format!("unknown state: {}", state_label)))?;
        let gap_kind: Option<String> = row.get("gap_kind");
        let gap_kind = match gap_kind {
            Some(s) => Some(
                crate::gap::GapKind::parse(&s)
                    .ok_or_else(|| StoreError::Conversion(format!("unknown gap kind: {}", s)))?,
            ),
            None => None,
        };
        let data_count: i64 = row.get("data_count");
        let priority: i16 = row.get("priority");
        let pending_gaps: i32 = row.get("pending_gaps");

        Ok(SeriesStatus {
            series: SeriesId::new(symbol, kind),
            state,
            last_check_time: row.get("last_check_time"),
            last_data_time: row.get("last_data_time"),
            oldest_data_time: row.get("oldest_data_time"),
            data_count: data_count.max(0) as u64,
            gap_kind,
            priority: priority.clamp(0, u8::MAX as i16) as u8,
            pending_gaps: pending_gaps.max(0) as u32,
            oldest_pending_end: row.get("oldest_pending_end"),
            last_backfill_time: row.get("last_backfill_time"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_log(row: &tokio_postgres::Row) -> Result<GapLogEntry, StoreError> {
        let symbol: String = row.get("symbol");
        let kind_label: String = row.get("kind");
        let kind = SeriesKind::parse(&kind_label)
            .map_err(|e| StoreError::Conversion(e.to_string()))?;
        let gap_kind_label: String = row.get("gap_kind");
        let gap_kind = GapKind::parse(&gap_kind_label).ok_or_else(|| {
            StoreError::Conversion(format!("unknown gap kind: {}", gap_kind_label))
        })?;
        let scenario_label: String = row.get("scenario");
        let scenario = Scenario::parse(&scenario_label).ok_or_else(|| {
            StoreError::Conversion(format!("unknown scenario: {}", scenario_label))
        })?;
        let outcome_label: String = row.get("outcome");
        let outcome = GapStatus::parse(&outcome_label).ok_or_else(|| {
            StoreError::Conversion(format!("unknown outcome: {}", outcome_label))
        })?;
        let priority: i16 = row.get("priority");
        let records_expected: i32 = row.get("records_expected");
        let records_filled: i32 = row.get("records_filled");

        Ok(GapLogEntry {
            series: SeriesId::new(symbol, kind),
            start: row.get("gap_start"),
            end: row.get("gap_end"),
            kind: gap_kind,
            priority: priority.clamp(0, u8::MAX as i16) as u8,
            scenario,
            records_expected: records_expected.max(0) as u32,
            records_filled: records_filled.max(0) as u32,
            outcome,
            error: row.get("error"),
            detected_at: row.get("detected_at"),
            resolved_at: row.get("resolved_at"),
        })
    }
}

fn range_query(table: &str) -> String {
    format!(
        "SELECT time FROM {} WHERE symbol = $1 AND time >= $2 AND time < $3 ORDER BY time",
        table
    )
}

fn overview_sql(table: &str) -> String {
    format!("SELECT COUNT(*), MIN(time), MAX(time) FROM {} WHERE symbol = $1", table)
}

impl SeriesStore for PostgresStore {
    async fn stored_timestamps(
        &self,
        series: &SeriesId,
        start: TimestampMS,
        end: TimestampMS,
    ) -> Result<Vec<TimestampMS>, StoreError> {
        let client = self.pool.get().await?;
        let (sql, interval) = Self::timestamp_query(series);
        let rows = match &interval {
            Some(label) => {
                client.query(&sql, &[&series.symbol, label, &start, &end]).await?
            }
            None => client.query(&sql, &[&series.symbol, &start, &end]).await?,
        };
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn series_overview(&self, series: &SeriesId) -> Result<SeriesOverview, StoreError> {
        let client = self.pool.get().await?;
        let (sql, interval) = Self::overview_query(series);
        let row = match &interval {
            Some(label) => client.query_one(&sql, &[&series.symbol, label]).await?,
            None => client.query_one(&sql, &[&series.symbol]).await?,
        };
        let count: i64 = row.get(0);
        Ok(SeriesOverview {
            data_count: count.max(0) as u64,
            oldest: row.get(1),
            newest: row.get(2),
        })
    }

    async fn commit_fill(
        &self,
        series: &SeriesId,
        records: &[MarketRecord],
        status: &SeriesStatus,
        log: &GapLogEntry,
    ) -> Result<u64, StoreError> {
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;

        let written = Self::upsert_records(&*transaction, series, records).await?;
        Self::write_status_with(&*transaction, status).await?;
        Self::append_gap_log_with(&*transaction, log).await?;

        transaction.commit().await?;
        debug!(series = %series, written, "fill committed");
        Ok(written)
    }

    async fn write_status(&self, status: &SeriesStatus) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        Self::write_status_with(&**client, status).await
    }

    async fn read_status(&self, series: &SeriesId) -> Result<Option<SeriesStatus>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT * FROM series_status WHERE symbol = $1 AND kind = $2",
                &[&series.symbol, &series.kind.label()],
            )
            .await?;
        row.as_ref().map(Self::row_to_status).transpose()
    }

    async fn read_all_statuses(&self) -> Result<Vec<SeriesStatus>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT * FROM series_status ORDER BY symbol, kind", &[])
            .await?;
        rows.iter().map(Self::row_to_status).collect()
    }

    async fn append_gap_log(&self, entry: &GapLogEntry) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        Self::append_gap_log_with(&**client, entry).await
    }

    async fn recent_gap_log(&self, limit: u32) -> Result<Vec<GapLogEntry>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT * FROM gap_detection_log ORDER BY detected_at DESC, id DESC LIMIT $1",
                &[&(limit as i64)],
            )
            .await?;
        rows.iter().map(Self::row_to_log).collect()
    }

    async fn prune_gap_log(&self, older_than: TimestampMS) -> Result<u64, StoreError> {
        let client = self.pool.get().await?;
        let removed = client
            .execute(
                "DELETE FROM gap_detection_log WHERE detected_at < $1",
                &[&older_than],
            )
            .await?;
        if removed > 0 {
            info!(removed, "pruned gap detection log");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = PostgresConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.database, "market_data");
    }

    #[test]
    fn timestamp_query_routes_by_kind() {
        let candles = SeriesId::new("BTCUSDT", SeriesKind::Candles { interval: 300 });
        let (sql, interval) = PostgresStore::timestamp_query(&candles);
        assert!(sql.contains("FROM candles"));
        assert_eq!(interval.as_deref(), Some("5m"));

        let funding = SeriesId::new("BTCUSDT", SeriesKind::FundingRates);
        let (sql, interval) = PostgresStore::timestamp_query(&funding);
        assert!(sql.contains("FROM funding_rates"));
        assert!(interval.is_none());
    }
}
