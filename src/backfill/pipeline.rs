//! Fetch-and-store pipeline for a single gap.
//!
//! One gap is filled by walking its range in batch-sized sub-ranges, pulling
//! each from the historical source under the shared throttle, validating and
//! normalizing the records, and committing records, status row and gap log
//! entry in one transaction. Partial recoveries commit what arrived and
//! report residual gaps instead of looping forever on the same range.

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::errors::FillError;
use super::throttle::RequestThrottle;
use crate::api::HistoricalSource;
use crate::gap::{scan_series, ClassifierConfig, Gap, GapLogEntry, GapStatus};
use crate::series::{MarketRecord, TimestampMS};
use crate::store::SeriesStore;
use crate::status::StatusRecorder;

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Records per API request, clamped further by per-endpoint limits.
    pub batch_limit: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { batch_limit: 1500 }
    }
}

/// Result of one committed fill attempt.
#[derive(Debug)]
pub struct FillOutcome {
    /// The gap with its final status and fill counts.
    pub gap: Gap,
    /// Sub-ranges still missing after a partial recovery, already classified.
    pub residuals: Vec<Gap>,
    /// Record rows written by the commit.
    pub written: u64,
}

/// Fill one gap end to end. On success the store has been updated
/// atomically; on error nothing was committed and the caller decides
/// whether to retry.
pub async fn fill_gap<S, H>(
    store: &S,
    source: &H,
    throttle: &RequestThrottle,
    mut gap: Gap,
    classifier: &ClassifierConfig,
    config: &PipelineConfig,
    now: TimestampMS,
) -> Result<FillOutcome, FillError>
where
    S: SeriesStore,
    H: HistoricalSource,
{
    if !gap.series.kind.is_fillable() {
        return Err(FillError::Permanent(format!(
            "series {} is event-driven and cannot be range-filled",
            gap.series
        )));
    }

    let step_ms = gap.series.kind.step_ms();
    let span_ms = step_ms.saturating_mul(config.batch_limit as i64);

    let mut records: Vec<MarketRecord> = Vec::with_capacity(gap.records_expected as usize);
    let mut cursor = gap.start;
    while cursor < gap.end {
        let chunk_end = gap.end.min(cursor + span_ms);
        throttle.acquire().await;
        let batch = source
            .fetch(&gap.series, cursor, chunk_end, config.batch_limit)
            .await
            .map_err(FillError::from)?;
        debug!(
            series = %gap.series,
            chunk_start = cursor,
            chunk_end,
            fetched = batch.len(),
            "fetched gap chunk"
        );
        records.extend(batch);
        cursor = chunk_end;
    }

    let records = normalize(&gap, records)?;
    if records.is_empty() {
        // The source answered but had nothing for this range. Treat as
        // transient so the retry path decides when to give up.
        return Err(FillError::Transient(format!(
            "source returned no records for {} [{}, {})",
            gap.series, gap.start, gap.end
        )));
    }

    let filled_ts: Vec<TimestampMS> = records.iter().map(|r| r.timestamp()).collect();
    let residuals =
        scan_series(&gap.series, gap.start, gap.end, &filled_ts, now, gap.scenario, classifier);

    gap.records_filled = records.len() as u32;
    gap.status = if residuals.is_empty() { GapStatus::Completed } else { GapStatus::Partial };

    let status = match store.read_status(&gap.series).await? {
        Some(previous) => StatusRecorder::after_fill(&previous, &gap, now),
        None => {
            let overview = store.series_overview(&gap.series).await?;
            let mut status =
                StatusRecorder::after_scan(&gap.series, overview, &residuals, None, now);
            status.data_count += gap.records_filled as u64;
            status.last_backfill_time = Some(now);
            status
        }
    };

    let log = GapLogEntry::from_gap(&gap, Some(now));
    let written = store.commit_fill(&gap.series, &records, &status, &log).await?;

    if residuals.is_empty() {
        info!(
            series = %gap.series,
            start = gap.start,
            end = gap.end,
            written,
            "gap filled"
        );
    } else {
        warn!(
            series = %gap.series,
            start = gap.start,
            end = gap.end,
            written,
            residuals = residuals.len(),
            "gap partially filled"
        );
    }

    Ok(FillOutcome { gap, residuals, written })
}

/// Validate and normalize fetched records: reject unusable values, drop
/// out-of-range timestamps, sort ascending and deduplicate by timestamp.
fn normalize(gap: &Gap, records: Vec<MarketRecord>) -> Result<Vec<MarketRecord>, FillError> {
    let mut kept = Vec::with_capacity(records.len());
    for record in records {
        validate_values(&record)?;
        let ts = record.timestamp();
        if ts < gap.start || ts >= gap.end {
            debug!(
                series = %gap.series,
                timestamp = ts,
                "dropping record outside requested range"
            );
            continue;
        }
        kept.push(record);
    }
    kept.sort_by_key(|r| r.timestamp());
    kept.dedup_by_key(|r| r.timestamp());
    Ok(kept)
}

/// Value sanity checks. Bad values will not improve on retry, so they are
/// permanent failures. Funding rates are legitimately negative.
fn validate_values(record: &MarketRecord) -> Result<(), FillError> {
    let ok = match record {
        MarketRecord::Candle(c) => {
            [c.open, c.high, c.low, c.close].iter().all(|p| p.is_finite() && *p >= 0.0)
                && c.volume.is_finite()
                && c.volume >= 0.0
        }
        MarketRecord::Funding(f) => {
            f.rate.is_finite()
                && f.mark_price.map(|p| p.is_finite() && p >= 0.0).unwrap_or(true)
        }
        MarketRecord::OpenInterest(o) => o.open_interest.is_finite() && o.open_interest >= 0.0,
    };
    if ok {
        Ok(())
    } else {
        Err(FillError::Permanent(format!(
            "source returned invalid values at {}",
            record.timestamp()
        )))
    }
}
