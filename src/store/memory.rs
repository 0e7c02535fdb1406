//! In-memory store used by unit tests. Mirrors the PostgreSQL store's
//! contract: idempotent keyed upserts, status supersession and an atomic
//! commit (all-or-nothing via a single lock plus injectable failures).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use super::{SeriesStore, StoreError};
use crate::gap::GapLogEntry;
use crate::series::{MarketRecord, SeriesId, TimestampMS};
use crate::status::{SeriesOverview, SeriesStatus, StatusRecorder};

#[derive(Default)]
struct Inner {
    records: HashMap<SeriesId, BTreeMap<TimestampMS, Option<MarketRecord>>>,
    statuses: HashMap<SeriesId, SeriesStatus>,
    log: Vec<GapLogEntry>,
    fail_commits: u32,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Seed bare timestamps, as a live feed would have written them.
    pub fn insert_timestamps(&self, series: &SeriesId, timestamps: &[TimestampMS]) {
        let mut inner = self.lock();
        let map = inner.records.entry(series.clone()).or_default();
        for ts in timestamps {
            map.entry(*ts).or_insert(None);
        }
    }

    pub fn insert_records(&self, series: &SeriesId, records: &[MarketRecord]) {
        let mut inner = self.lock();
        let map = inner.records.entry(series.clone()).or_default();
        for record in records {
            map.insert(record.timestamp(), Some(record.clone()));
        }
    }

    /// Make the next `n` commit_fill calls fail.
    pub fn fail_next_commits(&self, n: u32) {
        self.lock().fail_commits = n;
    }

    pub fn gap_log(&self) -> Vec<GapLogEntry> {
        self.lock().log.clone()
    }

    pub fn status_of(&self, series: &SeriesId) -> Option<SeriesStatus> {
        self.lock().statuses.get(series).cloned()
    }

    pub fn record_count(&self, series: &SeriesId) -> usize {
        self.lock().records.get(series).map(|m| m.len()).unwrap_or(0)
    }
}

impl SeriesStore for MemoryStore {
    async fn stored_timestamps(
        &self,
        series: &SeriesId,
        start: TimestampMS,
        end: TimestampMS,
    ) -> Result<Vec<TimestampMS>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .records
            .get(series)
            .map(|m| m.range(start..end).map(|(ts, _)| *ts).collect())
            .unwrap_or_default())
    }

    async fn series_overview(&self, series: &SeriesId) -> Result<SeriesOverview, StoreError> {
        let inner = self.lock();
        let Some(map) = inner.records.get(series) else {
            return Ok(SeriesOverview::default());
        };
        Ok(SeriesOverview {
            data_count: map.len() as u64,
            oldest: map.keys().next().copied(),
            newest: map.keys().next_back().copied(),
        })
    }

    async fn commit_fill(
        &self,
        series: &SeriesId,
        records: &[MarketRecord],
        status: &SeriesStatus,
        log: &GapLogEntry,
    ) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        if inner.fail_commits > 0 {
            inner.fail_commits -= 1;
            return Err(StoreError::Config("injected commit failure".to_string()));
        }

        let map = inner.records.entry(series.clone()).or_default();
        for record in records {
            map.insert(record.timestamp(), Some(record.clone()));
        }
        let written = records.len() as u64;

        let apply = inner
            .statuses
            .get(&status.series)
            .map(|stored| StatusRecorder::supersedes(status, stored))
            .unwrap_or(true);
        if apply {
            inner.statuses.insert(status.series.clone(), status.clone());
        }
        inner.log.push(log.clone());
        Ok(written)
    }

    async fn write_status(&self, status: &SeriesStatus) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let apply = inner
            .statuses
            .get(&status.series)
            .map(|stored| StatusRecorder::supersedes(status, stored))
            .unwrap_or(true);
        if apply {
            inner.statuses.insert(status.series.clone(), status.clone());
        }
        Ok(())
    }

    async fn read_status(&self, series: &SeriesId) -> Result<Option<SeriesStatus>, StoreError> {
        Ok(self.lock().statuses.get(series).cloned())
    }

    async fn read_all_statuses(&self) -> Result<Vec<SeriesStatus>, StoreError> {
        let inner = self.lock();
        let mut statuses: Vec<SeriesStatus> = inner.statuses.values().cloned().collect();
        statuses.sort_by(|a, b| {
            (&a.series.symbol, a.series.kind.label())
                .cmp(&(&b.series.symbol, b.series.kind.label()))
        });
        Ok(statuses)
    }

    async fn append_gap_log(&self, entry: &GapLogEntry) -> Result<(), StoreError> {
        self.lock().log.push(entry.clone());
        Ok(())
    }

    async fn recent_gap_log(&self, limit: u32) -> Result<Vec<GapLogEntry>, StoreError> {
        let inner = self.lock();
        Ok(inner.log.iter().rev().take(limit as usize).cloned().collect())
    }

    async fn prune_gap_log(&self, older_than: TimestampMS) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let before = inner.log.len();
        inner.log.retain(|e| e.detected_at >= older_than);
        Ok((before - inner.log.len()) as u64)
    }
}
