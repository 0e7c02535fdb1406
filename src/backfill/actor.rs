//! The backfill actor: owns the scan / classify / schedule / fill cycle.
//!
//! Everything stateful (scheduler queue, in-flight set, counters) lives
//! inside the actor, so the cycle runs without locks. Scans are triggered by
//! a periodic timer, by startup, or by an explicit message from an operator
//! or a connectivity watchdog.

use chrono::Utc;
use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::{ActorStopReason, BoxError};
use kameo::mailbox::unbounded::UnboundedMailbox;
use kameo::message::{Context, Message};
use kameo::request::MessageSend;
use kameo::Actor;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::pipeline::{fill_gap, PipelineConfig};
use super::scheduler::{GapScheduler, RetryDecision, SchedulerConfig};
use super::throttle::RequestThrottle;
use crate::api::HistoricalSource;
use crate::gap::{scan_series, ClassifierConfig, GapLogEntry, GapStatus, Scenario};
use crate::series::{SeriesId, SeriesKind, TimestampMS};
use crate::store::SeriesStore;
use crate::status::StatusRecorder;

const MS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    /// Symbols in canonical form ("BTC-USDT-PERP").
    pub symbols: Vec<String>,
    /// Series kind labels tracked per symbol ("candle:1m", "funding", ...).
    pub series_kinds: Vec<String>,
    pub scan_interval_secs: u64,
    /// How far back periodic and manual scans look.
    pub retention_days: u32,
    /// Gap log rows older than this are pruned.
    pub gap_log_retention_days: u32,
    /// Restart / network-recovery fallback window when no status row exists.
    pub restart_lookback_secs: u64,
    pub throttle_min_interval_ms: u64,
    pub classifier: ClassifierConfig,
    pub pipeline: PipelineConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTC-USDT-PERP".to_string()],
            series_kinds: vec!["candle:1m".to_string(), "funding".to_string()],
            scan_interval_secs: 300,
            retention_days: 30,
            gap_log_retention_days: 90,
            restart_lookback_secs: 24 * 3600,
            throttle_min_interval_ms: RequestThrottle::DEFAULT_MIN_INTERVAL_MS,
            classifier: ClassifierConfig::default(),
            pipeline: PipelineConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl BackfillConfig {
    /// The full (symbol, kind) matrix this engine tracks.
    pub fn series_list(&self) -> Vec<SeriesId> {
        let mut series = Vec::new();
        for symbol in &self.symbols {
            for label in &self.series_kinds {
                match SeriesKind::parse(label) {
                    Ok(kind) => series.push(SeriesId::new(symbol.clone(), kind)),
                    Err(e) => warn!("skipping configured series: {}", e),
                }
            }
        }
        series
    }
}

/// Fire-and-forget messages.
#[derive(Debug, Clone)]
pub enum BackfillTell {
    /// Scan every tracked series and fill what was found.
    RunGapCheck { scenario: Scenario },
    /// Re-attempt queued gaps whose backoff has elapsed.
    DrainQueue,
    /// Delete gap log rows past the retention horizon.
    PruneGapLog,
}

/// Request-response: current engine counters.
#[derive(Debug, Clone)]
pub struct GetReport;

#[derive(Debug, Clone, Default, Serialize, kameo::Reply)]
pub struct BackfillReport {
    pub scans_completed: u64,
    pub gaps_detected: u64,
    pub gaps_filled: u64,
    pub gaps_partial: u64,
    pub gaps_failed: u64,
    pub gaps_observed: u64,
    pub records_written: u64,
    pub pending: usize,
    pub in_flight: usize,
}

pub struct BackfillActor<S, H>
where
    S: SeriesStore + Send + Sync + 'static,
    H: HistoricalSource + Send + Sync + 'static,
{
    store: S,
    source: H,
    throttle: RequestThrottle,
    scheduler: GapScheduler,
    config: BackfillConfig,
    series: Vec<SeriesId>,
    report: BackfillReport,
    /// Observed event-series gaps already written to the audit log. They
    /// never resolve, so without this every rescan would append a copy.
    observed_logged: FxHashSet<(SeriesId, TimestampMS)>,
    self_ref: Option<WeakActorRef<Self>>,
}

impl<S, H> BackfillActor<S, H>
where
    S: SeriesStore + Send + Sync + 'static,
    H: HistoricalSource + Send + Sync + 'static,
{
    pub fn new(store: S, source: H, config: BackfillConfig) -> Self {
        let series = config.series_list();
        let throttle = RequestThrottle::new(config.throttle_min_interval_ms);
        let scheduler = GapScheduler::new(config.scheduler.clone());
        Self {
            store,
            source,
            throttle,
            scheduler,
            config,
            series,
            report: BackfillReport::default(),
            observed_logged: FxHashSet::default(),
            self_ref: None,
        }
    }

    fn now_ms() -> TimestampMS {
        Utc::now().timestamp_millis()
    }

    /// Scan window for one series under the given scenario.
    async fn scan_window(
        &self,
        series: &SeriesId,
        scenario: Scenario,
        now: TimestampMS,
    ) -> (TimestampMS, TimestampMS) {
        let fallback = now - self.config.restart_lookback_secs as i64 * 1000;
        let retention_start = now - self.config.retention_days as i64 * MS_PER_DAY;

        let start = match scenario {
            Scenario::Periodic | Scenario::ManualCheck => retention_start,
            Scenario::Restart => match self.store.read_status(series).await {
                Ok(Some(status)) if status.last_check_time > 0 => status.last_check_time,
                Ok(_) => fallback,
                Err(e) => {
                    warn!(series = %series, "status read failed, using fallback window: {}", e);
                    fallback
                }
            },
            Scenario::NetworkRecovery => match self.store.read_status(series).await {
                Ok(Some(status)) => status.last_data_time.unwrap_or(fallback),
                Ok(None) => fallback,
                Err(e) => {
                    warn!(series = %series, "status read failed, using fallback window: {}", e);
                    fallback
                }
            },
        };

        (start.max(retention_start), now)
    }

    async fn scan_all(&mut self, scenario: Scenario) {
        let now = Self::now_ms();
        info!(scenario = %scenario, series = self.series.len(), "starting gap check");

        // Observations that slid out of the scan horizon can never recur.
        let retention_start = now - self.config.retention_days as i64 * MS_PER_DAY;
        self.observed_logged.retain(|(_, start)| *start >= retention_start);

        for series in self.series.clone() {
            let (window_start, window_end) = self.scan_window(&series, scenario, now).await;
            let actual = match self.store.stored_timestamps(&series, window_start, window_end).await {
                Ok(actual) => actual,
                Err(e) => {
                    error!(series = %series, "skipping series, timestamp query failed: {}", e);
                    continue;
                }
            };

            let gaps =
                scan_series(&series, window_start, window_end, &actual, now, scenario, &self.config.classifier);

            let overview = match self.store.series_overview(&series).await {
                Ok(overview) => overview,
                Err(e) => {
                    error!(series = %series, "skipping series, overview query failed: {}", e);
                    continue;
                }
            };
            let previous = self.store.read_status(&series).await.ok().flatten();
            let status =
                StatusRecorder::after_scan(&series, overview, &gaps, previous.as_ref(), now);
            if let Err(e) = self.store.write_status(&status).await {
                error!(series = %series, "status write failed: {}", e);
            }

            for gap in gaps {
                self.report.gaps_detected += 1;
                if gap.status == GapStatus::Observed {
                    // One logical silence, one audit row, however many scans
                    // re-detect it.
                    if self.observed_logged.insert(gap.key()) {
                        self.report.gaps_observed += 1;
                        let entry = GapLogEntry::from_gap(&gap, None);
                        if let Err(e) = self.store.append_gap_log(&entry).await {
                            self.observed_logged.remove(&gap.key());
                            error!(series = %gap.series, "gap log append failed: {}", e);
                        }
                    }
                } else {
                    self.scheduler.enqueue(gap);
                }
            }
        }

        self.report.scans_completed += 1;
        self.drain().await;
    }

    /// Dispatch ready gaps one at a time. Sequential dispatch plus the
    /// scheduler's in-flight set gives at-most-one attempt per gap.
    async fn drain(&mut self) {
        loop {
            let now = Self::now_ms();
            let Some(gap) = self.scheduler.next_ready(now) else {
                break;
            };

            let result = fill_gap(
                &self.store,
                &self.source,
                &self.throttle,
                gap.clone(),
                &self.config.classifier,
                &self.config.pipeline,
                now,
            )
            .await;

            match result {
                Ok(outcome) => {
                    self.scheduler.complete(&outcome.gap);
                    self.report.records_written += outcome.written;
                    match outcome.gap.status {
                        GapStatus::Completed => self.report.gaps_filled += 1,
                        GapStatus::Partial => self.report.gaps_partial += 1,
                        _ => {}
                    }
                    for residual in outcome.residuals {
                        self.report.gaps_detected += 1;
                        self.scheduler.enqueue(residual);
                    }
                }
                Err(fill_error) => {
                    warn!(
                        series = %gap.series,
                        start = gap.start,
                        end = gap.end,
                        retry = gap.retry_count,
                        "fill attempt failed: {}",
                        fill_error
                    );
                    match self.scheduler.fail(gap, &fill_error, Self::now_ms()) {
                        RetryDecision::Requeued => {}
                        RetryDecision::Exhausted(failed) => {
                            self.report.gaps_failed += 1;
                            error!(
                                series = %failed.series,
                                start = failed.start,
                                end = failed.end,
                                retries = failed.retry_count,
                                "gap failed permanently"
                            );
                            let entry = GapLogEntry::from_gap(&failed, Some(Self::now_ms()))
                                .with_error(fill_error.to_string());
                            if let Err(e) = self.store.append_gap_log(&entry).await {
                                error!(series = %failed.series, "gap log append failed: {}", e);
                            }
                        }
                    }
                }
            }
        }

        self.report.pending = self.scheduler.pending();
        self.report.in_flight = self.scheduler.in_flight();
        self.schedule_wakeup();
    }

    /// If queued gaps are all backing off, arrange a DrainQueue at the
    /// earliest next_attempt_at instead of busy-waiting.
    fn schedule_wakeup(&self) {
        let Some(delay_ms) = self.scheduler.next_wakeup_ms(Self::now_ms()) else {
            return;
        };
        let Some(weak) = self.self_ref.clone() else {
            return;
        };
        let delay = std::time::Duration::from_millis(delay_ms.max(1) as u64);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(actor) = weak.upgrade() {
                if let Err(e) = actor.tell(BackfillTell::DrainQueue).send().await {
                    warn!("drain wakeup failed: {}", e);
                }
            }
        });
    }
}

impl<S, H> Actor for BackfillActor<S, H>
where
    S: SeriesStore + Send + Sync + 'static,
    H: HistoricalSource + Send + Sync + 'static,
{
    type Mailbox = UnboundedMailbox<Self>;

    fn name() -> &'static str {
        "BackfillActor"
    }

    async fn on_start(&mut self, actor_ref: ActorRef<Self>) -> Result<(), BoxError> {
        info!(
            series = self.series.len(),
            scan_interval_secs = self.config.scan_interval_secs,
            "BackfillActor starting"
        );
        self.self_ref = Some(actor_ref.downgrade());

        // Startup scan covers the window since the last recorded check.
        actor_ref.tell(BackfillTell::RunGapCheck { scenario: Scenario::Restart }).send().await?;

        let scan_ref = actor_ref.downgrade();
        let scan_interval = std::time::Duration::from_secs(self.config.scan_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scan_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(actor) = scan_ref.upgrade() else { break };
                let msg = BackfillTell::RunGapCheck { scenario: Scenario::Periodic };
                if actor.tell(msg).send().await.is_err() {
                    break;
                }
            }
        });

        let prune_ref = actor_ref.downgrade();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(86_400));
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(actor) = prune_ref.upgrade() else { break };
                if actor.tell(BackfillTell::PruneGapLog).send().await.is_err() {
                    break;
                }
            }
        });

        Ok(())
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), BoxError> {
        info!("BackfillActor stopping: {:?}", reason);
        Ok(())
    }
}

impl<S, H> Message<BackfillTell> for BackfillActor<S, H>
where
    S: SeriesStore + Send + Sync + 'static,
    H: HistoricalSource + Send + Sync + 'static,
{
    type Reply = ();

    async fn handle(&mut self, msg: BackfillTell, _ctx: Context<'_, Self, Self::Reply>) -> Self::Reply {
        match msg {
            BackfillTell::RunGapCheck { scenario } => {
                self.scan_all(scenario).await;
            }
            BackfillTell::DrainQueue => {
                self.drain().await;
            }
            BackfillTell::PruneGapLog => {
                let horizon =
                    Self::now_ms() - self.config.gap_log_retention_days as i64 * MS_PER_DAY;
                match self.store.prune_gap_log(horizon).await {
                    Ok(removed) if removed > 0 => {
                        info!(removed, "gap log pruned");
                    }
                    Ok(_) => {}
                    Err(e) => error!("gap log prune failed: {}", e),
                }
            }
        }
    }
}

impl<S, H> Message<GetReport> for BackfillActor<S, H>
where
    S: SeriesStore + Send + Sync + 'static,
    H: HistoricalSource + Send + Sync + 'static,
{
    type Reply = BackfillReport;

    async fn handle(&mut self, _msg: GetReport, _ctx: Context<'_, Self, Self::Reply>) -> Self::Reply {
        let mut report = self.report.clone();
        report.pending = self.scheduler.pending();
        report.in_flight = self.scheduler.in_flight();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::gap::GapKind;
    use crate::series::MarketRecord;
    use crate::store::memory::MemoryStore;

    struct NoopSource;

    impl HistoricalSource for NoopSource {
        async fn fetch(
            &self,
            _series: &SeriesId,
            _start: TimestampMS,
            _end: TimestampMS,
            _limit: u32,
        ) -> Result<Vec<MarketRecord>, ApiError> {
            Ok(Vec::new())
        }
    }

    fn log_entry_at(detected_at: TimestampMS) -> GapLogEntry {
        GapLogEntry {
            series: SeriesId::new("BTC-USDT-PERP", SeriesKind::Candles { interval: 60 }),
            start: detected_at - 120_000,
            end: detected_at - 60_000,
            kind: GapKind::Historical,
            priority: 2,
            scenario: Scenario::Periodic,
            records_expected: 1,
            records_filled: 0,
            outcome: GapStatus::Failed,
            error: None,
            detected_at,
            resolved_at: None,
        }
    }

    #[test]
    fn config_expands_series_matrix() {
        let config = BackfillConfig {
            symbols: vec!["BTC-USDT-PERP".to_string(), "ETH-USDT-PERP".to_string()],
            series_kinds: vec!["candle:1m".to_string(), "funding".to_string(), "bogus".to_string()],
            ..BackfillConfig::default()
        };
        let series = config.series_list();
        // Unknown labels are dropped with a warning, not an error.
        assert_eq!(series.len(), 4);
        assert!(series.contains(&SeriesId::new("BTC-USDT-PERP", SeriesKind::FundingRates)));
    }

    #[test]
    fn default_config_is_usable() {
        let config = BackfillConfig::default();
        assert!(!config.series_list().is_empty());
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.pipeline.batch_limit, 1500);
    }

    #[tokio::test]
    async fn silent_event_bucket_is_logged_once_across_scans() {
        let store = MemoryStore::new();
        let config = BackfillConfig {
            symbols: vec!["BTC-USDT-PERP".to_string()],
            series_kinds: vec!["liquidations".to_string()],
            retention_days: 3,
            throttle_min_interval_ms: 0,
            ..BackfillConfig::default()
        };
        let mut actor = BackfillActor::new(store.clone(), NoopSource, config);

        actor.scan_all(Scenario::Periodic).await;
        let logged = store.gap_log();
        assert!(!logged.is_empty());
        assert!(logged.iter().all(|e| e.outcome == GapStatus::Observed));

        // The store is unchanged, so the rescan re-detects the same silence
        // without appending another audit row.
        actor.scan_all(Scenario::Periodic).await;
        assert_eq!(store.gap_log().len(), logged.len());
        assert_eq!(actor.report.gaps_observed, logged.len() as u64);
    }

    #[tokio::test]
    async fn prune_message_removes_only_rows_past_horizon() {
        let store = MemoryStore::new();
        let now = Utc::now().timestamp_millis();
        let config = BackfillConfig { symbols: Vec::new(), ..BackfillConfig::default() };
        let horizon_days = config.gap_log_retention_days as i64;

        let stale = log_entry_at(now - (horizon_days + 1) * MS_PER_DAY);
        let fresh = log_entry_at(now - MS_PER_DAY);
        store.append_gap_log(&stale).await.unwrap();
        store.append_gap_log(&fresh).await.unwrap();

        let actor_ref = kameo::spawn(BackfillActor::new(store.clone(), NoopSource, config));
        actor_ref.tell(BackfillTell::PruneGapLog).send().await.unwrap();
        // The mailbox is FIFO: once the ask returns, the prune has run.
        let _ = actor_ref.ask(GetReport).send().await.unwrap();

        let log = store.gap_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].detected_at, fresh.detected_at);
    }
}
