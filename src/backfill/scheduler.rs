//! Priority scheduling of detected gaps.
//!
//! The scheduler is a plain data structure driven by the backfill actor, so
//! its ordering and retry policy are directly testable without any async
//! machinery. Retry state lives on the `Gap` itself and survives requeues.

use rustc_hash::FxHashSet;
use serde::Deserialize;

use super::errors::FillError;
use crate::gap::{Gap, GapStatus};
use crate::series::{SeriesId, TimestampMS};

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Transient failures retried this many times before the gap fails.
    pub max_retries: u32,
    /// First backoff delay; doubles on each further retry.
    pub base_backoff_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_retries: 3, base_backoff_secs: 2 }
    }
}

/// What became of a failed attempt.
#[derive(Debug)]
pub enum RetryDecision {
    /// Requeued with backoff; will surface again via `next_ready`.
    Requeued,
    /// Retries exhausted or failure permanent. Carries the terminal gap so
    /// the caller can record it.
    Exhausted(Gap),
}

pub struct GapScheduler {
    config: SchedulerConfig,
    queue: Vec<Gap>,
    in_flight: FxHashSet<(SeriesId, TimestampMS)>,
}

impl GapScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config, queue: Vec::new(), in_flight: FxHashSet::default() }
    }

    /// Add a gap unless one with the same identity is already queued or in
    /// flight. Non-fillable gaps are never accepted.
    pub fn enqueue(&mut self, gap: Gap) -> bool {
        if gap.status == GapStatus::Observed || !gap.series.kind.is_fillable() {
            return false;
        }
        let key = gap.key();
        if self.in_flight.contains(&key) || self.queue.iter().any(|g| g.key() == key) {
            return false;
        }
        self.queue.push(gap);
        true
    }

    pub fn enqueue_all(&mut self, gaps: impl IntoIterator<Item = Gap>) -> usize {
        gaps.into_iter().filter(|g| self.enqueue(g.clone())).count()
    }

    /// Take the best dispatchable gap, marking it in flight.
    ///
    /// Order is total and deterministic: priority descending, then the
    /// older gap first (earlier trailing edge), then series identity and
    /// start. Gaps whose backoff has not elapsed are skipped.
    pub fn next_ready(&mut self, now: TimestampMS) -> Option<Gap> {
        let best = self
            .queue
            .iter()
            .enumerate()
            .filter(|(_, g)| g.next_attempt_at <= now)
            .min_by(|(_, a), (_, b)| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.end.cmp(&b.end))
                    .then(a.series.symbol.cmp(&b.series.symbol))
                    .then(a.series.kind.label().cmp(&b.series.kind.label()))
                    .then(a.start.cmp(&b.start))
            })
            .map(|(i, _)| i)?;

        let mut gap = self.queue.swap_remove(best);
        gap.status = GapStatus::InFlight;
        self.in_flight.insert(gap.key());
        Some(gap)
    }

    /// Release a gap that finished (completed or partially committed).
    pub fn complete(&mut self, gap: &Gap) {
        self.in_flight.remove(&gap.key());
    }

    /// Release a failed gap and decide whether it gets another attempt.
    pub fn fail(&mut self, mut gap: Gap, error: &FillError, now: TimestampMS) -> RetryDecision {
        self.in_flight.remove(&gap.key());

        if error.is_transient() && gap.retry_count < self.config.max_retries {
            gap.retry_count += 1;
            gap.status = GapStatus::Pending;
            gap.next_attempt_at = now + self.backoff_ms(gap.retry_count);
            self.queue.push(gap);
            RetryDecision::Requeued
        } else {
            gap.status = GapStatus::Failed;
            RetryDecision::Exhausted(gap)
        }
    }

    /// Exponential backoff for the n-th retry (n starting at 1).
    fn backoff_ms(&self, retry: u32) -> i64 {
        let factor = 1u64 << (retry - 1).min(16);
        (self.config.base_backoff_secs * factor * 1000) as i64
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Milliseconds until the earliest queued gap becomes dispatchable, if
    /// everything queued is still backing off.
    pub fn next_wakeup_ms(&self, now: TimestampMS) -> Option<i64> {
        if self.queue.iter().any(|g| g.next_attempt_at <= now) {
            return Some(0);
        }
        self.queue.iter().map(|g| g.next_attempt_at - now).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gap::{GapKind, Scenario};
    use crate::series::SeriesKind;

    fn gap(symbol: &str, start: i64, end: i64, priority: u8, now: i64) -> Gap {
        Gap {
            series: SeriesId::new(symbol, SeriesKind::Candles { interval: 60 }),
            start,
            end,
            kind: GapKind::Recent,
            priority,
            scenario: Scenario::Periodic,
            status: GapStatus::Pending,
            records_expected: ((end - start) / 60_000) as u32,
            records_filled: 0,
            retry_count: 0,
            next_attempt_at: now,
            detected_at: now,
        }
    }

    #[test]
    fn dispatch_order_is_priority_then_oldest_edge() {
        let now = 1_700_000_000_000;
        let mut sched = GapScheduler::new(SchedulerConfig::default());
        let low = gap("BTC-USDT-PERP", now - 90_000_000, now - 89_000_000, 2, now);
        let high_old = gap("BTC-USDT-PERP", now - 3_000_000, now - 2_400_000, 10, now);
        let high_new = gap("BTC-USDT-PERP", now - 1_200_000, now - 600_000, 10, now);
        sched.enqueue_all([low.clone(), high_old.clone(), high_new.clone()]);

        // Equal priority: the older gap goes first.
        assert_eq!(sched.next_ready(now).unwrap().start, high_old.start);
        assert_eq!(sched.next_ready(now).unwrap().start, high_new.start);
        assert_eq!(sched.next_ready(now).unwrap().start, low.start);
        assert!(sched.next_ready(now).is_none());
    }

    #[test]
    fn order_is_deterministic_across_insert_orders() {
        let now = 1_700_000_000_000;
        let gaps = [
            gap("ETH-USDT-PERP", now - 600_000, now - 300_000, 10, now),
            gap("BTC-USDT-PERP", now - 600_000, now - 300_000, 10, now),
            gap("BTC-USDT-PERP", now - 7_200_000, now - 6_000_000, 6, now),
        ];

        let mut forward = GapScheduler::new(SchedulerConfig::default());
        forward.enqueue_all(gaps.clone());
        let mut reversed = GapScheduler::new(SchedulerConfig::default());
        reversed.enqueue_all(gaps.iter().rev().cloned());

        for _ in 0..3 {
            let a = forward.next_ready(now).unwrap();
            let b = reversed.next_ready(now).unwrap();
            assert_eq!(a.key(), b.key());
        }
    }

    #[test]
    fn duplicate_identity_is_rejected_until_released() {
        let now = 1_700_000_000_000;
        let mut sched = GapScheduler::new(SchedulerConfig::default());
        let g = gap("BTC-USDT-PERP", now - 600_000, now - 300_000, 10, now);

        assert!(sched.enqueue(g.clone()));
        assert!(!sched.enqueue(g.clone()));

        let dispatched = sched.next_ready(now).unwrap();
        // Still in flight: the same identity must not be queued again.
        assert!(!sched.enqueue(g.clone()));
        assert_eq!(sched.in_flight(), 1);

        sched.complete(&dispatched);
        assert!(sched.enqueue(g));
    }

    #[test]
    fn transient_failures_back_off_then_exhaust() {
        let now = 1_700_000_000_000;
        let cfg = SchedulerConfig { max_retries: 3, base_backoff_secs: 2 };
        let mut sched = GapScheduler::new(cfg);
        sched.enqueue(gap("BTC-USDT-PERP", now - 600_000, now - 300_000, 10, now));
        let err = FillError::Transient("timeout".to_string());

        let mut clock = now;
        for expected_delay in [2_000, 4_000, 8_000] {
            let g = sched.next_ready(clock).unwrap();
            match sched.fail(g, &err, clock) {
                RetryDecision::Requeued => {}
                RetryDecision::Exhausted(_) => panic!("retries not yet exhausted"),
            }
            // Not dispatchable before the backoff elapses.
            assert!(sched.next_ready(clock + expected_delay - 1).is_none());
            clock += expected_delay;
        }

        let g = sched.next_ready(clock).unwrap();
        assert_eq!(g.retry_count, 3);
        match sched.fail(g, &err, clock) {
            RetryDecision::Exhausted(failed) => {
                assert_eq!(failed.status, GapStatus::Failed);
                assert_eq!(failed.retry_count, 3);
            }
            RetryDecision::Requeued => panic!("fourth failure must exhaust"),
        }
        assert_eq!(sched.pending(), 0);
        assert_eq!(sched.in_flight(), 0);
    }

    #[test]
    fn permanent_failure_exhausts_immediately() {
        let now = 1_700_000_000_000;
        let mut sched = GapScheduler::new(SchedulerConfig::default());
        sched.enqueue(gap("BTC-USDT-PERP", now - 600_000, now - 300_000, 10, now));
        let g = sched.next_ready(now).unwrap();
        let err = FillError::Permanent("bad payload".to_string());
        assert!(matches!(sched.fail(g, &err, now), RetryDecision::Exhausted(_)));
    }

    #[test]
    fn observed_and_event_gaps_are_not_queued() {
        let now = 1_700_000_000_000;
        let mut sched = GapScheduler::new(SchedulerConfig::default());
        let mut observed = gap("BTC-USDT-PERP", now - 600_000, now - 300_000, 10, now);
        observed.status = GapStatus::Observed;
        assert!(!sched.enqueue(observed));

        let mut event = gap("BTC-USDT-PERP", now - 600_000, now - 300_000, 10, now);
        event.series = SeriesId::new("BTC-USDT-PERP", SeriesKind::Trades);
        assert!(!sched.enqueue(event));
    }

    #[test]
    fn wakeup_hint_reflects_backoff() {
        let now = 1_700_000_000_000;
        let mut sched = GapScheduler::new(SchedulerConfig::default());
        sched.enqueue(gap("BTC-USDT-PERP", now - 600_000, now - 300_000, 10, now));
        assert_eq!(sched.next_wakeup_ms(now), Some(0));

        let g = sched.next_ready(now).unwrap();
        sched.fail(g, &FillError::Transient("x".to_string()), now);
        assert_eq!(sched.next_wakeup_ms(now), Some(2_000));
    }
}
