//! Shared request pacing for the historical API.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum spacing between outbound API requests, shared by every
/// fill running against the same source. Holding the lock across the sleep
/// serializes waiters, which is exactly the pacing we want.
pub struct RequestThrottle {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestThrottle {
    /// Default spacing of 50ms keeps us at roughly 20 requests per second,
    /// well inside Binance's published request weight limits.
    pub const DEFAULT_MIN_INTERVAL_MS: u64 = 50;

    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval: Duration::from_millis(min_interval_ms),
            last_request: Mutex::new(None),
        }
    }

    /// Wait until the next request is allowed, then claim the slot.
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl Default for RequestThrottle {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MIN_INTERVAL_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enforces_minimum_spacing() {
        let throttle = RequestThrottle::new(20);
        let started = Instant::now();
        throttle.acquire().await;
        throttle.acquire().await;
        throttle.acquire().await;
        // Two spacings of 20ms after the free first slot.
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn first_request_is_immediate() {
        let throttle = RequestThrottle::new(1000);
        let started = Instant::now();
        throttle.acquire().await;
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
