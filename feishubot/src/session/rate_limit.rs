//! Per-session spacing of upstream calls.

use std::time::Duration;
use tokio::time::Instant;

/// Enforces a minimum interval between consecutive upstream calls.
///
/// Owned by a single actor, so no locking. Only the owning actor sleeps.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    /// Earliest instant the next call may be dispatched.
    pub fn next_allowed(&self) -> Option<Instant> {
        self.last_sent.map(|last| last + self.interval)
    }

    /// Wait until a call is allowed, then record the dispatch time.
    ///
    /// The timestamp is taken at dispatch, so upstream latency counts toward
    /// the interval. Returns how long the caller was held back.
    pub async fn acquire(&mut self) -> Duration {
        let mut waited = Duration::ZERO;
        if let Some(next) = self.next_allowed() {
            let now = Instant::now();
            if now < next {
                waited = next - now;
                tokio::time::sleep_until(next).await;
            }
        }
        self.last_sent = Some(Instant::now());
        waited
    }
}
