//! Idle expiry shared between a session's handle and its actor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Absolute expiry instant, refreshed on activity.
///
/// Stored as milliseconds since creation so the registry and the actor can
/// both touch it without a lock.
#[derive(Debug)]
pub struct Expiry {
    created: Instant,
    ttl: Duration,
    deadline_ms: AtomicU64,
}

impl Expiry {
    /// Starts out expiring `ttl` from now.
    pub fn new(ttl: Duration) -> Self {
        let expiry = Self {
            created: Instant::now(),
            ttl,
            deadline_ms: AtomicU64::new(0),
        };
        expiry.refresh();
        expiry
    }

    /// Push the deadline to `ttl` from now. Saturates instead of wrapping.
    pub fn refresh(&self) {
        let deadline_ms = self
            .created
            .elapsed()
            .checked_add(self.ttl)
            .and_then(|deadline| u64::try_from(deadline.as_millis()).ok())
            .unwrap_or(u64::MAX);
        self.deadline_ms.store(deadline_ms, Ordering::Release);
    }

    /// `None` when the deadline is beyond what the clock can represent.
    pub fn expires_at(&self) -> Option<Instant> {
        self.created
            .checked_add(Duration::from_millis(self.deadline_ms.load(Ordering::Acquire)))
    }

    /// True once `now` is strictly past the deadline.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at().is_some_and(|deadline| now > deadline)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_ttl() {
        let expiry = Expiry::new(Duration::from_secs(10));
        assert!(!expiry.is_expired());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!expiry.is_expired(), "deadline itself is not past");

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(expiry.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_pushes_deadline() {
        let expiry = Expiry::new(Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;
        expiry.refresh();

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(!expiry.is_expired());
        assert_eq!(
            expiry.expires_at(),
            Some(expiry.created + Duration::from_secs(18))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_ttl_never_expires() {
        let expiry = Expiry::new(Duration::from_secs(u64::MAX / 100));
        assert!(!expiry.is_expired());

        tokio::time::advance(Duration::from_secs(2)).await;
        expiry.refresh();
        assert!(!expiry.is_expired());
        assert_eq!(expiry.deadline_ms.load(Ordering::Acquire), u64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_ttl_does_not_overflow() {
        let expiry = Expiry::new(Duration::MAX);
        tokio::time::advance(Duration::from_secs(2)).await;
        expiry.refresh();
        assert!(!expiry.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_expires_immediately_after() {
        let expiry = Expiry::new(Duration::ZERO);
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(expiry.is_expired());
    }
}
