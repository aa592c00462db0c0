//! Core rate limiter implementation.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};

use super::backend::{CounterStore, StoreResult};
use super::counter::{expiry_after, MAX_WINDOW_SECS};
use super::key::CounterKey;
use super::policy::LimitPolicy;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Effective quota for this caller and category
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Unix timestamp at which the bucket lapses
    pub reset_at: i64,
    /// Window length in seconds
    pub window_seconds: u64,
}

impl Decision {
    /// Seconds until the bucket lapses, never negative.
    pub fn retry_after(&self, now: i64) -> u64 {
        self.reset_at.saturating_sub(now).max(0) as u64
    }
}

/// The rate decision engine.
///
/// Combines a [`LimitPolicy`] with a [`CounterStore`]. This struct is
/// thread-safe and can be shared across multiple tasks.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    policy: Arc<LimitPolicy>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a new rate limiter over the given store and policy.
    pub fn new(store: Arc<dyn CounterStore>, policy: Arc<LimitPolicy>) -> Self {
        Self::with_clock(store, policy, Arc::new(SystemClock::new()))
    }

    /// Create a rate limiter that reads time from `clock`.
    pub fn with_clock(
        store: Arc<dyn CounterStore>,
        policy: Arc<LimitPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
        }
    }

    /// Check the rate limit for a subject and category.
    ///
    /// Counts the request if it is admitted. The read, the comparison against
    /// the quota, and the increment happen as one atomic store operation, so
    /// concurrent checks on the same key admit at most `limit` requests.
    pub async fn check(
        &self,
        subject: &str,
        category: &str,
        is_privileged: bool,
        window: Option<u64>,
    ) -> StoreResult<Decision> {
        let key = CounterKey::new(subject, category);
        let limit = self.policy.limit_for(category, is_privileged);
        let window_seconds = window
            .unwrap_or_else(|| self.policy.default_window())
            .min(MAX_WINDOW_SECS);

        trace!(key = %key, limit, window_seconds, "Checking rate limit");

        let acquire = self.store.try_acquire(&key, limit, window_seconds).await?;
        let now = self.clock.now();

        let decision = Decision {
            allowed: acquire.admitted,
            limit,
            remaining: limit - acquire.count.min(limit),
            reset_at: acquire
                .expires_at
                .unwrap_or_else(|| expiry_after(now, window_seconds)),
            window_seconds,
        };

        if !decision.allowed {
            debug!(
                key = %key,
                count = acquire.count,
                limit,
                reset_at = decision.reset_at,
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }

    /// Read the current state for a subject and category without counting.
    pub async fn inspect(
        &self,
        subject: &str,
        category: &str,
        is_privileged: bool,
    ) -> StoreResult<Decision> {
        let key = CounterKey::new(subject, category);
        let limit = self.policy.limit_for(category, is_privileged);
        let window_seconds = self.policy.default_window();

        let count = self.store.get(&key).await?.unwrap_or(0);
        let expiry = self.store.get_expiry(&key).await?;
        let now = self.clock.now();

        Ok(Decision {
            allowed: count < limit,
            limit,
            remaining: limit - count.min(limit),
            reset_at: expiry.unwrap_or_else(|| expiry_after(now, window_seconds)),
            window_seconds,
        })
    }

    /// Delete the counter for a subject and category.
    pub async fn reset(&self, subject: &str, category: &str) -> StoreResult<()> {
        let key = CounterKey::new(subject, category);
        debug!(key = %key, "Resetting rate limit counter");
        self.store.delete(&key).await
    }

    /// The policy this limiter enforces.
    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    /// Name of the counter store backend.
    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// The clock this limiter reads time from.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::ratelimit::MemoryCounterStore;

    const START: i64 = 1_700_000_000;

    fn limiter(policy: LimitPolicy) -> (RateLimiter, MockClock) {
        let clock = MockClock::new(START);
        let store = MemoryCounterStore::with_clock(Arc::new(clock.clone()));
        let limiter = RateLimiter::with_clock(
            Arc::new(store),
            Arc::new(policy),
            Arc::new(clock.clone()),
        );
        (limiter, clock)
    }

    #[tokio::test]
    async fn test_remaining_counts_down_then_denies() {
        let (limiter, _) = limiter(LimitPolicy::new(5, 60, 5.0));

        for expected in [4, 3, 2, 1, 0] {
            let decision = limiter.check("ip:10.0.0.1", "default", false, None).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.limit, 5);
            assert_eq!(decision.remaining, expected);
            assert_eq!(decision.window_seconds, 60);
        }

        let decision = limiter.check("ip:10.0.0.1", "default", false, None).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_privileged_limit() {
        let (limiter, _) = limiter(LimitPolicy::new(5, 60, 5.0));

        for i in 1..=25 {
            let decision = limiter.check("user:1", "default", true, None).await.unwrap();
            assert!(decision.allowed, "request {} should be allowed", i);
            assert_eq!(decision.limit, 25);
        }

        let decision = limiter.check("user:1", "default", true, None).await.unwrap();
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn test_categories_are_independent() {
        let (limiter, _) = limiter(LimitPolicy::new(5, 60, 5.0).with_limit("git_commit", 10));

        for _ in 0..5 {
            assert!(limiter.check("ip:10.0.0.1", "default", false, None).await.unwrap().allowed);
        }
        assert!(!limiter.check("ip:10.0.0.1", "default", false, None).await.unwrap().allowed);

        for _ in 0..10 {
            assert!(limiter.check("ip:10.0.0.1", "git_commit", false, None).await.unwrap().allowed);
        }
        assert!(!limiter.check("ip:10.0.0.1", "git_commit", false, None).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_renewed_window() {
        let (limiter, clock) = limiter(LimitPolicy::new(100, 60, 5.0));

        let first = limiter.check("ip:1.2.3.4", "default", false, None).await.unwrap();
        assert_eq!(first.reset_at, START + 60);

        clock.advance(40);
        let second = limiter.check("ip:1.2.3.4", "default", false, None).await.unwrap();
        assert_eq!(second.reset_at, START + 100);
        assert_eq!(second.remaining, 98);

        clock.advance(40);
        let third = limiter.check("ip:1.2.3.4", "default", false, None).await.unwrap();
        assert_eq!(third.reset_at, START + 140);
        assert_eq!(third.remaining, 97);

        // A quiet period of one full window starts a fresh counter.
        clock.advance(60);
        let fresh = limiter.check("ip:1.2.3.4", "default", false, None).await.unwrap();
        assert_eq!(fresh.remaining, 99);
    }

    #[tokio::test]
    async fn test_denials_do_not_renew() {
        let (limiter, clock) = limiter(LimitPolicy::new(1, 60, 5.0));

        assert!(limiter.check("ip:1.2.3.4", "default", false, None).await.unwrap().allowed);

        clock.advance(30);
        let denied = limiter.check("ip:1.2.3.4", "default", false, None).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.reset_at, START + 60);
        assert_eq!(denied.retry_after(clock.now()), 30);

        clock.advance(30);
        assert!(limiter.check("ip:1.2.3.4", "default", false, None).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_oversized_window_override_still_limits() {
        let (limiter, _) = limiter(LimitPolicy::new(5, 60, 5.0));

        let mut admitted = 0;
        for _ in 0..20 {
            let decision = limiter
                .check("ip:10.0.0.1", "default", false, Some(u64::MAX))
                .await
                .unwrap();
            assert_eq!(decision.window_seconds, MAX_WINDOW_SECS);
            assert_eq!(decision.reset_at, i64::MAX);
            if decision.allowed {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn test_window_override() {
        let (limiter, _) = limiter(LimitPolicy::new(5, 60, 5.0));

        let decision = limiter
            .check("ip:1.2.3.4", "default", false, Some(10))
            .await
            .unwrap();
        assert_eq!(decision.window_seconds, 10);
        assert_eq!(decision.reset_at, START + 10);
    }

    #[tokio::test]
    async fn test_inspect_does_not_count() {
        let (limiter, _) = limiter(LimitPolicy::new(5, 60, 5.0));

        let idle = limiter.inspect("ip:1.2.3.4", "default", false).await.unwrap();
        assert!(idle.allowed);
        assert_eq!(idle.remaining, 5);

        limiter.check("ip:1.2.3.4", "default", false, None).await.unwrap();
        limiter.check("ip:1.2.3.4", "default", false, None).await.unwrap();

        for _ in 0..3 {
            let state = limiter.inspect("ip:1.2.3.4", "default", false).await.unwrap();
            assert_eq!(state.remaining, 3);
            assert_eq!(state.reset_at, START + 60);
        }
    }

    #[tokio::test]
    async fn test_reset_clears_counter() {
        let (limiter, _) = limiter(LimitPolicy::new(1, 60, 5.0));

        limiter.check("user:9", "default", false, None).await.unwrap();
        assert!(!limiter.check("user:9", "default", false, None).await.unwrap().allowed);

        limiter.reset("user:9", "default").await.unwrap();
        assert!(limiter.check("user:9", "default", false, None).await.unwrap().allowed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_checks_never_exceed_limit() {
        let (limiter, _) = limiter(LimitPolicy::new(50, 60, 5.0));
        let limiter = Arc::new(limiter);

        let handles: Vec<_> = (0..400)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    limiter
                        .check("ip:10.0.0.1", "default", false, None)
                        .await
                        .unwrap()
                        .allowed
                })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 50);
    }

    #[test]
    fn test_retry_after_never_negative() {
        let decision = Decision {
            allowed: false,
            limit: 1,
            remaining: 0,
            reset_at: 100,
            window_seconds: 60,
        };
        assert_eq!(decision.retry_after(40), 60);
        assert_eq!(decision.retry_after(150), 0);
    }
}
