//! Mutation Rate Limiter
//!
//! Sliding-window guard on how many subscribe/unsubscribe mutations may be
//! sent per window. Independent of the subscription quota.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Default number of mutations allowed per window.
pub const DEFAULT_MUTATION_LIMIT: usize = 100;

/// Default window length.
pub const DEFAULT_MUTATION_WINDOW: Duration = Duration::from_secs(60);

/// The window is full.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "subscription mutation rate limit exceeded: {} per {}s, retry in {}ms",
    .limit,
    .window.as_secs(),
    .retry_after.as_millis()
)]
pub struct RateLimitExceeded {
    /// Mutations allowed per window.
    pub limit: usize,
    /// Window length.
    pub window: Duration,
    /// Time until the oldest mutation leaves the window.
    pub retry_after: Duration,
}

/// Sliding-window limiter over mutation timestamps.
///
/// Timestamps older than the window are evicted before every check.
#[derive(Debug)]
pub struct MutationRateLimiter {
    limit: usize,
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl Default for MutationRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MUTATION_LIMIT, DEFAULT_MUTATION_WINDOW)
    }
}

impl MutationRateLimiter {
    /// Create a limiter allowing `limit` mutations per `window`.
    #[must_use]
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            stamps: VecDeque::with_capacity(limit),
        }
    }

    /// Check that one more mutation fits in the window at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitExceeded`] when the window is full.
    pub fn check(&mut self, now: Instant) -> Result<(), RateLimitExceeded> {
        self.evict(now);
        if self.stamps.len() < self.limit {
            return Ok(());
        }

        let retry_after = self
            .stamps
            .front()
            .map_or(self.window, |oldest| {
                (*oldest + self.window).saturating_duration_since(now)
            });
        Err(RateLimitExceeded {
            limit: self.limit,
            window: self.window,
            retry_after,
        })
    }

    /// Record a mutation at `now`.
    pub fn register(&mut self, now: Instant) {
        self.stamps.push_back(now);
    }

    /// Check and record in one step.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitExceeded`] when the window is full; nothing is
    /// recorded in that case.
    pub fn try_register(&mut self, now: Instant) -> Result<(), RateLimitExceeded> {
        self.check(now)?;
        self.register(now);
        Ok(())
    }

    /// Mutations still available in the window at `now`.
    pub fn remaining(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.limit.saturating_sub(self.stamps.len())
    }

    fn evict(&mut self, now: Instant) {
        while let Some(oldest) = self.stamps.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_exactly_limit_per_window() {
        let mut limiter = MutationRateLimiter::new(100, Duration::from_secs(60));
        let start = Instant::now();

        for i in 0..100 {
            let now = start + Duration::from_millis(i * 10);
            assert!(limiter.try_register(now).is_ok(), "mutation {i} rejected");
        }

        let err = limiter
            .try_register(start + Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err.limit, 100);
        assert_eq!(err.retry_after, Duration::from_secs(59));
    }

    #[test]
    fn capacity_restored_after_window() {
        let mut limiter = MutationRateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();

        limiter.try_register(start).unwrap();
        limiter.try_register(start).unwrap();
        assert!(limiter.check(start + Duration::from_secs(59)).is_err());

        assert!(limiter.check(start + Duration::from_secs(60)).is_ok());
        assert_eq!(limiter.remaining(start + Duration::from_secs(60)), 2);
    }

    #[test]
    fn rejected_mutation_is_not_recorded() {
        let mut limiter = MutationRateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();

        limiter.try_register(start).unwrap();
        assert!(limiter.try_register(start).is_err());
        assert_eq!(limiter.stamps.len(), 1);
    }

    #[test]
    fn window_slides() {
        let mut limiter = MutationRateLimiter::new(2, Duration::from_secs(10));
        let start = Instant::now();

        limiter.try_register(start).unwrap();
        limiter.try_register(start + Duration::from_secs(5)).unwrap();

        // Only the first stamp has left the window.
        assert_eq!(limiter.remaining(start + Duration::from_secs(10)), 1);
        assert!(limiter.try_register(start + Duration::from_secs(10)).is_ok());
        assert!(limiter.try_register(start + Duration::from_secs(11)).is_err());
    }
}
