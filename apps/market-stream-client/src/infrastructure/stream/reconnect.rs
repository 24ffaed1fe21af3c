//! Reconnection Strategy
//!
//! Exponential backoff with jitter and a hard attempt ceiling, used by the
//! stream controller between connection attempts.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Lower bound of the jitter multiplier.
pub const JITTER_MIN: f64 = 0.5;

/// Upper bound of the jitter multiplier.
pub const JITTER_MAX: f64 = 1.5;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Maximum number of attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first attempt, before jitter.
    pub base_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }
}

/// How a backoff wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full delay elapsed.
    Elapsed,
    /// The wait was cancelled before the delay elapsed.
    Aborted,
}

/// Error type for reconnection failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectionError {
    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({max_attempts}) exceeded")]
    MaxAttemptsExceeded {
        /// Configured ceiling.
        max_attempts: u32,
    },
}

/// Backoff policy: `base_delay * 2^(attempt - 1) * jitter`, with jitter drawn
/// uniformly from `[0.5, 1.5]`.
///
/// # Example
///
/// ```rust
/// use market_stream_client::infrastructure::stream::{ReconnectConfig, ReconnectionStrategy};
/// use std::time::Duration;
///
/// let strategy = ReconnectionStrategy::new(ReconnectConfig::default());
///
/// // Third attempt without jitter: 1s * 2^2
/// assert_eq!(strategy.delay_for(3, 1.0), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectionStrategy {
    config: ReconnectConfig,
}

impl Default for ReconnectionStrategy {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

impl ReconnectionStrategy {
    /// Create a new strategy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    /// Configured attempt ceiling.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay for `attempt` (1-based) with an explicit jitter multiplier.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.config.base_delay.as_secs_f64() * 2f64.powi(exponent) * jitter;
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Draw a jitter multiplier.
    #[must_use]
    pub fn jitter() -> f64 {
        rand::rng().random_range(JITTER_MIN..=JITTER_MAX)
    }

    /// Sleep before `attempt`, returning early if `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`ReconnectionError::MaxAttemptsExceeded`] without sleeping
    /// when `attempt` is above the ceiling.
    pub async fn wait(
        &self,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome, ReconnectionError> {
        if attempt > self.config.max_attempts {
            return Err(ReconnectionError::MaxAttemptsExceeded {
                max_attempts: self.config.max_attempts,
            });
        }

        let delay = self.delay_for(attempt, Self::jitter());
        tracing::info!(
            attempt,
            max_attempts = self.config.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Waiting before reconnect"
        );

        tokio::select! {
            () = cancel.cancelled() => Ok(WaitOutcome::Aborted),
            () = tokio::time::sleep(delay) => Ok(WaitOutcome::Elapsed),
        }
    }
}
