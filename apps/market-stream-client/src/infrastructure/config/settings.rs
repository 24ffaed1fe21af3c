//! Stream Configuration Settings
//!
//! Configuration for the stream client, built in code or loaded from
//! environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::application::services::{PING_DELAY_MAX_MS, PING_DELAY_MIN_MS, SubscriptionLimits};
use crate::infrastructure::dispatch::DispatchConfig;
use crate::infrastructure::stream::{ControllerConfig, ReconnectConfig, WatchdogConfig};

/// Complete stream client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Number of handler worker threads.
    pub thread_pool_size: usize,
    /// Capacity of the dispatcher's incoming event queue.
    pub event_queue_capacity: usize,
    /// Capacity of the handler job queue.
    pub job_queue_capacity: usize,
    /// How long shutdown waits for background work.
    pub shutdown_timeout: Duration,
    /// Idle threshold in seconds; zero or negative disables the watchdog.
    pub stream_idle_timeout_secs: f64,
    /// Interval between watchdog checks.
    pub stream_watchdog_interval: Duration,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
    /// Pause after a rate-limit failure without a server reset time.
    pub resource_exhausted_cooldown: Duration,
    /// Subscription quota ceiling.
    pub subscription_limit: usize,
    /// Mutations allowed per window.
    pub mutation_limit: usize,
    /// Mutation rate-limit window.
    pub mutation_window: Duration,
    /// Server ping interval sent on every connect, in milliseconds.
    pub ping_delay_ms: Option<u32>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        let limits = SubscriptionLimits::default();
        let dispatch = DispatchConfig::default();
        Self {
            thread_pool_size: dispatch.pool_size,
            event_queue_capacity: dispatch.event_queue_capacity,
            job_queue_capacity: dispatch.job_queue_capacity,
            shutdown_timeout: dispatch.shutdown_timeout,
            stream_idle_timeout_secs: 0.0,
            stream_watchdog_interval: WatchdogConfig::default().check_interval,
            reconnect: ReconnectConfig::default(),
            resource_exhausted_cooldown: ControllerConfig::default().resource_exhausted_cooldown,
            subscription_limit: limits.max_weight,
            mutation_limit: limits.mutation_limit,
            mutation_window: limits.mutation_window,
            ping_delay_ms: None,
        }
    }
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the result is
    /// invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed or the result is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let config = Self {
            thread_pool_size: env.parse(
                "MARKET_STREAM_THREAD_POOL_SIZE",
                defaults.thread_pool_size,
            )?,
            event_queue_capacity: env.parse(
                "MARKET_STREAM_EVENT_QUEUE_CAPACITY",
                defaults.event_queue_capacity,
            )?,
            job_queue_capacity: env.parse(
                "MARKET_STREAM_JOB_QUEUE_CAPACITY",
                defaults.job_queue_capacity,
            )?,
            shutdown_timeout: env.duration_millis(
                "MARKET_STREAM_SHUTDOWN_TIMEOUT_MS",
                defaults.shutdown_timeout,
            )?,
            stream_idle_timeout_secs: env.parse(
                "MARKET_STREAM_IDLE_TIMEOUT_SECS",
                defaults.stream_idle_timeout_secs,
            )?,
            stream_watchdog_interval: env.duration_secs(
                "MARKET_STREAM_WATCHDOG_INTERVAL_SECS",
                defaults.stream_watchdog_interval,
            )?,
            reconnect: ReconnectConfig {
                max_attempts: env.parse(
                    "MARKET_STREAM_RECONNECT_MAX_ATTEMPTS",
                    defaults.reconnect.max_attempts,
                )?,
                base_delay: env.duration_millis(
                    "MARKET_STREAM_RECONNECT_BASE_DELAY_MS",
                    defaults.reconnect.base_delay,
                )?,
            },
            resource_exhausted_cooldown: env.duration_secs(
                "MARKET_STREAM_RESOURCE_EXHAUSTED_COOLDOWN_SECS",
                defaults.resource_exhausted_cooldown,
            )?,
            subscription_limit: env.parse(
                "MARKET_STREAM_SUBSCRIPTION_LIMIT",
                defaults.subscription_limit,
            )?,
            mutation_limit: env.parse("MARKET_STREAM_MUTATION_LIMIT", defaults.mutation_limit)?,
            mutation_window: env.duration_secs(
                "MARKET_STREAM_MUTATION_WINDOW_SECS",
                defaults.mutation_window,
            )?,
            ping_delay_ms: env.optional("MARKET_STREAM_PING_DELAY_MS")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the runtime cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_pool_size == 0 {
            return Err(ConfigError::invalid("thread_pool_size", "must be at least 1"));
        }
        if self.event_queue_capacity == 0 || self.job_queue_capacity == 0 {
            return Err(ConfigError::invalid("queue capacity", "must be at least 1"));
        }
        if self.stream_watchdog_interval.is_zero() {
            return Err(ConfigError::invalid(
                "stream_watchdog_interval",
                "must be positive",
            ));
        }
        if self.mutation_limit == 0 || self.mutation_window.is_zero() {
            return Err(ConfigError::invalid(
                "mutation rate limit",
                "limit and window must be positive",
            ));
        }
        if let Some(ms) = self.ping_delay_ms {
            if !(PING_DELAY_MIN_MS..=PING_DELAY_MAX_MS).contains(&ms) {
                return Err(ConfigError::invalid(
                    "ping_delay_ms",
                    format!("must be within {PING_DELAY_MIN_MS}..{PING_DELAY_MAX_MS}, got {ms}"),
                ));
            }
        }
        Ok(())
    }

    /// Dispatcher settings.
    #[must_use]
    pub const fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            pool_size: self.thread_pool_size,
            event_queue_capacity: self.event_queue_capacity,
            job_queue_capacity: self.job_queue_capacity,
            shutdown_timeout: self.shutdown_timeout,
        }
    }

    /// Controller settings.
    #[must_use]
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            reconnect: self.reconnect,
            watchdog: WatchdogConfig::from_secs(
                self.stream_idle_timeout_secs,
                self.stream_watchdog_interval,
            ),
            resource_exhausted_cooldown: self.resource_exhausted_cooldown,
        }
    }

    /// Subscription quota and pacing.
    #[must_use]
    pub const fn subscription_limits(&self) -> SubscriptionLimits {
        SubscriptionLimits {
            max_weight: self.subscription_limit,
            mutation_limit: self.mutation_limit,
            mutation_window: self.mutation_window,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidEnvVar {
        /// Variable name.
        key: String,
        /// Value as found.
        value: String,
    },
    /// A setting is out of range.
    #[error("invalid {field}: {message}")]
    Invalid {
        /// Setting name.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn optional<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match (self.0)(key) {
            None => Ok(None),
            Some(value) if value.trim().is_empty() => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidEnvVar {
                    key: key.to_string(),
                    value,
                }),
        }
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.optional(key)?.unwrap_or(default))
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .optional::<u64>(key)?
            .map_or(default, Duration::from_secs))
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .optional::<u64>(key)?
            .map_or(default, Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.thread_pool_size, 4);
        assert_eq!(config.stream_watchdog_interval, Duration::from_secs(5));
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.base_delay, Duration::from_secs(1));
        assert_eq!(config.subscription_limit, 300);
        assert_eq!(config.mutation_limit, 100);
        assert_eq!(config.mutation_window, Duration::from_secs(60));
        assert_eq!(config.ping_delay_ms, None);
        assert!(config.controller_config().watchdog.timeout.is_none());
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = StreamConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StreamConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let config = StreamConfig::from_lookup(lookup(&[
            ("MARKET_STREAM_THREAD_POOL_SIZE", "1"),
            ("MARKET_STREAM_IDLE_TIMEOUT_SECS", "2.5"),
            ("MARKET_STREAM_RECONNECT_BASE_DELAY_MS", "250"),
            ("MARKET_STREAM_PING_DELAY_MS", "6000"),
        ]))
        .unwrap();

        assert_eq!(config.thread_pool_size, 1);
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(250));
        assert_eq!(config.ping_delay_ms, Some(6000));
        assert_eq!(
            config.controller_config().watchdog.timeout,
            Some(Duration::from_millis(2500))
        );
    }

    #[test]
    fn rejects_unparseable_value() {
        let err = StreamConfig::from_lookup(lookup(&[("MARKET_STREAM_MUTATION_LIMIT", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { .. }));
    }

    #[test]
    fn rejects_zero_pool() {
        let err = StreamConfig::from_lookup(lookup(&[("MARKET_STREAM_THREAD_POOL_SIZE", "0")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "thread_pool_size",
                ..
            }
        ));
    }

    #[test]
    fn rejects_out_of_range_ping_delay() {
        let err = StreamConfig::from_lookup(lookup(&[("MARKET_STREAM_PING_DELAY_MS", "4000")]))
            .unwrap_err();
        assert!(err.to_string().contains("5000..180000"));
    }
}
