//! Subscription State Manager
//!
//! Owns the subscription registry, the mutation rate limiter and the queue
//! of outbound requests waiting for the live stream. Every mutation goes
//! through one lock so membership, quota and rate-limit accounting change
//! together or not at all.

use std::collections::VecDeque;
use std::pin::pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::rate_limiter::{DEFAULT_MUTATION_LIMIT, DEFAULT_MUTATION_WINDOW, MutationRateLimiter};
use super::request_factory;
use crate::domain::streaming::{MarketDataRequest, SubscriptionAction};
use crate::domain::subscription::{
    SubscriptionKey, SubscriptionParams, SubscriptionRegistry, normalize,
};
use crate::error::StreamError;

/// Smallest server ping interval accepted, in milliseconds.
pub const PING_DELAY_MIN_MS: u32 = 5_000;

/// Largest server ping interval accepted, in milliseconds.
pub const PING_DELAY_MAX_MS: u32 = 180_000;

/// Default subscription quota ceiling.
pub const DEFAULT_SUBSCRIPTION_LIMIT: usize = 300;

/// Quota and pacing limits for subscription changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionLimits {
    /// Ceiling on the summed weight of active subscriptions.
    pub max_weight: usize,
    /// Mutations allowed per window.
    pub mutation_limit: usize,
    /// Mutation rate-limit window.
    pub mutation_window: Duration,
}

impl Default for SubscriptionLimits {
    fn default() -> Self {
        Self {
            max_weight: DEFAULT_SUBSCRIPTION_LIMIT,
            mutation_limit: DEFAULT_MUTATION_LIMIT,
            mutation_window: DEFAULT_MUTATION_WINDOW,
        }
    }
}

#[derive(Debug)]
struct State {
    registry: SubscriptionRegistry,
    limiter: MutationRateLimiter,
    pending: VecDeque<MarketDataRequest>,
    ping_delay_ms: Option<u32>,
}

/// Tracks what the application wants subscribed and what still has to be
/// sent to the server.
#[derive(Debug)]
pub struct SubscriptionStateManager {
    state: Mutex<State>,
    notify: Notify,
}

impl Default for SubscriptionStateManager {
    fn default() -> Self {
        Self::new(SubscriptionLimits::default())
    }
}

impl SubscriptionStateManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new(limits: SubscriptionLimits) -> Self {
        Self {
            state: Mutex::new(State {
                registry: SubscriptionRegistry::new(limits.max_weight),
                limiter: MutationRateLimiter::new(limits.mutation_limit, limits.mutation_window),
                pending: VecDeque::new(),
                ping_delay_ms: None,
            }),
            notify: Notify::new(),
        }
    }

    /// Add a subscription and return the active set.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] for malformed parameters, an
    /// exhausted rate-limit window or an exceeded quota. The registry is
    /// unchanged on error.
    pub fn subscribe(
        &self,
        params: &SubscriptionParams,
    ) -> Result<Vec<SubscriptionKey>, StreamError> {
        self.mutate(params, SubscriptionAction::Subscribe)
    }

    /// Remove a subscription and return the active set.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] for malformed parameters or an
    /// exhausted rate-limit window.
    pub fn unsubscribe(
        &self,
        params: &SubscriptionParams,
    ) -> Result<Vec<SubscriptionKey>, StreamError> {
        self.mutate(params, SubscriptionAction::Unsubscribe)
    }

    fn mutate(
        &self,
        params: &SubscriptionParams,
        action: SubscriptionAction,
    ) -> Result<Vec<SubscriptionKey>, StreamError> {
        let key = normalize(params)?;
        let now = Instant::now();

        let keys = {
            let mut state = self.state.lock();
            let subscribing = action == SubscriptionAction::Subscribe;
            if state.registry.contains(&key) == subscribing {
                return Ok(state.registry.keys());
            }

            state
                .limiter
                .check(now)
                .map_err(|e| StreamError::InvalidArgument(e.to_string()))?;
            if subscribing && state.registry.would_exceed(&key) {
                return Err(StreamError::InvalidArgument(format!(
                    "subscription quota exceeded: {key} needs {} of {} remaining",
                    key.weight(),
                    state
                        .registry
                        .limit()
                        .saturating_sub(state.registry.used_weight()),
                )));
            }

            state.limiter.register(now);
            state.pending.push_back(request_factory::mutation(&key, action));
            if subscribing {
                state.registry.insert(key.clone());
            } else {
                state.registry.remove(&key);
            }
            state.registry.keys()
        };

        tracing::debug!(
            action = ?action,
            subscription = %key,
            active = keys.len(),
            "Subscription mutation queued"
        );
        self.notify.notify_one();
        Ok(keys)
    }

    /// Active subscriptions in registration order.
    #[must_use]
    pub fn current_subscriptions(&self) -> Vec<SubscriptionKey> {
        self.state.lock().registry.keys()
    }

    /// Summed quota weight of active subscriptions.
    #[must_use]
    pub fn used_weight(&self) -> usize {
        self.state.lock().registry.used_weight()
    }

    /// Queue a request for the server's view of active subscriptions.
    pub fn request_my_subscriptions(&self) {
        self.enqueue(request_factory::my_subscriptions());
    }

    /// Queue a client ping.
    pub fn send_ping(&self, time: Option<DateTime<Utc>>) {
        self.enqueue(request_factory::ping(time));
    }

    /// Change the server ping interval.
    ///
    /// The setting is remembered and re-sent on every reconnect.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] unless `ms` lies within
    /// `PING_DELAY_MIN_MS..=PING_DELAY_MAX_MS`.
    pub fn set_ping_delay(&self, ms: u32) -> Result<(), StreamError> {
        if !(PING_DELAY_MIN_MS..=PING_DELAY_MAX_MS).contains(&ms) {
            return Err(StreamError::InvalidArgument(format!(
                "ping delay must be within {PING_DELAY_MIN_MS}..{PING_DELAY_MAX_MS} ms, got {ms}"
            )));
        }

        self.state.lock().ping_delay_ms = Some(ms);
        self.enqueue(request_factory::ping_settings(ms));
        Ok(())
    }

    /// Requests to send first on a freshly opened stream.
    ///
    /// Drops anything queued before the stream existed and returns the ping
    /// setting (if any) followed by one subscribe per active subscription.
    pub fn initial_requests(&self) -> Vec<MarketDataRequest> {
        let mut state = self.state.lock();
        let dropped = state.pending.len();
        state.pending.clear();

        let mut requests = Vec::with_capacity(state.registry.len() + 1);
        if let Some(ms) = state.ping_delay_ms {
            requests.push(request_factory::ping_settings(ms));
        }
        requests.extend(
            state
                .registry
                .keys()
                .iter()
                .map(|key| request_factory::mutation(key, SubscriptionAction::Subscribe)),
        );

        if dropped > 0 {
            tracing::debug!(dropped, "Discarded requests queued before stream open");
        }
        requests
    }

    fn enqueue(&self, request: MarketDataRequest) {
        self.state.lock().pending.push_back(request);
        self.notify.notify_one();
    }

    /// Take the next queued request without waiting.
    pub fn try_pop_request(&self) -> Option<MarketDataRequest> {
        self.state.lock().pending.pop_front()
    }

    /// Wait for the next queued request.
    ///
    /// Returns `None` if `timeout` elapses first; waits indefinitely when
    /// `timeout` is `None`.
    pub async fn pop_request(&self, timeout: Option<Duration>) -> Option<MarketDataRequest> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            if let Some(request) = self.try_pop_request() {
                return Some(request);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.try_pop_request();
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Number of requests waiting to be sent.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }
}
