//! Application Services
//!
//! Services that own subscription state and pace mutations.
//!
//! - `SubscriptionStateManager`: registry, quota, pending request queue
//! - `MutationRateLimiter`: sliding-window limit on subscription changes
//! - `request_factory`: wire messages for subscription changes

/// Sliding-window limiter for subscription mutations.
pub mod rate_limiter;

/// Builders for outbound wire requests.
pub mod request_factory;

/// Subscription state and the outbound request queue.
pub mod subscription_state;

pub use rate_limiter::{MutationRateLimiter, RateLimitExceeded};
pub use subscription_state::{
    PING_DELAY_MAX_MS, PING_DELAY_MIN_MS, SubscriptionLimits, SubscriptionStateManager,
};
