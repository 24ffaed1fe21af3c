#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::items_after_statements
    )
)]

//! Market Stream Client - Streaming Session Runtime
//!
//! Client-side runtime for a long-lived bidirectional market data stream.
//! It tracks what the application wants subscribed, keeps one logical
//! stream alive across network failures, and delivers typed events to
//! application handlers without blocking the reader.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Wire messages and subscription types
//!   - `streaming`: Requests, responses, event types
//!   - `subscription`: Canonical keys, normalizer, registry
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Channel manager, transport, router, payload mapper
//!   - `services`: Subscription state, mutation rate limiter, request factory
//!
//! - **Infrastructure**: Runtime machinery
//!   - `dispatch`: Bounded queue and worker pool for handlers
//!   - `stream`: Controller, reconnection, idle watchdog, async listener
//!   - `config`: Environment configuration
//!   - `metrics` / `telemetry`: Prometheus and OpenTelemetry
//!
//! # Data Flow
//!
//! ```text
//!  subscribe() ──► SubscriptionStateManager ──► request queue ──┐
//!                                                              ▼
//!  ChannelManager ──► StreamTransport ◄──── outbound requests
//!                          │
//!                          ▼ responses
//!                   StreamController ──► ResponseRouter ──► EventDispatcher
//!                          ▲                                    │
//!                   IdleWatchdog                        worker threads
//!                                                               ▼
//!                                                          handlers
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Wire messages and subscription types.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Runtime machinery and adapters.
pub mod infrastructure;

/// Crate-level error type.
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

// Errors
pub use error::StreamError;

// Domain types
pub use domain::streaming::{EventType, MarketDataRequest, MarketDataResponse, PayloadFormat};
pub use domain::subscription::{SubscriptionKey, SubscriptionKind, SubscriptionParams};

// Ports
pub use application::ports::{
    ChannelManager, EventSink, MappedPayload, PayloadMapper, ResponseRouter, StreamTransport,
};

// Services
pub use application::services::{SubscriptionLimits, SubscriptionStateManager};

// Runtime
pub use infrastructure::config::{ConfigError, StreamConfig};
pub use infrastructure::dispatch::{DispatchConfig, DispatchStats, Event, EventDispatcher};
pub use infrastructure::stream::{
    AsyncListener, ListenerStatus, MarketDataStream, ReconnectionError, StreamController,
    StreamStats,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
