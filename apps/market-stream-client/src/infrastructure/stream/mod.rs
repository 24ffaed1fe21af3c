//! Market Data Stream Runtime
//!
//! Keeps one bidirectional market data stream alive and delivers its
//! responses to application handlers.
//!
//! - [`MarketDataStream`]: application entry point
//! - [`StreamController`]: run/stop state machine and read loop
//! - [`ReconnectionStrategy`]: backoff between connection attempts
//! - [`IdleWatchdog`]: forces a reconnect when the stream goes quiet
//! - [`AsyncListener`]: runs the controller on a background task

/// Application-facing stream client.
pub mod client;

/// Stream lifecycle controller.
pub mod controller;

/// Transport failure classification.
pub mod failure;

/// Background listener.
pub mod listener;

/// Exponential backoff with jitter.
pub mod reconnect;

/// Default response router.
pub mod router;

/// Idle watchdog.
pub mod watchdog;

pub use client::{MarketDataStream, StreamStats};
pub use controller::{ControllerConfig, SessionRun, SessionSnapshot, StreamController};
pub use failure::{FailureClass, RATE_LIMIT_RESET_HEADER, rate_limit_reset};
pub use listener::{AsyncListener, ListenerStatus};
pub use reconnect::{ReconnectConfig, ReconnectionError, ReconnectionStrategy, WaitOutcome};
pub use router::{DefaultResponseRouter, NoopPayloadMapper};
pub use watchdog::{IdleWatchdog, WatchdogConfig, WatchdogTarget};
