//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the subscription model and the wire-level message
//! types of the market data stream. Nothing here performs I/O.

/// Stream request/response messages and event types.
pub mod streaming;

/// Subscription keys, normalization and the subscription registry.
pub mod subscription;
