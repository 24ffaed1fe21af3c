//! Infrastructure Layer - Adapters and runtime machinery.
//!
//! This layer contains the stream runtime built on the port interfaces
//! defined in the application layer.

/// Configuration loading.
pub mod config;

/// Event dispatch engine.
pub mod dispatch;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Stream lifecycle, reconnection and the application facade.
pub mod stream;

/// OpenTelemetry tracing integration.
pub mod telemetry;
