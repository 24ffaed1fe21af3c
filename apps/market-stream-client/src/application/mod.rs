//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the subscription bookkeeping services and the port
//! interfaces through which the runtime talks to its external collaborators.

/// Port interfaces for external systems (channel pool, transport, decoder).
pub mod ports;

/// Application services for subscription state and mutation pacing.
pub mod services;
