//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`ChannelManager`]: connection pool owning the underlying gRPC channel
//! - [`StreamTransport`]: opens the bidirectional market data stream
//! - [`PayloadMapper`]: converts wire payloads into domain values
//!
//! ## Internal Ports
//!
//! - [`ResponseRouter`]: turns a decoded response into dispatched events
//! - [`EventSink`]: receives typed events for delivery to handlers

use std::any::Any;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use tonic::Status;
use tonic::transport::Channel;

use crate::domain::streaming::{EventType, MarketDataRequest, MarketDataResponse};

/// Outbound request stream handed to the transport.
pub type RequestStream = Pin<Box<dyn Stream<Item = MarketDataRequest> + Send>>;

/// Inbound response stream produced by the transport.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<MarketDataResponse, Status>> + Send>>;

/// Domain value produced by a [`PayloadMapper`].
pub type MappedPayload = Arc<dyn Any + Send + Sync>;

/// Owner of the network channel the stream runs on.
#[async_trait]
pub trait ChannelManager: Send + Sync {
    /// Get a ready channel, creating one if needed.
    async fn acquire(&self) -> Result<Channel, Status>;

    /// Drop the current channel so in-flight calls on it fail.
    ///
    /// `source` names the component asking for the reset.
    fn reset(&self, source: &str, reason: &str);

    /// Close the channel for good.
    fn close(&self);
}

/// Transport able to open the bidirectional market data stream.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open a stream that sends `outbound` and yields server responses.
    async fn open_stream(
        &self,
        channel: Channel,
        outbound: RequestStream,
    ) -> Result<ResponseStream, Status>;
}

/// Maps wire payloads into domain values.
pub trait PayloadMapper: Send + Sync {
    /// Map a response, or return `None` when there is no domain value for it.
    fn map(&self, event_type: EventType, raw: &MarketDataResponse) -> Option<MappedPayload>;
}

/// Receiver of typed events.
pub trait EventSink: Send + Sync {
    /// Check whether any handler for `event_type` wants the mapped payload.
    fn needs_mapped_payload(&self, event_type: EventType) -> bool;

    /// Queue an event for delivery. Returns `false` if it was dropped.
    fn emit(
        &self,
        event_type: EventType,
        raw: Arc<MarketDataResponse>,
        mapped: Option<MappedPayload>,
    ) -> bool;
}

/// Routes decoded responses into an [`EventSink`].
pub trait ResponseRouter: Send + Sync {
    /// Dispatch zero or more events for `response`.
    fn route(&self, response: MarketDataResponse, sink: &dyn EventSink);
}
