//! Market Data Stream Messages
//!
//! Wire-level messages exchanged on the bidirectional market data stream.
//!
//! Outbound traffic is a [`MarketDataRequest`]; inbound traffic is a
//! [`MarketDataResponse`]. The response is a tagged union decided once at
//! decode time, so routing never has to inspect optional fields.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::subscription::{
    CandleInterval, CandleSource, OrderBookType, SubscriptionKind, TradeSource,
};

// =============================================================================
// Requests
// =============================================================================

/// Whether a subscription request adds or removes a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionAction {
    /// Start receiving data.
    Subscribe,
    /// Stop receiving data.
    Unsubscribe,
}

/// One instrument of an order book subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBookInstrument {
    /// Instrument id.
    pub instrument_id: String,
    /// Order book depth.
    pub depth: u32,
    /// Order book source.
    pub order_book_type: OrderBookType,
}

/// One instrument of a candle subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandleInstrument {
    /// Instrument id.
    pub instrument_id: String,
    /// Candle interval.
    pub interval: CandleInterval,
}

/// Order book subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeOrderBookRequest {
    /// Subscribe or unsubscribe.
    pub action: SubscriptionAction,
    /// Instruments to (un)subscribe.
    pub instruments: Vec<OrderBookInstrument>,
}

/// Candle subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeCandlesRequest {
    /// Subscribe or unsubscribe.
    pub action: SubscriptionAction,
    /// Instruments to (un)subscribe.
    pub instruments: Vec<CandleInstrument>,
    /// Deliver candles only once closed.
    pub waiting_close: bool,
    /// Candle source.
    pub candle_source: CandleSource,
}

/// Trade subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeTradesRequest {
    /// Subscribe or unsubscribe.
    pub action: SubscriptionAction,
    /// Instrument ids to (un)subscribe.
    pub instrument_ids: Vec<String>,
    /// Trade source.
    pub trade_source: TradeSource,
    /// Include open interest.
    pub with_open_interest: bool,
}

/// Trading status or last price subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeInstrumentsRequest {
    /// Subscribe or unsubscribe.
    pub action: SubscriptionAction,
    /// Instrument ids to (un)subscribe.
    pub instrument_ids: Vec<String>,
}

/// Message sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum MarketDataRequest {
    /// Order book (un)subscription.
    SubscribeOrderBook(SubscribeOrderBookRequest),
    /// Candle (un)subscription.
    SubscribeCandles(SubscribeCandlesRequest),
    /// Trade (un)subscription.
    SubscribeTrades(SubscribeTradesRequest),
    /// Trading status (un)subscription.
    SubscribeInfo(SubscribeInstrumentsRequest),
    /// Last price (un)subscription.
    SubscribeLastPrice(SubscribeInstrumentsRequest),
    /// Ask the server to report the active subscriptions of this stream.
    GetMySubscriptions,
    /// Client ping.
    Ping {
        /// Client-side time of the ping, if any.
        time: Option<DateTime<Utc>>,
    },
    /// Change the interval of server pings.
    PingSettings {
        /// Delay between server pings in milliseconds.
        ping_delay_ms: u32,
    },
}

impl MarketDataRequest {
    /// Subscription action of a mutation, `None` for control messages.
    #[must_use]
    pub const fn action(&self) -> Option<SubscriptionAction> {
        match self {
            Self::SubscribeOrderBook(r) => Some(r.action),
            Self::SubscribeCandles(r) => Some(r.action),
            Self::SubscribeTrades(r) => Some(r.action),
            Self::SubscribeInfo(r) | Self::SubscribeLastPrice(r) => Some(r.action),
            Self::GetMySubscriptions | Self::Ping { .. } | Self::PingSettings { .. } => None,
        }
    }

    /// Check whether this request is a subscription mutation.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        self.action().is_some()
    }
}

// =============================================================================
// Responses
// =============================================================================

/// A price level of an order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderLevel {
    /// Price of the level.
    pub price: Decimal,
    /// Quantity in lots.
    pub quantity: i64,
}

/// Candle update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candle {
    /// Instrument id.
    pub instrument_id: String,
    /// Candle interval.
    pub interval: CandleInterval,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Volume in lots.
    pub volume: i64,
    /// Start time of the candle.
    pub time: DateTime<Utc>,
}

/// Order book snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBook {
    /// Instrument id.
    pub instrument_id: String,
    /// Depth of the snapshot.
    pub depth: u32,
    /// Whether the snapshot is consistent.
    pub is_consistent: bool,
    /// Bid levels, best first.
    pub bids: Vec<OrderLevel>,
    /// Ask levels, best first.
    pub asks: Vec<OrderLevel>,
    /// Snapshot time.
    pub time: DateTime<Utc>,
    /// Order book source.
    pub order_book_type: OrderBookType,
}

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeDirection {
    /// Not reported.
    Unspecified,
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

/// Anonymous trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trade {
    /// Instrument id.
    pub instrument_id: String,
    /// Trade direction.
    pub direction: TradeDirection,
    /// Trade price.
    pub price: Decimal,
    /// Quantity in lots.
    pub quantity: i64,
    /// Trade time.
    pub time: DateTime<Utc>,
    /// Trade source.
    pub trade_source: TradeSource,
}

/// Trading status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradingStatus {
    /// Instrument id.
    pub instrument_id: String,
    /// Server trading status code.
    pub trading_status: String,
    /// Whether limit orders are accepted.
    pub limit_order_available: bool,
    /// Whether market orders are accepted.
    pub market_order_available: bool,
    /// Time of the change.
    pub time: DateTime<Utc>,
}

/// Last traded price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastPrice {
    /// Instrument id.
    pub instrument_id: String,
    /// Last price.
    pub price: Decimal,
    /// Time of the price.
    pub time: DateTime<Utc>,
}

/// Server ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ping {
    /// Server time.
    pub time: DateTime<Utc>,
    /// Stream identifier assigned by the server.
    pub stream_id: Option<String>,
}

/// Per-instrument outcome of a subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionStatusEntry {
    /// Instrument id.
    pub instrument_id: String,
    /// Server status code, e.g. `SUBSCRIPTION_STATUS_SUCCESS`.
    pub status: String,
}

/// Server acknowledgement of subscription requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionStatus {
    /// Kind the acknowledgement refers to; `None` for a full listing.
    pub kind: Option<SubscriptionKind>,
    /// Server tracking id of the request.
    pub tracking_id: String,
    /// Per-instrument outcomes.
    pub entries: Vec<SubscriptionStatusEntry>,
}

/// Message received from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "payload", rename_all = "snake_case")]
pub enum MarketDataResponse {
    /// Candle update.
    Candle(Candle),
    /// Order book snapshot.
    OrderBook(OrderBook),
    /// Anonymous trade.
    Trade(Trade),
    /// Trading status change.
    TradingStatus(TradingStatus),
    /// Last traded price.
    LastPrice(LastPrice),
    /// Server ping.
    Ping(Ping),
    /// Subscription acknowledgement.
    SubscriptionStatus(SubscriptionStatus),
}

impl MarketDataResponse {
    /// Event type this response is delivered as.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::Candle(_) => EventType::Candle,
            Self::OrderBook(_) => EventType::OrderBook,
            Self::Trade(_) => EventType::Trade,
            Self::TradingStatus(_) => EventType::Info,
            Self::LastPrice(_) => EventType::LastPrice,
            Self::Ping(_) => EventType::Ping,
            Self::SubscriptionStatus(_) => EventType::SubscriptionStatus,
        }
    }
}

// =============================================================================
// Event Types
// =============================================================================

/// Type of an event delivered to application handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Candle update.
    Candle,
    /// Order book snapshot.
    OrderBook,
    /// Anonymous trade.
    Trade,
    /// Trading status change.
    Info,
    /// Last traded price.
    LastPrice,
    /// Server ping.
    Ping,
    /// Subscription acknowledgement.
    SubscriptionStatus,
}

impl EventType {
    /// Get all event types.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Candle,
            Self::OrderBook,
            Self::Trade,
            Self::Info,
            Self::LastPrice,
            Self::Ping,
            Self::SubscriptionStatus,
        ]
    }

    /// Canonical name of the event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Candle => "candle",
            Self::OrderBook => "orderbook",
            Self::Trade => "trade",
            Self::Info => "info",
            Self::LastPrice => "last_price",
            Self::Ping => "ping",
            Self::SubscriptionStatus => "subscription_status",
        }
    }

    /// Check whether this is a market data event (not protocol-level).
    #[must_use]
    pub const fn is_market_data(self) -> bool {
        !matches!(self, Self::Ping | Self::SubscriptionStatus)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an event type name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0:?}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "candle" | "candles" => Ok(Self::Candle),
            "orderbook" | "order_book" => Ok(Self::OrderBook),
            "trade" | "trades" => Ok(Self::Trade),
            "info" | "trading_status" => Ok(Self::Info),
            "last_price" | "lastprice" => Ok(Self::LastPrice),
            "ping" => Ok(Self::Ping),
            "subscription_status" => Ok(Self::SubscriptionStatus),
            _ => Err(UnknownEventType(s.to_string())),
        }
    }
}

/// Payload representation a handler asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// The wire message as received.
    #[default]
    Raw,
    /// The domain value produced by the payload mapper.
    Mapped,
}
