//! Subscription Types
//!
//! Domain types describing what the application wants subscribed on the
//! market data stream.
//!
//! # Design
//!
//! A subscription is identified by its [`SubscriptionKey`]: the subscription
//! kind together with its canonical parameters. Two subscribe calls whose
//! parameters normalize to the same key refer to the same subscription, so
//! registering it twice is a no-op.
//!
//! Every key carries a quota weight. `info` subscriptions are free; every
//! other subscription costs one unit per instrument (at least one).

use std::fmt;

use serde::Serialize;

mod normalize;
mod registry;

pub use normalize::{ALLOWED_DEPTHS, NormalizeError, SubscriptionParams, normalize, snap_depth};
pub use registry::SubscriptionRegistry;

// =============================================================================
// Subscription Kind
// =============================================================================

/// Category of market data a subscription delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    /// Order book snapshots.
    OrderBook,
    /// Candles (OHLCV bars).
    Candles,
    /// Anonymous trades.
    Trades,
    /// Trading status of an instrument.
    Info,
    /// Last traded price.
    LastPrice,
}

impl SubscriptionKind {
    /// Get all subscription kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::OrderBook,
            Self::Candles,
            Self::Trades,
            Self::Info,
            Self::LastPrice,
        ]
    }

    /// Canonical name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderBook => "orderbook",
            Self::Candles => "candles",
            Self::Trades => "trades",
            Self::Info => "info",
            Self::LastPrice => "last_price",
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Canonical Parameter Enums
// =============================================================================

/// Candle interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleInterval {
    /// One minute.
    OneMinute,
    /// Two minutes.
    TwoMinutes,
    /// Three minutes.
    ThreeMinutes,
    /// Five minutes.
    FiveMinutes,
    /// Ten minutes.
    TenMinutes,
    /// Fifteen minutes.
    FifteenMinutes,
    /// Thirty minutes.
    ThirtyMinutes,
    /// One hour.
    OneHour,
    /// Two hours.
    TwoHours,
    /// Four hours.
    FourHours,
    /// One day.
    OneDay,
    /// One week.
    OneWeek,
    /// One month.
    OneMonth,
}

impl CandleInterval {
    /// Canonical symbol of the interval.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1min",
            Self::TwoMinutes => "2min",
            Self::ThreeMinutes => "3min",
            Self::FiveMinutes => "5min",
            Self::TenMinutes => "10min",
            Self::FifteenMinutes => "15min",
            Self::ThirtyMinutes => "30min",
            Self::OneHour => "1hour",
            Self::TwoHours => "2hour",
            Self::FourHours => "4hour",
            Self::OneDay => "1day",
            Self::OneWeek => "1week",
            Self::OneMonth => "1month",
        }
    }
}

/// Order book source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBookType {
    /// Not specified; the server default applies.
    #[default]
    Unspecified,
    /// Exchange order book.
    Exchange,
    /// Dealer order book.
    Dealer,
    /// Exchange and dealer combined.
    All,
}

impl OrderBookType {
    /// Canonical symbol of the order book type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Exchange => "exchange",
            Self::Dealer => "dealer",
            Self::All => "all",
        }
    }
}

/// Source of trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSource {
    /// Not specified; the server default applies.
    #[default]
    Unspecified,
    /// Exchange trades.
    Exchange,
    /// Dealer trades.
    Dealer,
    /// Exchange and dealer trades.
    All,
}

impl TradeSource {
    /// Canonical symbol of the trade source.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Exchange => "exchange",
            Self::Dealer => "dealer",
            Self::All => "all",
        }
    }
}

/// Source of candles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleSource {
    /// Not specified; the server default applies.
    #[default]
    Unspecified,
    /// Exchange session candles only.
    Exchange,
    /// Candles including weekend sessions.
    IncludeWeekend,
}

impl CandleSource {
    /// Canonical symbol of the candle source.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Exchange => "exchange",
            Self::IncludeWeekend => "include_weekend",
        }
    }
}

// =============================================================================
// Subscription Key
// =============================================================================

/// A subscription identified by its kind and canonical parameters.
///
/// Instrument ids are always de-duplicated and sorted, so keys built from
/// the same set of ids compare equal regardless of input order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionKey {
    /// Order book subscription.
    OrderBook {
        /// Canonical instrument ids.
        instrument_ids: Vec<String>,
        /// Depth snapped to one of [`ALLOWED_DEPTHS`].
        depth: u32,
        /// Order book source.
        order_book_type: OrderBookType,
    },
    /// Candle subscription.
    Candles {
        /// Canonical instrument ids.
        instrument_ids: Vec<String>,
        /// Candle interval.
        interval: CandleInterval,
        /// Deliver candles only once they are closed.
        waiting_close: bool,
        /// Candle source.
        candle_source: CandleSource,
    },
    /// Trade subscription.
    Trades {
        /// Canonical instrument ids.
        instrument_ids: Vec<String>,
        /// Trade source.
        trade_source: TradeSource,
        /// Include open interest in trade events.
        with_open_interest: bool,
    },
    /// Trading status subscription.
    Info {
        /// Canonical instrument ids.
        instrument_ids: Vec<String>,
    },
    /// Last price subscription.
    LastPrice {
        /// Canonical instrument ids.
        instrument_ids: Vec<String>,
    },
}

impl SubscriptionKey {
    /// Kind of this subscription.
    #[must_use]
    pub const fn kind(&self) -> SubscriptionKind {
        match self {
            Self::OrderBook { .. } => SubscriptionKind::OrderBook,
            Self::Candles { .. } => SubscriptionKind::Candles,
            Self::Trades { .. } => SubscriptionKind::Trades,
            Self::Info { .. } => SubscriptionKind::Info,
            Self::LastPrice { .. } => SubscriptionKind::LastPrice,
        }
    }

    /// Instrument ids covered by this subscription.
    #[must_use]
    pub fn instrument_ids(&self) -> &[String] {
        match self {
            Self::OrderBook { instrument_ids, .. }
            | Self::Candles { instrument_ids, .. }
            | Self::Trades { instrument_ids, .. }
            | Self::Info { instrument_ids }
            | Self::LastPrice { instrument_ids } => instrument_ids,
        }
    }

    /// Quota weight of this subscription.
    ///
    /// `info` subscriptions cost nothing; everything else costs
    /// `max(1, number_of_instrument_ids)`.
    #[must_use]
    pub fn weight(&self) -> usize {
        match self {
            Self::Info { .. } => 0,
            _ => self.instrument_ids().len().max(1),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind(), self.instrument_ids().join(","))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn info_subscriptions_are_free() {
        let key = SubscriptionKey::Info {
            instrument_ids: ids(&["a", "b", "c"]),
        };
        assert_eq!(key.weight(), 0);
    }

    #[test]
    fn weight_counts_instruments() {
        let key = SubscriptionKey::LastPrice {
            instrument_ids: ids(&["a", "b", "c"]),
        };
        assert_eq!(key.weight(), 3);
    }

    #[test]
    fn weight_is_at_least_one() {
        let key = SubscriptionKey::Trades {
            instrument_ids: vec![],
            trade_source: TradeSource::All,
            with_open_interest: false,
        };
        assert_eq!(key.weight(), 1);
    }

    #[test]
    fn key_reports_kind() {
        let key = SubscriptionKey::OrderBook {
            instrument_ids: ids(&["uid1"]),
            depth: 10,
            order_book_type: OrderBookType::Exchange,
        };
        assert_eq!(key.kind(), SubscriptionKind::OrderBook);
        assert_eq!(key.to_string(), "orderbook[uid1]");
    }

    #[test]
    fn kind_names_are_canonical() {
        let names: Vec<_> = SubscriptionKind::all().iter().map(|k| k.as_str()).collect();
        assert_eq!(
            names,
            vec!["orderbook", "candles", "trades", "info", "last_price"]
        );
    }
}
