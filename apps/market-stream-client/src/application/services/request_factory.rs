//! Subscription Request Factory
//!
//! Builds outbound wire requests from canonical subscription keys.

use chrono::{DateTime, Utc};

use crate::domain::streaming::{
    CandleInstrument, MarketDataRequest, OrderBookInstrument, SubscribeCandlesRequest,
    SubscribeInstrumentsRequest, SubscribeOrderBookRequest, SubscribeTradesRequest,
    SubscriptionAction,
};
use crate::domain::subscription::SubscriptionKey;

/// Build the wire mutation that applies `action` to `key`.
#[must_use]
pub fn mutation(key: &SubscriptionKey, action: SubscriptionAction) -> MarketDataRequest {
    match key {
        SubscriptionKey::OrderBook {
            instrument_ids,
            depth,
            order_book_type,
        } => MarketDataRequest::SubscribeOrderBook(SubscribeOrderBookRequest {
            action,
            instruments: instrument_ids
                .iter()
                .map(|id| OrderBookInstrument {
                    instrument_id: id.clone(),
                    depth: *depth,
                    order_book_type: *order_book_type,
                })
                .collect(),
        }),
        SubscriptionKey::Candles {
            instrument_ids,
            interval,
            waiting_close,
            candle_source,
        } => MarketDataRequest::SubscribeCandles(SubscribeCandlesRequest {
            action,
            instruments: instrument_ids
                .iter()
                .map(|id| CandleInstrument {
                    instrument_id: id.clone(),
                    interval: *interval,
                })
                .collect(),
            waiting_close: *waiting_close,
            candle_source: *candle_source,
        }),
        SubscriptionKey::Trades {
            instrument_ids,
            trade_source,
            with_open_interest,
        } => MarketDataRequest::SubscribeTrades(SubscribeTradesRequest {
            action,
            instrument_ids: instrument_ids.clone(),
            trade_source: *trade_source,
            with_open_interest: *with_open_interest,
        }),
        SubscriptionKey::Info { instrument_ids } => {
            MarketDataRequest::SubscribeInfo(SubscribeInstrumentsRequest {
                action,
                instrument_ids: instrument_ids.clone(),
            })
        }
        SubscriptionKey::LastPrice { instrument_ids } => {
            MarketDataRequest::SubscribeLastPrice(SubscribeInstrumentsRequest {
                action,
                instrument_ids: instrument_ids.clone(),
            })
        }
    }
}

/// Client ping request.
#[must_use]
pub const fn ping(time: Option<DateTime<Utc>>) -> MarketDataRequest {
    MarketDataRequest::Ping { time }
}

/// Server ping interval request.
#[must_use]
pub const fn ping_settings(ping_delay_ms: u32) -> MarketDataRequest {
    MarketDataRequest::PingSettings { ping_delay_ms }
}

/// Active subscriptions listing request.
#[must_use]
pub const fn my_subscriptions() -> MarketDataRequest {
    MarketDataRequest::GetMySubscriptions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::{CandleInterval, CandleSource, OrderBookType};

    #[test]
    fn orderbook_mutation_carries_depth_per_instrument() {
        let key = SubscriptionKey::OrderBook {
            instrument_ids: vec!["a".to_string(), "b".to_string()],
            depth: 10,
            order_book_type: OrderBookType::Exchange,
        };

        let MarketDataRequest::SubscribeOrderBook(request) =
            mutation(&key, SubscriptionAction::Subscribe)
        else {
            panic!("expected order book request");
        };

        assert_eq!(request.action, SubscriptionAction::Subscribe);
        assert_eq!(request.instruments.len(), 2);
        assert!(request.instruments.iter().all(|i| i.depth == 10));
        assert!(
            request
                .instruments
                .iter()
                .all(|i| i.order_book_type == OrderBookType::Exchange)
        );
    }

    #[test]
    fn candle_mutation_carries_interval() {
        let key = SubscriptionKey::Candles {
            instrument_ids: vec!["uid".to_string()],
            interval: CandleInterval::OneHour,
            waiting_close: true,
            candle_source: CandleSource::Exchange,
        };

        let MarketDataRequest::SubscribeCandles(request) =
            mutation(&key, SubscriptionAction::Unsubscribe)
        else {
            panic!("expected candle request");
        };

        assert_eq!(request.action, SubscriptionAction::Unsubscribe);
        assert_eq!(request.instruments[0].interval, CandleInterval::OneHour);
        assert!(request.waiting_close);
        assert_eq!(request.candle_source, CandleSource::Exchange);
    }

    #[test]
    fn mutation_serializes_with_request_tag() {
        let key = SubscriptionKey::LastPrice {
            instrument_ids: vec!["uid".to_string()],
        };
        let json = serde_json::to_value(mutation(&key, SubscriptionAction::Subscribe)).unwrap();

        assert_eq!(json["request"], "subscribe_last_price");
        assert_eq!(json["action"], "subscribe");
        assert_eq!(json["instrument_ids"][0], "uid");
    }
}
