//! Parameter Normalization
//!
//! Turns caller-supplied subscription parameters into a canonical
//! [`SubscriptionKey`]. Normalization is where malformed input is rejected,
//! so nothing downstream has to re-validate.

use std::collections::BTreeSet;

use super::{
    CandleInterval, CandleSource, OrderBookType, SubscriptionKey, SubscriptionKind, TradeSource,
};

/// Order book depths accepted by the server.
pub const ALLOWED_DEPTHS: [u32; 6] = [1, 10, 20, 30, 40, 50];

/// Errors produced while normalizing subscription parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// No instrument ids were given.
    #[error("{0} subscription requires at least one instrument id")]
    MissingInstruments(SubscriptionKind),
    /// An instrument id was blank.
    #[error("instrument id must not be blank")]
    BlankInstrumentId,
    /// Order book depth was zero.
    #[error("order book depth must be positive, got {0}")]
    InvalidDepth(u32),
    /// An enum value could not be resolved.
    #[error("unknown {field} value: {value:?}")]
    UnknownValue {
        /// Name of the parameter.
        field: &'static str,
        /// Value as supplied.
        value: String,
    },
}

/// Subscription parameters as supplied by the application.
///
/// Enum-like fields are free-form strings and accept common aliases
/// (`"1m"`, `"1min"`, `"CANDLE_INTERVAL_1_MIN"` all name the same interval).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionParams {
    /// Order book parameters.
    OrderBook {
        /// Instrument ids, in any order.
        instrument_ids: Vec<String>,
        /// Requested depth; snapped to the nearest allowed value.
        depth: u32,
        /// Order book type, defaults to unspecified.
        order_book_type: Option<String>,
    },
    /// Candle parameters.
    Candles {
        /// Instrument ids, in any order.
        instrument_ids: Vec<String>,
        /// Candle interval.
        interval: String,
        /// Deliver candles only once closed.
        waiting_close: bool,
        /// Candle source, defaults to unspecified.
        candle_source: Option<String>,
    },
    /// Trade parameters.
    Trades {
        /// Instrument ids, in any order.
        instrument_ids: Vec<String>,
        /// Trade source, defaults to unspecified.
        trade_source: Option<String>,
        /// Include open interest.
        with_open_interest: bool,
    },
    /// Trading status parameters.
    Info {
        /// Instrument ids, in any order.
        instrument_ids: Vec<String>,
    },
    /// Last price parameters.
    LastPrice {
        /// Instrument ids, in any order.
        instrument_ids: Vec<String>,
    },
}

impl SubscriptionParams {
    /// Kind of subscription these parameters describe.
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
}

/// Normalize parameters into a canonical subscription key.
///
/// # Errors
///
/// Returns [`NormalizeError`] for missing or blank instrument ids, a zero
/// depth, or an enum value that does not resolve.
pub fn normalize(params: &SubscriptionParams) -> Result<SubscriptionKey, NormalizeError> {
    let kind = params.kind();
    let key = match params {
        SubscriptionParams::OrderBook {
            instrument_ids,
            depth,
            order_book_type,
        } => SubscriptionKey::OrderBook {
            instrument_ids: canonical_ids(kind, instrument_ids)?,
            depth: snap_depth(*depth)?,
            order_book_type: order_book_type
                .as_deref()
                .map(parse_order_book_type)
                .transpose()?
                .unwrap_or_default(),
        },
        SubscriptionParams::Candles {
            instrument_ids,
            interval,
            waiting_close,
            candle_source,
        } => SubscriptionKey::Candles {
            instrument_ids: canonical_ids(kind, instrument_ids)?,
            interval: parse_interval(interval)?,
            waiting_close: *waiting_close,
            candle_source: candle_source
                .as_deref()
                .map(parse_candle_source)
                .transpose()?
                .unwrap_or_default(),
        },
        SubscriptionParams::Trades {
            instrument_ids,
            trade_source,
            with_open_interest,
        } => SubscriptionKey::Trades {
            instrument_ids: canonical_ids(kind, instrument_ids)?,
            trade_source: trade_source
                .as_deref()
                .map(parse_trade_source)
                .transpose()?
                .unwrap_or_default(),
            with_open_interest: *with_open_interest,
        },
        SubscriptionParams::Info { instrument_ids } => SubscriptionKey::Info {
            instrument_ids: canonical_ids(kind, instrument_ids)?,
        },
        SubscriptionParams::LastPrice { instrument_ids } => SubscriptionKey::LastPrice {
            instrument_ids: canonical_ids(kind, instrument_ids)?,
        },
    };
    Ok(key)
}

/// Snap a requested depth to the nearest value in [`ALLOWED_DEPTHS`].
///
/// Ties resolve to the smaller depth, so `15` becomes `10`.
///
/// # Errors
///
/// Returns [`NormalizeError::InvalidDepth`] for a zero depth.
pub fn snap_depth(depth: u32) -> Result<u32, NormalizeError> {
    if depth == 0 {
        return Err(NormalizeError::InvalidDepth(depth));
    }

    let mut best = ALLOWED_DEPTHS[0];
    for candidate in ALLOWED_DEPTHS {
        if candidate.abs_diff(depth) < best.abs_diff(depth) {
            best = candidate;
        }
    }
    Ok(best)
}

fn canonical_ids(kind: SubscriptionKind, ids: &[String]) -> Result<Vec<String>, NormalizeError> {
    if ids.is_empty() {
        return Err(NormalizeError::MissingInstruments(kind));
    }

    let mut unique = BTreeSet::new();
    for id in ids {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(NormalizeError::BlankInstrumentId);
        }
        unique.insert(trimmed.to_string());
    }
    Ok(unique.into_iter().collect())
}

/// Lowercase, strip a known enum prefix, and drop separators.
fn fold(value: &str, prefixes: &[&str]) -> String {
    let lowered = value.trim().to_lowercase();
    let stripped = prefixes
        .iter()
        .find_map(|p| lowered.strip_prefix(p))
        .unwrap_or(lowered.as_str());
    stripped
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .collect()
}

fn unknown(field: &'static str, value: &str) -> NormalizeError {
    NormalizeError::UnknownValue {
        field,
        value: value.to_string(),
    }
}

fn parse_interval(value: &str) -> Result<CandleInterval, NormalizeError> {
    let folded = fold(value, &["subscription_interval_", "candle_interval_"]);
    let interval = match folded.as_str() {
        "1m" | "1min" | "1minute" | "oneminute" | "minute" => CandleInterval::OneMinute,
        "2m" | "2min" | "2minutes" | "twominutes" => CandleInterval::TwoMinutes,
        "3m" | "3min" | "3minutes" | "threeminutes" => CandleInterval::ThreeMinutes,
        "5m" | "5min" | "5minutes" | "fiveminutes" => CandleInterval::FiveMinutes,
        "10m" | "10min" | "10minutes" | "tenminutes" => CandleInterval::TenMinutes,
        "15m" | "15min" | "15minutes" | "fifteenminutes" => CandleInterval::FifteenMinutes,
        "30m" | "30min" | "30minutes" | "thirtyminutes" => CandleInterval::ThirtyMinutes,
        "1h" | "1hour" | "hour" | "onehour" | "60min" => CandleInterval::OneHour,
        "2h" | "2hour" | "2hours" | "twohours" => CandleInterval::TwoHours,
        "4h" | "4hour" | "4hours" | "fourhours" => CandleInterval::FourHours,
        "1d" | "1day" | "day" | "oneday" => CandleInterval::OneDay,
        "1w" | "1week" | "week" | "oneweek" => CandleInterval::OneWeek,
        "1mo" | "1month" | "month" | "onemonth" => CandleInterval::OneMonth,
        _ => return Err(unknown("interval", value)),
    };
    Ok(interval)
}

fn parse_order_book_type(value: &str) -> Result<OrderBookType, NormalizeError> {
    match fold(value, &["order_book_type_", "orderbook_type_"]).as_str() {
        "unspecified" | "" => Ok(OrderBookType::Unspecified),
        "exchange" => Ok(OrderBookType::Exchange),
        "dealer" => Ok(OrderBookType::Dealer),
        "all" => Ok(OrderBookType::All),
        _ => Err(unknown("order_book_type", value)),
    }
}

fn parse_trade_source(value: &str) -> Result<TradeSource, NormalizeError> {
    match fold(value, &["trade_source_"]).as_str() {
        "unspecified" | "" => Ok(TradeSource::Unspecified),
        "exchange" => Ok(TradeSource::Exchange),
        "dealer" => Ok(TradeSource::Dealer),
        "all" => Ok(TradeSource::All),
        _ => Err(unknown("trade_source", value)),
    }
}

fn parse_candle_source(value: &str) -> Result<CandleSource, NormalizeError> {
    match fold(value, &["candle_source_"]).as_str() {
        "unspecified" | "" => Ok(CandleSource::Unspecified),
        "exchange" => Ok(CandleSource::Exchange),
        "includeweekend" | "weekend" => Ok(CandleSource::IncludeWeekend),
        _ => Err(unknown("candle_source", value)),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test_case(1 => 1)]
    #[test_case(5 => 1)]
    #[test_case(6 => 10)]
    #[test_case(11 => 10)]
    #[test_case(15 => 10 ; "tie resolves down")]
    #[test_case(16 => 20)]
    #[test_case(50 => 50)]
    #[test_case(500 => 50)]
    fn depth_snaps_to_allowed_value(depth: u32) -> u32 {
        snap_depth(depth).unwrap()
    }

    #[test]
    fn zero_depth_is_rejected() {
        assert_eq!(snap_depth(0), Err(NormalizeError::InvalidDepth(0)));
    }

    #[test_case("1m" => CandleInterval::OneMinute)]
    #[test_case("1min" => CandleInterval::OneMinute)]
    #[test_case("CANDLE_INTERVAL_1_MIN" => CandleInterval::OneMinute)]
    #[test_case("SUBSCRIPTION_INTERVAL_FIVE_MINUTES" => CandleInterval::FiveMinutes)]
    #[test_case("hour" => CandleInterval::OneHour)]
    #[test_case("4h" => CandleInterval::FourHours)]
    #[test_case(" Day " => CandleInterval::OneDay)]
    #[test_case("month" => CandleInterval::OneMonth)]
    fn interval_aliases_resolve(value: &str) -> CandleInterval {
        parse_interval(value).unwrap()
    }

    #[test]
    fn unknown_interval_is_rejected() {
        let err = parse_interval("7min").unwrap_err();
        assert!(matches!(err, NormalizeError::UnknownValue { field: "interval", .. }));
    }

    #[test]
    fn orderbook_depth_is_snapped() {
        let key = normalize(&SubscriptionParams::OrderBook {
            instrument_ids: ids(&["uid1"]),
            depth: 11,
            order_book_type: None,
        })
        .unwrap();

        assert_eq!(
            key,
            SubscriptionKey::OrderBook {
                instrument_ids: ids(&["uid1"]),
                depth: 10,
                order_book_type: OrderBookType::Unspecified,
            }
        );
    }

    #[test]
    fn instrument_ids_are_trimmed_deduplicated_and_sorted() {
        let key = normalize(&SubscriptionParams::LastPrice {
            instrument_ids: ids(&["b", " a", "b ", "c"]),
        })
        .unwrap();

        assert_eq!(key.instrument_ids(), ids(&["a", "b", "c"]).as_slice());
    }

    #[test]
    fn equal_inputs_in_different_order_share_a_key() {
        let first = normalize(&SubscriptionParams::Trades {
            instrument_ids: ids(&["x", "y"]),
            trade_source: Some("TRADE_SOURCE_ALL".to_string()),
            with_open_interest: true,
        })
        .unwrap();
        let second = normalize(&SubscriptionParams::Trades {
            instrument_ids: ids(&["y", "x", "x"]),
            trade_source: Some("all".to_string()),
            with_open_interest: true,
        })
        .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn empty_instrument_list_is_rejected() {
        let err = normalize(&SubscriptionParams::Info {
            instrument_ids: vec![],
        })
        .unwrap_err();
        assert_eq!(err, NormalizeError::MissingInstruments(SubscriptionKind::Info));
    }

    #[test]
    fn blank_instrument_id_is_rejected() {
        let err = normalize(&SubscriptionParams::Info {
            instrument_ids: ids(&["ok", "  "]),
        })
        .unwrap_err();
        assert_eq!(err, NormalizeError::BlankInstrumentId);
    }

    #[test]
    fn candle_source_aliases_resolve() {
        let key = normalize(&SubscriptionParams::Candles {
            instrument_ids: ids(&["uid"]),
            interval: "5m".to_string(),
            waiting_close: true,
            candle_source: Some("CANDLE_SOURCE_INCLUDE_WEEKEND".to_string()),
        })
        .unwrap();

        assert_eq!(
            key,
            SubscriptionKey::Candles {
                instrument_ids: ids(&["uid"]),
                interval: CandleInterval::FiveMinutes,
                waiting_close: true,
                candle_source: CandleSource::IncludeWeekend,
            }
        );
    }

    #[test]
    fn unknown_order_book_type_is_rejected() {
        let err = normalize(&SubscriptionParams::OrderBook {
            instrument_ids: ids(&["uid"]),
            depth: 10,
            order_book_type: Some("retail".to_string()),
        })
        .unwrap_err();
        assert!(matches!(
            err,
            NormalizeError::UnknownValue {
                field: "order_book_type",
                ..
            }
        ));
    }
}
