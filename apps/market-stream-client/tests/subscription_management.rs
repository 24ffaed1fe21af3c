//! Subscription management tests.
//!
//! Covers the subscribe/unsubscribe surface of `MarketDataStream` and the
//! invariants of the subscription state manager: idempotent mutations, the
//! quota ceiling and the mutation rate limit.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;

use common::{ScriptedTransport, channels};
use market_stream_client::application::ports::StreamTransport;
use market_stream_client::domain::streaming::MarketDataRequest;
use market_stream_client::domain::subscription::{SubscriptionKey, SubscriptionParams};
use market_stream_client::{
    MarketDataStream, StreamConfig, StreamError, SubscriptionLimits, SubscriptionStateManager,
};

// =============================================================================
// Test Setup
// =============================================================================

fn stream() -> MarketDataStream {
    stream_with(StreamConfig::default())
}

fn stream_with(config: StreamConfig) -> MarketDataStream {
    MarketDataStream::new(
        config,
        Arc::new(channels(Arc::new(Mutex::new(Vec::new())))),
        Arc::new(ScriptedTransport::default()) as Arc<dyn StreamTransport>,
    )
    .unwrap()
}

fn ids(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("uid{i}")).collect()
}

fn last_price(instrument_ids: Vec<String>) -> SubscriptionParams {
    SubscriptionParams::LastPrice { instrument_ids }
}

fn assert_invalid<T: std::fmt::Debug>(result: Result<T, StreamError>, needle: &str) {
    match result {
        Err(StreamError::InvalidArgument(message)) => {
            assert!(message.contains(needle), "{message:?} does not mention {needle:?}");
        }
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
}

// =============================================================================
// Facade
// =============================================================================

#[test]
fn invalid_config_is_rejected_at_construction() {
    let result = MarketDataStream::new(
        StreamConfig {
            stream_watchdog_interval: Duration::ZERO,
            ..StreamConfig::default()
        },
        Arc::new(channels(Arc::new(Mutex::new(Vec::new())))),
        Arc::new(ScriptedTransport::default()) as Arc<dyn StreamTransport>,
    );

    assert!(matches!(result, Err(StreamError::Config(_))));
}

#[test]
fn subscribe_is_idempotent() {
    let stream = stream();

    let first = stream.subscribe_last_price(&["uid1", "uid2"]).unwrap();
    let second = stream.subscribe_last_price(&["uid2", "uid1"]).unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(first, second);
    assert_eq!(stream.stats().quota_used, 2);
}

#[test]
fn unsubscribe_of_unknown_key_changes_nothing() {
    let stream = stream();
    stream.subscribe_info(&["uid1"]).unwrap();

    let remaining = stream.unsubscribe_trades(&["uid1"], None, false).unwrap();

    assert_eq!(remaining.len(), 1);
    assert_eq!(stream.current_subscriptions(), remaining);
}

#[test]
fn orderbook_depth_snaps_to_allowed_value() {
    let stream = stream();

    let keys = stream.subscribe_orderbook(&["uid1"], 11, None).unwrap();

    assert!(matches!(
        keys.as_slice(),
        [SubscriptionKey::OrderBook { depth: 10, .. }]
    ));
    // The snapped key is the one that gets removed.
    assert!(stream.unsubscribe_orderbook(&["uid1"], 12, None).unwrap().is_empty());
}

#[test]
fn candle_interval_aliases_share_a_key() {
    let stream = stream();

    stream.subscribe_candles(&["uid1"], "1min", false, None).unwrap();
    let keys = stream.subscribe_candles(&["uid1"], "1m", false, None).unwrap();

    assert_eq!(keys.len(), 1);
}

#[test]
fn invalid_parameters_are_rejected() {
    let stream = stream();

    assert!(matches!(
        stream.subscribe_orderbook(&["uid1"], 0, None),
        Err(StreamError::InvalidArgument(_))
    ));
    assert!(matches!(
        stream.subscribe_candles(&["uid1"], "7min", false, None),
        Err(StreamError::InvalidArgument(_))
    ));
    assert!(matches!(
        stream.subscribe_last_price(&[]),
        Err(StreamError::InvalidArgument(_))
    ));
    assert!(stream.current_subscriptions().is_empty());
}

#[test]
fn quota_ceiling_is_enforced() {
    let stream = stream();
    let full: Vec<String> = ids(300);
    let refs: Vec<&str> = full.iter().map(String::as_str).collect();

    stream.subscribe_last_price(&refs).unwrap();
    assert_eq!(stream.stats().quota_used, 300);

    assert_invalid(stream.subscribe_last_price(&["extra"]), "quota");
    assert_eq!(stream.current_subscriptions().len(), 1);

    // Trading status subscriptions carry no weight.
    stream.subscribe_info(&["extra"]).unwrap();
    assert_eq!(stream.stats().quota_used, 300);
}

#[tokio::test(start_paused = true)]
async fn mutation_rate_limit_recovers_after_window() {
    let stream = stream();

    for i in 0..100 {
        stream.subscribe_last_price(&[format!("uid{i}").as_str()]).unwrap();
    }
    assert_invalid(stream.subscribe_last_price(&["uid100"]), "rate limit");
    assert_invalid(stream.unsubscribe_last_price(&["uid0"]), "rate limit");

    tokio::time::advance(Duration::from_secs(61)).await;

    stream.subscribe_last_price(&["uid100"]).unwrap();
    assert_eq!(stream.current_subscriptions().len(), 101);
}

#[test]
fn no_op_mutations_do_not_spend_rate_budget() {
    let stream = stream_with(StreamConfig {
        mutation_limit: 2,
        ..StreamConfig::default()
    });

    stream.subscribe_last_price(&["uid1"]).unwrap();
    for _ in 0..10 {
        stream.subscribe_last_price(&["uid1"]).unwrap();
        stream.unsubscribe_last_price(&["uid9"]).unwrap();
    }

    stream.subscribe_last_price(&["uid2"]).unwrap();
    assert_invalid(stream.subscribe_last_price(&["uid3"]), "rate limit");
}

#[test]
fn ping_delay_bounds_are_checked() {
    let stream = stream();

    assert_invalid(stream.set_ping_delay(4_000), "5000..180000");
    assert_invalid(stream.set_ping_delay(180_001), "5000..180000");
    stream.set_ping_delay(5_000).unwrap();
    stream.set_ping_delay(180_000).unwrap();
}

#[test]
fn ping_delay_is_sent_before_subscriptions() {
    let manager = SubscriptionStateManager::default();
    manager
        .subscribe(&last_price(vec!["uid1".to_string()]))
        .unwrap();
    manager.set_ping_delay(6_000).unwrap();

    let initial = manager.initial_requests();

    assert_eq!(initial.len(), 2);
    assert_eq!(initial[0], MarketDataRequest::PingSettings { ping_delay_ms: 6_000 });
    assert!(initial[1].is_mutation());
    assert_eq!(manager.pending_len(), 0);
}

#[test]
fn control_requests_are_queued_in_order() {
    let manager = SubscriptionStateManager::default();

    manager.request_my_subscriptions();
    manager.send_ping(None);

    assert_eq!(
        manager.try_pop_request(),
        Some(MarketDataRequest::GetMySubscriptions)
    );
    assert_eq!(
        manager.try_pop_request(),
        Some(MarketDataRequest::Ping { time: None })
    );
    assert_eq!(manager.try_pop_request(), None);
}

// =============================================================================
// Invariants
// =============================================================================

fn small_limits() -> SubscriptionLimits {
    SubscriptionLimits {
        max_weight: 20,
        mutation_limit: 10_000,
        ..SubscriptionLimits::default()
    }
}

proptest! {
    #[test]
    fn used_weight_never_exceeds_quota(sizes in prop::collection::vec(1_usize..8, 1..30)) {
        let manager = SubscriptionStateManager::new(small_limits());

        for (batch, size) in sizes.into_iter().enumerate() {
            let params = last_price((0..size).map(|i| format!("b{batch}-{i}")).collect());
            let before = manager.used_weight();
            let pending = manager.pending_len();

            match manager.subscribe(&params) {
                Ok(_) => {
                    prop_assert_eq!(manager.used_weight(), before + size);
                    prop_assert_eq!(manager.pending_len(), pending + 1);
                }
                Err(_) => {
                    prop_assert!(before + size > 20);
                    prop_assert_eq!(manager.used_weight(), before);
                    prop_assert_eq!(manager.pending_len(), pending);
                }
            }
            prop_assert!(manager.used_weight() <= 20);
        }
    }

    #[test]
    fn replay_matches_registry(ops in prop::collection::vec((any::<bool>(), 0_usize..6), 1..40)) {
        let manager = SubscriptionStateManager::new(small_limits());

        for (subscribe, id) in ops {
            let params = last_price(vec![format!("uid{id}")]);
            if subscribe {
                manager.subscribe(&params).unwrap();
            } else {
                manager.unsubscribe(&params).unwrap();
            }
        }

        let initial = manager.initial_requests();
        prop_assert_eq!(initial.len(), manager.current_subscriptions().len());
        prop_assert!(initial.iter().all(MarketDataRequest::is_mutation));
        prop_assert_eq!(manager.pending_len(), 0);
    }
}
