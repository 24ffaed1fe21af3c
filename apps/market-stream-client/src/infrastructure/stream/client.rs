//! Market Data Stream
//!
//! Application-facing entry point tying together subscription state, the
//! dispatcher and the stream controller.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use market_stream_client::{MarketDataStream, PayloadFormat, EventType, StreamConfig};
//! use market_stream_client::application::ports::{ChannelManager, StreamTransport};
//!
//! async fn run(
//!     channels: Arc<dyn ChannelManager>,
//!     transport: Arc<dyn StreamTransport>,
//! ) -> Result<(), market_stream_client::StreamError> {
//!     let stream = MarketDataStream::new(StreamConfig::default(), channels, transport)?;
//!
//!     stream.on(EventType::Candle, PayloadFormat::Raw, |event| {
//!         println!("{:?}", event.raw());
//!         Ok(())
//!     });
//!     stream.subscribe_candles(&["uid1"], "1min", false, None)?;
//!
//!     stream.listen().await
//! }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::controller::StreamController;
use super::listener::{AsyncListener, ListenerStatus};
use super::router::DefaultResponseRouter;
use crate::application::ports::{ChannelManager, PayloadMapper, StreamTransport};
use crate::application::services::SubscriptionStateManager;
use crate::domain::streaming::{EventType, PayloadFormat};
use crate::domain::subscription::{SubscriptionKey, SubscriptionParams};
use crate::error::StreamError;
use crate::infrastructure::config::StreamConfig;
use crate::infrastructure::dispatch::{DispatchStats, Event, EventDispatcher};
use crate::infrastructure::metrics;

/// Statistics returned by [`MarketDataStream::stats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStats {
    /// Dispatcher counters.
    pub dispatch: DispatchStats,
    /// Reconnects since the stream was created.
    pub reconnect_count: u64,
    /// Wall-clock time of the last response.
    pub last_event_at: Option<DateTime<Utc>>,
    /// Whether the stream is listening.
    pub listening: bool,
    /// Number of active subscriptions.
    pub subscriptions: usize,
    /// Quota weight used by active subscriptions.
    pub quota_used: usize,
}

/// Streaming market data client.
pub struct MarketDataStream {
    subscriptions: Arc<SubscriptionStateManager>,
    dispatcher: Arc<EventDispatcher>,
    controller: Arc<StreamController>,
    listener: AsyncListener,
    channels: Arc<dyn ChannelManager>,
}

impl MarketDataStream {
    /// Create a stream that delivers raw payloads only.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Config`] if `config` fails validation.
    pub fn new(
        config: StreamConfig,
        channels: Arc<dyn ChannelManager>,
        transport: Arc<dyn StreamTransport>,
    ) -> Result<Self, StreamError> {
        Self::build(config, channels, transport, DefaultResponseRouter::default())
    }

    /// Create a stream that maps payloads with `mapper` for handlers
    /// registered with [`PayloadFormat::Mapped`].
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Config`] if `config` fails validation.
    pub fn with_mapper(
        config: StreamConfig,
        channels: Arc<dyn ChannelManager>,
        transport: Arc<dyn StreamTransport>,
        mapper: Arc<dyn PayloadMapper>,
    ) -> Result<Self, StreamError> {
        Self::build(config, channels, transport, DefaultResponseRouter::new(mapper))
    }

    fn build(
        config: StreamConfig,
        channels: Arc<dyn ChannelManager>,
        transport: Arc<dyn StreamTransport>,
        router: DefaultResponseRouter,
    ) -> Result<Self, StreamError> {
        config.validate()?;

        let subscriptions = Arc::new(SubscriptionStateManager::new(config.subscription_limits()));
        if let Some(ms) = config.ping_delay_ms {
            subscriptions.set_ping_delay(ms)?;
        }

        let dispatcher = Arc::new(EventDispatcher::new(config.dispatch_config()));
        let controller = Arc::new(StreamController::new(
            config.controller_config(),
            Arc::clone(&channels),
            transport,
            Arc::new(router),
            Arc::clone(&subscriptions),
            Arc::clone(&dispatcher),
        ));
        let listener = AsyncListener::new(Arc::clone(&controller), config.shutdown_timeout);

        Ok(Self {
            subscriptions,
            dispatcher,
            controller,
            listener,
            channels,
        })
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// Register a handler for `event_type`.
    ///
    /// With more than one worker thread, events may reach a handler out of
    /// arrival order; configure a pool size of 1 when order matters.
    pub fn on<F>(&self, event_type: EventType, format: PayloadFormat, handler: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.on(event_type, format, handler);
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe to order books. `depth` is snapped to the nearest allowed
    /// depth.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] for bad parameters or when the
    /// quota or mutation rate limit is exhausted.
    pub fn subscribe_orderbook(
        &self,
        instrument_ids: &[&str],
        depth: u32,
        order_book_type: Option<&str>,
    ) -> Result<Vec<SubscriptionKey>, StreamError> {
        self.subscribe(&orderbook_params(instrument_ids, depth, order_book_type))
    }

    /// Unsubscribe from order books.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] for bad parameters or when the
    /// mutation rate limit is exhausted.
    pub fn unsubscribe_orderbook(
        &self,
        instrument_ids: &[&str],
        depth: u32,
        order_book_type: Option<&str>,
    ) -> Result<Vec<SubscriptionKey>, StreamError> {
        self.unsubscribe(&orderbook_params(instrument_ids, depth, order_book_type))
    }

    /// Subscribe to candles.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] for bad parameters or when the
    /// quota or mutation rate limit is exhausted.
    pub fn subscribe_candles(
        &self,
        instrument_ids: &[&str],
        interval: &str,
        waiting_close: bool,
        candle_source: Option<&str>,
    ) -> Result<Vec<SubscriptionKey>, StreamError> {
        self.subscribe(&candle_params(instrument_ids, interval, waiting_close, candle_source))
    }

    /// Unsubscribe from candles.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] for bad parameters or when the
    /// mutation rate limit is exhausted.
    pub fn unsubscribe_candles(
        &self,
        instrument_ids: &[&str],
        interval: &str,
        waiting_close: bool,
        candle_source: Option<&str>,
    ) -> Result<Vec<SubscriptionKey>, StreamError> {
        self.unsubscribe(&candle_params(instrument_ids, interval, waiting_close, candle_source))
    }

    /// Subscribe to trades.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] for bad parameters or when the
    /// quota or mutation rate limit is exhausted.
    pub fn subscribe_trades(
        &self,
        instrument_ids: &[&str],
        trade_source: Option<&str>,
        with_open_interest: bool,
    ) -> Result<Vec<SubscriptionKey>, StreamError> {
        self.subscribe(&trade_params(instrument_ids, trade_source, with_open_interest))
    }

    /// Unsubscribe from trades.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] for bad parameters or when the
    /// mutation rate limit is exhausted.
    pub fn unsubscribe_trades(
        &self,
        instrument_ids: &[&str],
        trade_source: Option<&str>,
        with_open_interest: bool,
    ) -> Result<Vec<SubscriptionKey>, StreamError> {
        self.unsubscribe(&trade_params(instrument_ids, trade_source, with_open_interest))
    }

    /// Subscribe to trading status changes. Costs no quota.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] for bad parameters or when the
    /// mutation rate limit is exhausted.
    pub fn subscribe_info(
        &self,
        instrument_ids: &[&str],
    ) -> Result<Vec<SubscriptionKey>, StreamError> {
        self.subscribe(&SubscriptionParams::Info {
            instrument_ids: owned(instrument_ids),
        })
    }

    /// Unsubscribe from trading status changes.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] for bad parameters or when the
    /// mutation rate limit is exhausted.
    pub fn unsubscribe_info(
        &self,
        instrument_ids: &[&str],
    ) -> Result<Vec<SubscriptionKey>, StreamError> {
        self.unsubscribe(&SubscriptionParams::Info {
            instrument_ids: owned(instrument_ids),
        })
    }

    /// Subscribe to last prices.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] for bad parameters or when the
    /// quota or mutation rate limit is exhausted.
    pub fn subscribe_last_price(
        &self,
        instrument_ids: &[&str],
    ) -> Result<Vec<SubscriptionKey>, StreamError> {
        self.subscribe(&SubscriptionParams::LastPrice {
            instrument_ids: owned(instrument_ids),
        })
    }

    /// Unsubscribe from last prices.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] for bad parameters or when the
    /// mutation rate limit is exhausted.
    pub fn unsubscribe_last_price(
        &self,
        instrument_ids: &[&str],
    ) -> Result<Vec<SubscriptionKey>, StreamError> {
        self.unsubscribe(&SubscriptionParams::LastPrice {
            instrument_ids: owned(instrument_ids),
        })
    }

    /// Subscribe with already-built parameters.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] for bad parameters or when the
    /// quota or mutation rate limit is exhausted.
    pub fn subscribe(
        &self,
        params: &SubscriptionParams,
    ) -> Result<Vec<SubscriptionKey>, StreamError> {
        let keys = self.subscriptions.subscribe(params)?;
        self.record_subscriptions(&keys);
        Ok(keys)
    }

    /// Unsubscribe with already-built parameters.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] for bad parameters or when the
    /// mutation rate limit is exhausted.
    pub fn unsubscribe(
        &self,
        params: &SubscriptionParams,
    ) -> Result<Vec<SubscriptionKey>, StreamError> {
        let keys = self.subscriptions.unsubscribe(params)?;
        self.record_subscriptions(&keys);
        Ok(keys)
    }

    /// Active subscriptions in registration order.
    #[must_use]
    pub fn current_subscriptions(&self) -> Vec<SubscriptionKey> {
        self.subscriptions.current_subscriptions()
    }

    /// Ask the server to report the subscriptions of this stream. The answer
    /// arrives as a `subscription_status` event.
    pub fn request_my_subscriptions(&self) {
        self.subscriptions.request_my_subscriptions();
    }

    /// Send a client ping.
    pub fn send_ping(&self, time: Option<DateTime<Utc>>) {
        self.subscriptions.send_ping(time);
    }

    /// Change the server ping interval.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] unless `ms` lies within
    /// 5000..=180000.
    pub fn set_ping_delay(&self, ms: u32) -> Result<(), StreamError> {
        self.subscriptions.set_ping_delay(ms)
    }

    fn record_subscriptions(&self, keys: &[SubscriptionKey]) {
        metrics::set_subscriptions(keys.len(), self.subscriptions.used_weight());
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Listen on the current task until stopped.
    ///
    /// # Errors
    ///
    /// See [`StreamController::listen`].
    pub async fn listen(&self) -> Result<(), StreamError> {
        self.controller.listen().await
    }

    /// Listen on a background task.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] if already listening.
    pub fn listen_async(&self) -> Result<(), StreamError> {
        self.listener.start()
    }

    /// Stop listening, waiting for a background listener if one runs.
    ///
    /// # Errors
    ///
    /// Returns the error a background listener ended with.
    pub async fn stop(&self) -> Result<(), StreamError> {
        self.listener.stop().await
    }

    /// Stop listening and close the channel.
    ///
    /// # Errors
    ///
    /// Returns the error a background listener ended with.
    pub async fn close(&self) -> Result<(), StreamError> {
        let result = self.stop().await;
        self.channels.close();
        result
    }

    /// Drop the current connection and reconnect. Returns `false` when not
    /// listening.
    pub fn force_reconnect(&self) -> bool {
        self.controller.force_reconnect()
    }

    /// Check whether the stream is listening.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.controller.is_listening()
    }

    /// Dispatch and session statistics.
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        let session = self.controller.snapshot();
        StreamStats {
            dispatch: self.dispatcher.stats(),
            reconnect_count: session.reconnect_count,
            last_event_at: session.last_event_at,
            listening: session.listening,
            subscriptions: self.subscriptions.current_subscriptions().len(),
            quota_used: self.subscriptions.used_weight(),
        }
    }

    /// Background listener status.
    #[must_use]
    pub fn listener_status(&self) -> ListenerStatus {
        self.listener.status()
    }
}

fn owned(ids: &[&str]) -> Vec<String> {
    ids.iter().map(ToString::to_string).collect()
}

fn orderbook_params(ids: &[&str], depth: u32, order_book_type: Option<&str>) -> SubscriptionParams {
    SubscriptionParams::OrderBook {
        instrument_ids: owned(ids),
        depth,
        order_book_type: order_book_type.map(str::to_string),
    }
}

fn candle_params(
    ids: &[&str],
    interval: &str,
    waiting_close: bool,
    candle_source: Option<&str>,
) -> SubscriptionParams {
    SubscriptionParams::Candles {
        instrument_ids: owned(ids),
        interval: interval.to_string(),
        waiting_close,
        candle_source: candle_source.map(str::to_string),
    }
}

fn trade_params(
    ids: &[&str],
    trade_source: Option<&str>,
    with_open_interest: bool,
) -> SubscriptionParams {
    SubscriptionParams::Trades {
        instrument_ids: owned(ids),
        trade_source: trade_source.map(str::to_string),
        with_open_interest,
    }
}
