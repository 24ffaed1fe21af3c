//! Shared fakes for integration tests.
//!
//! `MockChannels` is a mockall double for the channel manager; the
//! `ScriptedTransport` plays back one scripted connection per
//! `open_stream` call and records what the client sent on each.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use mockall::mock;
use parking_lot::Mutex;
use tonic::Status;
use tonic::transport::{Channel, Endpoint};

use market_stream_client::application::ports::{
    ChannelManager, RequestStream, ResponseStream, StreamTransport,
};
use market_stream_client::domain::streaming::{
    LastPrice, MarketDataRequest, MarketDataResponse, Ping,
};

mock! {
    pub Channels {}

    #[async_trait]
    impl ChannelManager for Channels {
        async fn acquire(&self) -> Result<Channel, Status>;
        fn reset(&self, source: &str, reason: &str);
        fn close(&self);
    }
}

/// Channel that is never actually dialled.
pub fn lazy_channel() -> Channel {
    Endpoint::from_static("http://127.0.0.1:1").connect_lazy()
}

/// Channel manager that hands out lazy channels and records reset sources.
pub fn channels(resets: Arc<Mutex<Vec<String>>>) -> MockChannels {
    let mut channels = MockChannels::new();
    channels.expect_acquire().returning(|| Ok(lazy_channel()));
    channels
        .expect_reset()
        .returning(move |source, _reason| resets.lock().push(source.to_string()));
    channels.expect_close().return_const(());
    channels
}

/// Behaviour of one scripted connection.
pub enum Script {
    /// `open_stream` fails with this status.
    Refuse(Status),
    /// Yield these items, then end the stream.
    Finish(Vec<Result<MarketDataResponse, Status>>),
    /// Yield these items, then stay open until the client drops the stream.
    Hold(Vec<Result<MarketDataResponse, Status>>),
}

/// Transport that plays back scripted connections. Once the script runs
/// out, every further connection is refused as unavailable.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    sent: Arc<Mutex<Vec<Arc<Mutex<Vec<MarketDataRequest>>>>>>,
}

impl ScriptedTransport {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            sent: Arc::default(),
        }
    }

    /// Number of `open_stream` calls so far.
    pub fn opened(&self) -> usize {
        self.sent.lock().len()
    }

    /// Requests sent on connection `index` so far.
    pub fn sent(&self, index: usize) -> Vec<MarketDataRequest> {
        self.sent
            .lock()
            .get(index)
            .map(|requests| requests.lock().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn open_stream(
        &self,
        _channel: Channel,
        mut outbound: RequestStream,
    ) -> Result<ResponseStream, Status> {
        let requests = Arc::new(Mutex::new(Vec::new()));
        self.sent.lock().push(Arc::clone(&requests));

        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| Script::Refuse(Status::unavailable("no more scripted connections")));

        let responses: ResponseStream = match script {
            Script::Refuse(status) => return Err(status),
            Script::Finish(items) => Box::pin(futures::stream::iter(items)),
            Script::Hold(items) => {
                Box::pin(futures::stream::iter(items).chain(futures::stream::pending()))
            }
        };

        tokio::spawn(async move {
            while let Some(request) = outbound.next().await {
                requests.lock().push(request);
            }
        });

        Ok(responses)
    }
}

pub fn ping() -> MarketDataResponse {
    MarketDataResponse::Ping(Ping {
        time: Utc::now(),
        stream_id: None,
    })
}

pub fn last_price(instrument_id: &str) -> MarketDataResponse {
    MarketDataResponse::LastPrice(LastPrice {
        instrument_id: instrument_id.to_string(),
        price: rust_decimal::Decimal::new(10_050, 2),
        time: Utc::now(),
    })
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}

/// Await `future` for at most five seconds.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("future did not complete within 5s")
}
