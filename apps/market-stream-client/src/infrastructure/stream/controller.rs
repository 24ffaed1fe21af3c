//! Stream Lifecycle Controller
//!
//! Owns the run/stop state machine of the market data stream. While
//! listening it opens the stream, replays subscriptions, feeds responses to
//! the dispatcher and reconnects with backoff when the stream fails.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::Instrument;
use uuid::Uuid;

use super::failure::{FailureClass, rate_limit_reset};
use super::reconnect::{ReconnectConfig, ReconnectionStrategy, WaitOutcome};
use super::watchdog::{IdleWatchdog, WatchdogConfig, WatchdogTarget};
use crate::application::ports::{
    ChannelManager, RequestStream, ResponseRouter, ResponseStream, StreamTransport,
};
use crate::application::services::SubscriptionStateManager;
use crate::error::StreamError;
use crate::infrastructure::dispatch::EventDispatcher;
use crate::infrastructure::metrics;

const RESET_SOURCE: &str = "stream_controller";

/// Configuration for the stream controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Backoff between connection attempts.
    pub reconnect: ReconnectConfig,
    /// Idle watchdog settings.
    pub watchdog: WatchdogConfig,
    /// Pause after a rate-limit failure when the server gives no reset time.
    pub resource_exhausted_cooldown: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            watchdog: WatchdogConfig::default(),
            resource_exhausted_cooldown: Duration::from_secs(5),
        }
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Whether the controller is listening.
    pub listening: bool,
    /// Reconnects since the controller was created.
    pub reconnect_count: u64,
    /// Wall-clock time of the last response.
    pub last_event_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Session State
// =============================================================================

#[derive(Debug, Default)]
struct SessionState {
    running: bool,
    run_id: u64,
    reconnect_count: u64,
    started_at: Option<Instant>,
    last_event_at: Option<Instant>,
    last_event_wall: Option<DateTime<Utc>>,
    stop: Option<CancellationToken>,
    connection: Option<CancellationToken>,
}

struct Session {
    state: Mutex<SessionState>,
    channels: Arc<dyn ChannelManager>,
}

impl Session {
    fn begin(&self) -> Result<(u64, CancellationToken), StreamError> {
        let mut state = self.state.lock();
        if state.running {
            return Err(StreamError::InvalidArgument(
                "stream is already listening".to_string(),
            ));
        }

        let stop = CancellationToken::new();
        state.running = true;
        state.run_id += 1;
        state.started_at = Some(Instant::now());
        state.stop = Some(stop.clone());
        Ok((state.run_id, stop))
    }

    /// Mark `run_id` finished. Returns `false` if a newer run has started.
    fn finish(&self, run_id: u64) -> bool {
        let mut state = self.state.lock();
        if state.run_id != run_id {
            return false;
        }
        state.running = false;
        state.stop = None;
        state.connection = None;
        true
    }

    fn request_stop(&self) -> Option<CancellationToken> {
        let mut state = self.state.lock();
        state.running = false;
        state.connection = None;
        state.stop.take()
    }

    fn set_connection(&self, token: CancellationToken) {
        self.state.lock().connection = Some(token);
    }

    fn touch(&self) {
        let mut state = self.state.lock();
        state.last_event_at = Some(Instant::now());
        state.last_event_wall = Some(Utc::now());
    }

    fn record_reconnect(&self) -> u64 {
        let mut state = self.state.lock();
        state.reconnect_count += 1;
        state.reconnect_count
    }

    /// Cancel the live connection and reset the channel. Returns `false`
    /// when there is no live connection, e.g. during a backoff wait.
    fn reset_connection(&self, source: &str, reason: &str) -> bool {
        let connection = {
            let state = self.state.lock();
            match &state.connection {
                Some(connection) if state.running && !connection.is_cancelled() => {
                    connection.clone()
                }
                _ => return false,
            }
        };

        connection.cancel();
        self.channels.reset(source, reason);
        true
    }

    fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            listening: state.running,
            reconnect_count: state.reconnect_count,
            last_event_at: state.last_event_wall,
        }
    }
}

impl WatchdogTarget for Session {
    fn is_listening(&self) -> bool {
        self.state.lock().running
    }

    fn idle_since(&self) -> Option<Instant> {
        let state = self.state.lock();
        state.last_event_at.or(state.started_at)
    }

    fn force_reconnect(&self) -> bool {
        self.reset_connection("idle_watchdog", "no events within idle timeout")
    }
}

// =============================================================================
// Controller
// =============================================================================

enum ConnectionEnd {
    Stopped,
    Forced,
    Exhausted,
    Failed(Status),
}

struct ConnectionOutcome {
    end: ConnectionEnd,
    delivered: bool,
}

/// A listening session started by [`StreamController::begin`].
#[derive(Debug)]
#[must_use = "a session run does nothing until passed to `run_session`"]
pub struct SessionRun {
    run_id: u64,
    stop: CancellationToken,
}

/// Keeps one logical market data stream alive across failures.
pub struct StreamController {
    config: ControllerConfig,
    session: Arc<Session>,
    subscriptions: Arc<SubscriptionStateManager>,
    dispatcher: Arc<EventDispatcher>,
    router: Arc<dyn ResponseRouter>,
    transport: Arc<dyn StreamTransport>,
    strategy: ReconnectionStrategy,
    watchdog: IdleWatchdog,
}

impl StreamController {
    /// Create an idle controller.
    #[must_use]
    pub fn new(
        config: ControllerConfig,
        channels: Arc<dyn ChannelManager>,
        transport: Arc<dyn StreamTransport>,
        router: Arc<dyn ResponseRouter>,
        subscriptions: Arc<SubscriptionStateManager>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            config,
            session: Arc::new(Session {
                state: Mutex::new(SessionState::default()),
                channels,
            }),
            subscriptions,
            dispatcher,
            router,
            transport,
            strategy: ReconnectionStrategy::new(config.reconnect),
            watchdog: IdleWatchdog::new(config.watchdog),
        }
    }

    /// Check whether the controller is listening.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.session.state.lock().running
    }

    /// Session counters.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Listen until stopped.
    ///
    /// Authentication failures and cancellation end the session without an
    /// error; they are reported through logs.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] if already listening,
    /// [`StreamError::Dispatch`] if the dispatcher cannot start and
    /// [`StreamError::Reconnection`] once reconnect attempts run out.
    pub async fn listen(&self) -> Result<(), StreamError> {
        let run = self.begin()?;
        self.run_session(run).await
    }

    /// Mark the session as listening and start the dispatcher and watchdog.
    ///
    /// The returned run must be driven with [`Self::run_session`]. A
    /// [`Self::stop`] issued after `begin` returns ends that run.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] if already listening and
    /// [`StreamError::Dispatch`] if the dispatcher cannot start.
    pub fn begin(&self) -> Result<SessionRun, StreamError> {
        let (run_id, stop) = self.session.begin()?;

        if let Err(e) = self.dispatcher.start() {
            self.session.finish(run_id);
            return Err(e.into());
        }
        self.watchdog
            .start(Arc::clone(&self.session) as Arc<dyn WatchdogTarget>);
        Ok(SessionRun { run_id, stop })
    }

    /// Drive a run started with [`Self::begin`] until it stops.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Reconnection`] once reconnect attempts run out.
    pub async fn run_session(&self, run: SessionRun) -> Result<(), StreamError> {
        let SessionRun { run_id, stop } = run;

        let span = tracing::info_span!("market_stream", session_id = %Uuid::new_v4());
        let result = self.run(&stop).instrument(span).await;

        if self.session.finish(run_id) {
            self.watchdog.stop();
            self.dispatcher.stop().await;
        }
        result
    }

    /// Stop listening and stop the dispatcher. Safe to call when idle.
    pub async fn stop(&self) {
        if let Some(stop) = self.session.request_stop() {
            stop.cancel();
            tracing::info!("Stream stop requested");
        }
        self.watchdog.stop();
        self.dispatcher.stop().await;
    }

    /// Drop the current connection and reconnect. Does nothing unless a
    /// connection is live.
    pub fn force_reconnect(&self) -> bool {
        self.session.reset_connection("force_reconnect", "reconnect requested")
    }

    async fn run(&self, stop: &CancellationToken) -> Result<(), StreamError> {
        let mut attempt: u32 = 0;

        loop {
            if stop.is_cancelled() {
                return Ok(());
            }

            let outcome = self.run_connection(stop).await;
            if outcome.delivered {
                attempt = 0;
            }

            let reason = match outcome.end {
                ConnectionEnd::Stopped => {
                    tracing::info!("Stream stopped");
                    return Ok(());
                }
                ConnectionEnd::Forced => None,
                ConnectionEnd::Exhausted => {
                    tracing::info!("Stream closed by server");
                    Some("stream closed by server".to_string())
                }
                ConnectionEnd::Failed(status) => {
                    let class = FailureClass::classify(&status);
                    metrics::record_stream_error(class.as_str());
                    match class {
                        FailureClass::Authentication => {
                            tracing::error!(
                                code = ?status.code(),
                                error = %status.message(),
                                "Authentication failed, stopping stream"
                            );
                            return Ok(());
                        }
                        FailureClass::Cancelled => {
                            tracing::info!(error = %status.message(), "Stream cancelled");
                            return Ok(());
                        }
                        FailureClass::ResourceExhausted => {
                            let cooldown = rate_limit_reset(&status)
                                .unwrap_or(self.config.resource_exhausted_cooldown);
                            tracing::warn!(
                                cooldown_secs = cooldown.as_secs_f64(),
                                error = %status.message(),
                                "Stream rate limited, cooling down"
                            );
                            tokio::select! {
                                () = stop.cancelled() => return Ok(()),
                                () = tokio::time::sleep(cooldown) => {}
                            }
                        }
                        FailureClass::Disconnected | FailureClass::Internal => {
                            tracing::warn!(
                                class = class.as_str(),
                                code = ?status.code(),
                                error = %status.message(),
                                "Stream failed"
                            );
                        }
                    }
                    Some(status.message().to_string())
                }
            };

            attempt = attempt.saturating_add(1);
            let reconnect_count = self.session.record_reconnect();
            metrics::record_reconnect();
            // A forced reconnect has already reset the channel.
            if let Some(reason) = reason {
                self.session.channels.reset(RESET_SOURCE, &reason);
            }

            match self.strategy.wait(attempt, stop).await {
                Ok(WaitOutcome::Elapsed) => {
                    tracing::info!(attempt, reconnect_count, "Reconnecting stream");
                }
                Ok(WaitOutcome::Aborted) => return Ok(()),
                Err(e) => {
                    tracing::error!(attempt, error = %e, "Giving up on stream");
                    return Err(e.into());
                }
            }
        }
    }

    async fn run_connection(&self, stop: &CancellationToken) -> ConnectionOutcome {
        let connection = stop.child_token();
        self.session.set_connection(connection.clone());
        // Ends the outbound request stream once this connection is over.
        let _connection_guard = connection.clone().drop_guard();

        let cancelled = || ConnectionOutcome {
            end: if stop.is_cancelled() {
                ConnectionEnd::Stopped
            } else {
                ConnectionEnd::Forced
            },
            delivered: false,
        };
        let failed = |status| ConnectionOutcome {
            end: ConnectionEnd::Failed(status),
            delivered: false,
        };

        let channel = tokio::select! {
            () = connection.cancelled() => return cancelled(),
            result = self.session.channels.acquire() => match result {
                Ok(channel) => channel,
                Err(status) => return failed(status),
            },
        };

        let outbound = self.outbound(connection.clone());
        let responses = tokio::select! {
            () = connection.cancelled() => return cancelled(),
            result = self.transport.open_stream(channel, outbound) => match result {
                Ok(responses) => responses,
                Err(status) => return failed(status),
            },
        };
        tracing::info!("Market data stream opened");

        let (end, delivered) = self.read(responses, &connection).await;
        let end = match end {
            None if stop.is_cancelled() => ConnectionEnd::Stopped,
            None => ConnectionEnd::Forced,
            Some(end) => end,
        };
        ConnectionOutcome { end, delivered }
    }

    /// Read until the stream ends, fails or the connection is cancelled
    /// (`None`). Also reports whether any response arrived.
    async fn read(
        &self,
        mut responses: ResponseStream,
        connection: &CancellationToken,
    ) -> (Option<ConnectionEnd>, bool) {
        let mut delivered = false;
        loop {
            tokio::select! {
                biased;
                () = connection.cancelled() => return (None, delivered),
                item = responses.next() => match item {
                    Some(Ok(response)) => {
                        delivered = true;
                        self.session.touch();
                        self.router.route(response, self.dispatcher.as_ref());
                    }
                    Some(Err(status)) => return (Some(ConnectionEnd::Failed(status)), delivered),
                    None => return (Some(ConnectionEnd::Exhausted), delivered),
                },
            }
        }
    }

    fn outbound(&self, connection: CancellationToken) -> RequestStream {
        let initial = self.subscriptions.initial_requests();
        tracing::debug!(requests = initial.len(), "Replaying stream state");

        let subscriptions = Arc::clone(&self.subscriptions);
        let queued = futures::stream::unfold(
            (subscriptions, connection),
            |(subscriptions, connection)| async move {
                let request = tokio::select! {
                    () = connection.cancelled() => None,
                    request = subscriptions.pop_request(None) => request,
                };
                request.map(|request| (request, (subscriptions, connection)))
            },
        );

        Box::pin(futures::stream::iter(initial).chain(queued))
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        if let Some(stop) = self.session.request_stop() {
            stop.cancel();
        }
    }
}
