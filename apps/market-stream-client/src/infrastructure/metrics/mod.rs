//! Prometheus Metrics Module
//!
//! Instrumentation for the stream runtime through the `metrics` facade.
//! Recording is a no-op until a recorder is installed with [`init_metrics`].
//!
//! # Metrics Categories
//!
//! - **Events**: events received, dropped and handled by type
//! - **Handlers**: invocations, failures and latency
//! - **Connection**: reconnects, watchdog interventions, stream failures
//! - **Subscriptions**: active subscription count and quota weight

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::EventType;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus metrics recorder.
///
/// Calling it again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Event counters
    describe_counter!(
        "market_stream_events_received_total",
        "Total events accepted by the dispatcher"
    );
    describe_counter!(
        "market_stream_events_dropped_total",
        "Total events dropped because the dispatcher was full or stopped"
    );

    // Handler metrics
    describe_counter!(
        "market_stream_handler_invocations_total",
        "Total handler invocations"
    );
    describe_counter!(
        "market_stream_handler_errors_total",
        "Total handler invocations that failed or panicked"
    );
    describe_counter!(
        "market_stream_stale_jobs_total",
        "Total jobs discarded because they belonged to a previous dispatcher run"
    );
    describe_histogram!(
        "market_stream_handler_duration_seconds",
        "Time spent inside event handlers"
    );

    // Connection counters
    describe_counter!(
        "market_stream_reconnects_total",
        "Total stream reconnection attempts"
    );
    describe_counter!(
        "market_stream_watchdog_reconnects_total",
        "Total reconnects forced by the idle watchdog"
    );
    describe_counter!(
        "market_stream_stream_errors_total",
        "Total stream failures by class"
    );

    // Subscription gauges
    describe_gauge!(
        "market_stream_subscriptions",
        "Number of active subscriptions"
    );
    describe_gauge!(
        "market_stream_subscription_weight",
        "Quota weight used by active subscriptions"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an event accepted by the dispatcher.
pub fn record_event_received(event_type: EventType) {
    counter!(
        "market_stream_events_received_total",
        "event_type" => event_type.as_str()
    )
    .increment(1);
}

/// Record an event the dispatcher could not accept.
pub fn record_event_dropped(event_type: EventType) {
    counter!(
        "market_stream_events_dropped_total",
        "event_type" => event_type.as_str()
    )
    .increment(1);
}

/// Record one handler invocation and its outcome.
pub fn record_handler(event_type: EventType, duration: Duration, failed: bool) {
    counter!(
        "market_stream_handler_invocations_total",
        "event_type" => event_type.as_str()
    )
    .increment(1);
    if failed {
        counter!(
            "market_stream_handler_errors_total",
            "event_type" => event_type.as_str()
        )
        .increment(1);
    }
    histogram!(
        "market_stream_handler_duration_seconds",
        "event_type" => event_type.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Record a job discarded for belonging to an older dispatcher run.
pub fn record_stale_job() {
    counter!("market_stream_stale_jobs_total").increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("market_stream_reconnects_total").increment(1);
}

/// Record a reconnect forced by the idle watchdog.
pub fn record_watchdog_reconnect() {
    counter!("market_stream_watchdog_reconnects_total").increment(1);
}

/// Record a stream failure.
pub fn record_stream_error(class: &'static str) {
    counter!(
        "market_stream_stream_errors_total",
        "class" => class
    )
    .increment(1);
}

/// Update the subscription gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize, weight: usize) {
    gauge!("market_stream_subscriptions").set(count as f64);
    gauge!("market_stream_subscription_weight").set(weight as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_event_received(EventType::Candle);
        record_event_dropped(EventType::Trade);
        record_handler(EventType::Ping, Duration::from_millis(3), true);
        record_stale_job();
        record_reconnect();
        record_watchdog_reconnect();
        record_stream_error("internal");
        set_subscriptions(3, 7);
    }
}
