//! Prometheus Metrics Module
//!
//! Exposes streaming metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Events**: Normalized events published, malformed messages skipped,
//!   events dropped by bounded sinks
//! - **Connections**: Per-exchange status, errors and reconnect attempts
//! - **Watchers**: Active channel watchers per exchange
//! - **Latency**: Receipt time minus exchange event time
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! without an installed recorder is a no-op, so library users and tests
//! need not call [`init_metrics`].

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionStatus;
use crate::domain::error::ErrorKind;
use crate::domain::subscription::Channel;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
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
        "market_stream_events_published_total",
        "Normalized market data events delivered to consumers"
    );
    describe_counter!(
        "market_stream_malformed_messages_total",
        "Raw messages skipped because they could not be normalized"
    );
    describe_counter!(
        "market_stream_events_dropped_total",
        "Events dropped by bounded sinks because the receiver was full or gone"
    );
    describe_counter!(
        "market_stream_consumer_panics_total",
        "Consumer callbacks that panicked"
    );

    // Connection metrics
    describe_gauge!(
        "market_stream_connection_status",
        "Connection status (0 disconnected, 1 connecting, 2 connected, 3 reconnecting, 4 failed)"
    );
    describe_counter!(
        "market_stream_connection_errors_total",
        "Connection errors by exchange and kind"
    );
    describe_counter!(
        "market_stream_reconnect_attempts_total",
        "Reconnection attempts by exchange"
    );

    // Watcher gauges
    describe_gauge!(
        "market_stream_active_watchers",
        "Running channel watchers per exchange"
    );

    // Latency histograms
    describe_histogram!(
        "market_stream_event_latency_seconds",
        "Receipt time minus exchange event time"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an event delivered to `consumers` consumers.
pub fn record_event_published(exchange: &str, channel: Channel, consumers: u64) {
    counter!(
        "market_stream_events_published_total",
        "exchange" => exchange.to_string(),
        "channel" => channel.as_str()
    )
    .increment(consumers);
}

/// Record a malformed message that was skipped.
pub fn record_malformed_message(exchange: &str, channel: Channel) {
    counter!(
        "market_stream_malformed_messages_total",
        "exchange" => exchange.to_string(),
        "channel" => channel.as_str()
    )
    .increment(1);
}

/// Record events dropped by a sink.
pub fn record_events_dropped(sink: &'static str, count: u64) {
    counter!(
        "market_stream_events_dropped_total",
        "sink" => sink
    )
    .increment(count);
}

/// Record a consumer callback panic.
pub fn record_consumer_panic(exchange: &str) {
    counter!(
        "market_stream_consumer_panics_total",
        "exchange" => exchange.to_string()
    )
    .increment(1);
}

/// Update the status gauge for an exchange.
pub fn set_connection_status(exchange: &str, status: ConnectionStatus) {
    gauge!(
        "market_stream_connection_status",
        "exchange" => exchange.to_string()
    )
    .set(status.gauge_value());
}

/// Record a connection error.
pub fn record_connection_error(exchange: &str, kind: ErrorKind) {
    counter!(
        "market_stream_connection_errors_total",
        "exchange" => exchange.to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(exchange: &str) {
    counter!(
        "market_stream_reconnect_attempts_total",
        "exchange" => exchange.to_string()
    )
    .increment(1);
}

/// Update the active watcher count for an exchange.
pub fn set_active_watchers(exchange: &str, count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!(
        "market_stream_active_watchers",
        "exchange" => exchange.to_string()
    )
    .set(count as f64);
}

/// Record the latency of one event.
pub fn record_event_latency(exchange: &str, channel: Channel, latency: Duration) {
    histogram!(
        "market_stream_event_latency_seconds",
        "exchange" => exchange.to_string(),
        "channel" => channel.as_str()
    )
    .record(latency.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
