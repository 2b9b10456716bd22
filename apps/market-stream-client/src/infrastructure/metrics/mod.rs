//! Prometheus Metrics Module
//!
//! Exposes client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames received and dropped
//! - **Delivery**: Canonical updates delivered to consumers, reset broadcasts
//! - **Connection**: Connection state, reconnects, heartbeat failures
//! - **Subscriptions**: Registry size and outbound subscribe commands
//! - **Latency**: Payload normalization time
//!
//! Recording functions are no-ops until a recorder is installed.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or a recorder is
/// already installed.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();
    tracing::info!(%addr, "Prometheus metrics listener started");
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Frame counters
    describe_counter!(
        "market_stream_frames_received_total",
        "Total inbound frames read from the venue"
    );
    describe_counter!(
        "market_stream_frames_dropped_total",
        "Total inbound frames dropped by reason"
    );

    // Delivery counters
    describe_counter!(
        "market_stream_updates_delivered_total",
        "Total canonical updates delivered to consumers"
    );
    describe_counter!(
        "market_stream_resets_total",
        "Total reset signals delivered to consumers"
    );

    // Subscription metrics
    describe_counter!(
        "market_stream_subscribe_commands_total",
        "Total subscribe and unsubscribe commands sent"
    );
    describe_gauge!(
        "market_stream_subscriptions",
        "Number of registered subscriptions"
    );

    // Connection metrics
    describe_gauge!(
        "market_stream_connection_state",
        "Connection state (0 idle, 1 connecting, 2 subscribing, 3 streaming)"
    );
    describe_counter!(
        "market_stream_reconnects_total",
        "Total connection failures followed by a reconnect"
    );
    describe_counter!(
        "market_stream_heartbeat_failures_total",
        "Total heartbeat probes that could not be sent"
    );

    // Latency histograms
    describe_histogram!(
        "market_stream_parse_seconds",
        "Time to normalize one payload"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reasons an inbound frame is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Frame without the stream envelope.
    Unrecognized,
    /// Frame for a stream no subscription matches.
    Unmatched,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Unrecognized => "unrecognized",
            Self::Unmatched => "unmatched",
        }
    }
}

/// Outbound command kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Stream subscription.
    Subscribe,
    /// Stream unsubscription.
    Unsubscribe,
}

impl CommandKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Record an inbound frame.
pub fn record_frame_received() {
    counter!("market_stream_frames_received_total").increment(1);
}

/// Record a dropped frame.
pub fn record_frame_dropped(reason: DropReason) {
    counter!(
        "market_stream_frames_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record updates delivered for one frame.
pub fn record_updates_delivered(feed: &'static str, count: u64) {
    counter!(
        "market_stream_updates_delivered_total",
        "feed" => feed
    )
    .increment(count);
}

/// Record reset signals delivered.
pub fn record_resets(count: u64) {
    counter!("market_stream_resets_total").increment(count);
}

/// Record an outbound subscription command.
pub fn record_command(kind: CommandKind) {
    counter!(
        "market_stream_subscribe_commands_total",
        "method" => kind.as_str()
    )
    .increment(1);
}

/// Update the registered subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("market_stream_subscriptions").set(count as f64);
}

/// Update the connection state gauge.
pub fn set_connection_state(code: u8) {
    gauge!("market_stream_connection_state").set(f64::from(code));
}

/// Record a connection failure that leads to a reconnect.
pub fn record_reconnect() {
    counter!("market_stream_reconnects_total").increment(1);
}

/// Record a failed heartbeat probe.
pub fn record_heartbeat_failure() {
    counter!("market_stream_heartbeat_failures_total").increment(1);
}

/// Record payload normalization time.
pub fn record_parse_duration(feed: &'static str, duration: Duration) {
    histogram!(
        "market_stream_parse_seconds",
        "feed" => feed
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
