//! Metric helpers for `wiregate`.
//!
//! This module defines metric names and thin helpers wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! the helpers compile to no-ops.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking active connections.
pub const CONNECTIONS_ACTIVE: &str = "wiregate_connections_active";
/// Name of the counter tracking processed frames.
pub const FRAMES_PROCESSED: &str = "wiregate_frames_processed_total";
/// Name of the counter tracking error occurrences.
pub const ERRORS_TOTAL: &str = "wiregate_errors_total";
/// Name of the counter tracking bytes dropped while resynchronising.
pub const RESYNC_BYTES_DISCARDED: &str = "wiregate_resync_bytes_discarded_total";
/// Name of the counter tracking failed bus publishes.
pub const BUS_PUBLISH_FAILURES: &str = "wiregate_bus_publish_failures_total";
/// Name of the counter tracking submitted publish batches.
pub const PUBLISH_BATCHES: &str = "wiregate_publish_batches_total";
/// Name of the counter tracking connection task panics.
pub const CONNECTION_PANICS: &str = "wiregate_connection_panics_total";

/// Direction of frame processing.
#[derive(Clone, Copy)]
pub enum Direction {
    /// Inbound frames received from a client.
    Inbound,
    /// Outbound frames sent to a client.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), expect(dead_code, reason = "used by metrics only"))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a processed frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record an error occurrence.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL).increment(1);
}

/// Record bytes lost to a resync scan.
pub fn inc_resync_discarded(bytes: usize) {
    #[cfg(feature = "metrics")]
    counter!(RESYNC_BYTES_DISCARDED).increment(u64::try_from(bytes).unwrap_or(u64::MAX));
    #[cfg(not(feature = "metrics"))]
    let _ = bytes;
}

/// Record a bus publish that failed.
pub fn inc_bus_publish_failures() {
    #[cfg(feature = "metrics")]
    counter!(BUS_PUBLISH_FAILURES).increment(1);
}

/// Record a batch submitted by the publish batcher.
pub fn inc_publish_batches() {
    #[cfg(feature = "metrics")]
    counter!(PUBLISH_BATCHES).increment(1);
}

/// Record a connection task that panicked.
pub fn inc_connection_panics() {
    #[cfg(feature = "metrics")]
    counter!(CONNECTION_PANICS).increment(1);
}

/// Install a Prometheus exporter serving scrapes on `addr`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Fails if a global recorder is already installed or the listener cannot be
/// set up.
#[cfg(feature = "metrics")]
pub fn install_prometheus(addr: std::net::SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
}
