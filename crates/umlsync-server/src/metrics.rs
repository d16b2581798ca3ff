//! Metrics collection and export for umlsync.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use umlsync_core::Namespace;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "umlsync_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "umlsync_connections_active";
    pub const EVENTS_TOTAL: &str = "umlsync_events_total";
    pub const MESSAGES_BYTES: &str = "umlsync_messages_bytes";
    pub const ROOMS_ACTIVE: &str = "umlsync_rooms_active";
    pub const LATENCY_SECONDS: &str = "umlsync_event_latency_seconds";
    pub const ERRORS_TOTAL: &str = "umlsync_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Client events processed, by event");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Bytes of WebSocket messages");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of rooms");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound event processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection(namespace: Namespace) {
    counter!(names::CONNECTIONS_TOTAL, "namespace" => namespace.as_str()).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE, "namespace" => namespace.as_str()).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection(namespace: Namespace) {
    gauge!(names::CONNECTIONS_ACTIVE, "namespace" => namespace.as_str()).decrement(1.0);
}

/// Record a processed client event.
pub fn record_event(event: &'static str) {
    counter!(names::EVENTS_TOTAL, "event" => event).increment(1);
}

/// Record message bytes.
pub fn record_bytes(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record event processing latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Update active room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard {
    namespace: Namespace,
}

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new(namespace: Namespace) -> Self {
        record_connection(namespace);
        Self { namespace }
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection(self.namespace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_guard() {
        // No recorder is installed; recording must be a no-op.
        let _default = ConnectionMetricsGuard::new(Namespace::Default);
        let _sync = ConnectionMetricsGuard::new(Namespace::Sync);
        record_event("join");
        record_error("malformed");
    }
}
