//! Metrics collection and export for Chirp.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use chirp_core::BroadcastReport;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const SUBSCRIBERS_TOTAL: &str = "chirp_subscribers_total";
    pub const SUBSCRIBERS_ACTIVE: &str = "chirp_subscribers_active";
    pub const MESSAGES_TOTAL: &str = "chirp_messages_total";
    pub const MESSAGES_BYTES: &str = "chirp_messages_bytes";
    pub const PUSH_FAILURES_TOTAL: &str = "chirp_push_failures_total";
    pub const REQUESTS_REJECTED_TOTAL: &str = "chirp_requests_rejected_total";
    pub const BROADCAST_SECONDS: &str = "chirp_broadcast_seconds";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::SUBSCRIBERS_TOTAL,
        "Total number of subscriptions since server start"
    );
    metrics::describe_gauge!(
        names::SUBSCRIBERS_ACTIVE,
        "Current number of open subscriptions"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of accepted messages");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of accepted message text");
    metrics::describe_counter!(
        names::PUSH_FAILURES_TOTAL,
        "Pushes that failed and dropped their subscriber"
    );
    metrics::describe_counter!(
        names::REQUESTS_REJECTED_TOTAL,
        "Requests rejected with a client or capacity error"
    );
    metrics::describe_histogram!(
        names::BROADCAST_SECONDS,
        "Time to fan a message out to all subscribers"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new subscription.
pub fn record_connection() {
    counter!(names::SUBSCRIBERS_TOTAL).increment(1);
}

/// Overwrite the active gauge with the registry's count. This is the
/// gauge's only writer.
pub fn set_active_subscribers(count: usize) {
    gauge!(names::SUBSCRIBERS_ACTIVE).set(count as f64);
}

/// Record an accepted message.
pub fn record_message(bytes: usize) {
    counter!(names::MESSAGES_TOTAL).increment(1);
    counter!(names::MESSAGES_BYTES).increment(bytes as u64);
}

/// Record the outcome of a fan-out.
pub fn record_broadcast(report: &BroadcastReport, seconds: f64) {
    histogram!(names::BROADCAST_SECONDS).record(seconds);
    if report.failed > 0 {
        counter!(names::PUSH_FAILURES_TOTAL).increment(report.failed as u64);
    }
}

/// Record a rejected request.
pub fn record_rejection(reason: &'static str) {
    counter!(names::REQUESTS_REJECTED_TOTAL, "reason" => reason).increment(1);
}
