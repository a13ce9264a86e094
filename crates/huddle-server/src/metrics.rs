//! Metrics collection and export for Huddle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use huddle_core::{DeliveryObserver, DeliveryReport, StoreError};
use huddle_protocol::EventKind;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";
    pub const ONLINE_USERS: &str = "huddle_online_users";
    pub const ADMISSION_REJECTIONS: &str = "huddle_admission_rejections_total";
    pub const EVENTS_DELIVERED: &str = "huddle_events_delivered_total";
    pub const DELIVERIES_DROPPED: &str = "huddle_deliveries_dropped_total";
    pub const DELIVERY_GAPS: &str = "huddle_delivery_gaps_total";
    pub const FRAMES_INBOUND: &str = "huddle_frames_inbound_total";
    pub const FRAMES_MALFORMED: &str = "huddle_frames_malformed_total";
    pub const PERSISTENCE_FAILURES: &str = "huddle_persistence_failures_total";
    pub const MEMBER_LOOKUP_FAILURES: &str = "huddle_member_lookup_failures_total";
    pub const LATENCY_SECONDS: &str = "huddle_frame_latency_seconds";
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
    metrics::describe_gauge!(names::ONLINE_USERS, "Current number of online users");
    metrics::describe_counter!(
        names::ADMISSION_REJECTIONS,
        "Connections refused at admission"
    );
    metrics::describe_counter!(
        names::EVENTS_DELIVERED,
        "Events queued on a connection, by kind"
    );
    metrics::describe_counter!(
        names::DELIVERIES_DROPPED,
        "Events dropped because a connection queue was full or closed"
    );
    metrics::describe_counter!(
        names::DELIVERY_GAPS,
        "Broadcasts whose recipients had no live connection"
    );
    metrics::describe_counter!(names::FRAMES_INBOUND, "Client frames received, by kind");
    metrics::describe_counter!(names::FRAMES_MALFORMED, "Client frames that failed to decode");
    metrics::describe_counter!(
        names::PERSISTENCE_FAILURES,
        "Messages that could not be persisted, by reason"
    );
    metrics::describe_counter!(
        names::MEMBER_LOOKUP_FAILURES,
        "Chat member lookups that failed, by reason"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Client frame handling latency in seconds"
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

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Update the online user count.
pub fn set_online_users(count: usize) {
    gauge!(names::ONLINE_USERS).set(count as f64);
}

/// Record a refused connection.
pub fn record_rejection(reason: &'static str) {
    counter!(names::ADMISSION_REJECTIONS, "reason" => reason).increment(1);
}

/// Record a decoded client frame.
pub fn record_inbound(kind: &'static str) {
    counter!(names::FRAMES_INBOUND, "kind" => kind).increment(1);
}

/// Record a client frame that failed to decode.
pub fn record_malformed() {
    counter!(names::FRAMES_MALFORMED).increment(1);
}

fn failure_reason(error: &StoreError) -> &'static str {
    match error {
        StoreError::Backend(_) => "backend",
        StoreError::ChatNotFound(_) => "not_found",
        StoreError::Timeout(_) => "timeout",
    }
}

/// Record a message that could not be persisted.
pub fn record_persistence_failure(error: &StoreError) {
    counter!(names::PERSISTENCE_FAILURES, "reason" => failure_reason(error)).increment(1);
}

/// Record a failed chat member lookup.
pub fn record_lookup_failure(error: &StoreError) {
    counter!(names::MEMBER_LOOKUP_FAILURES, "reason" => failure_reason(error)).increment(1);
}

/// Record frame handling latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record the outcome of one broadcast.
pub fn record_delivery(kind: EventKind, report: &DeliveryReport) {
    let kind = kind.as_str();
    if report.delivered > 0 {
        counter!(names::EVENTS_DELIVERED, "kind" => kind).increment(report.delivered as u64);
    }
    if report.dropped > 0 {
        counter!(names::DELIVERIES_DROPPED, "kind" => kind).increment(report.dropped as u64);
    }
    if report.is_gap() {
        counter!(names::DELIVERY_GAPS, "kind" => kind).increment(1);
    }
}

/// Exports every broadcast the dispatcher makes.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl DeliveryObserver for MetricsObserver {
    fn observe(&self, kind: EventKind, report: &DeliveryReport) {
        record_delivery(kind, report);
    }

    fn persist_failed(&self, error: &StoreError) {
        record_persistence_failure(error);
    }
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
