//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by transport and status
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_proxy_requests_total` (counter): forwarded requests by rule and status
//! - `gateway_ws_connections_active` (gauge): current WebSocket connection count
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels stay low-cardinality (no paths)

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a locally handled request.
pub fn record_request(transport: &'static str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "transport" => transport,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "transport" => transport)
        .record(start.elapsed().as_secs_f64());
}

/// Record a request forwarded upstream.
pub fn record_proxy(rule: &str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_proxy_requests_total",
        "rule" => rule.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "transport" => "proxy")
        .record(start.elapsed().as_secs_f64());
}

pub fn set_ws_connections(count: u64) {
    metrics::gauge!("gateway_ws_connections_active").set(count as f64);
}
