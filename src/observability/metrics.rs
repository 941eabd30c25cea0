//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by kind (connect/http) and status
//! - `proxy_request_duration_seconds` (histogram): time to response head
//! - `proxy_tunnels_active` (gauge): established CONNECT tunnels
//! - `proxy_tunnel_bytes_total` (counter): bytes relayed, by direction
//! - `proxy_active_connections` (gauge): accepted client connections
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; no-ops without an exporter
//! - Exporter is Prometheus on its own listener, off by default

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
///
/// Must be called from within the Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record a completed dispatch.
pub fn record_request(kind: &'static str, status: u16, start: Instant) {
    let status = status.to_string();
    metrics::counter!("proxy_requests_total", "kind" => kind, "status" => status).increment(1);
    metrics::histogram!("proxy_request_duration_seconds", "kind" => kind)
        .record(start.elapsed().as_secs_f64());
}

pub fn tunnel_opened() {
    metrics::gauge!("proxy_tunnels_active").increment(1.0);
}

pub fn tunnel_closed() {
    metrics::gauge!("proxy_tunnels_active").decrement(1.0);
}

pub fn record_tunnel_bytes(direction: &'static str, bytes: u64) {
    metrics::counter!("proxy_tunnel_bytes_total", "direction" => direction).increment(bytes);
}

pub fn connection_opened() {
    metrics::gauge!("proxy_active_connections").increment(1.0);
}

pub fn connection_closed() {
    metrics::gauge!("proxy_active_connections").decrement(1.0);
}
