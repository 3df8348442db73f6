//! Prometheus metrics recorder and `/metrics` endpoint support.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

// Metric name constants to avoid typos across modules.

/// SSE connections opened, lifetime (counter).
pub const SSE_CONNECTIONS_TOTAL: &str = "sse_connections_total";
/// SSE disconnections, lifetime (counter).
pub const SSE_DISCONNECTIONS_TOTAL: &str = "sse_disconnections_total";
/// WebSocket connections opened, lifetime (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections, lifetime (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Failed sends during fan-out (counter, labels: protocol).
pub const SEND_FAILURES_TOTAL: &str = "fanout_send_failures_total";
/// Clients evicted by the broadcaster (counter, labels: protocol).
pub const EVICTIONS_TOTAL: &str = "fanout_evictions_total";
/// Generator ticks that produced a reading (counter).
pub const TICKS_TOTAL: &str = "generator_ticks_total";
/// Generator ticks suppressed as simulated packet loss (counter).
pub const TICKS_LOST_TOTAL: &str = "generator_ticks_lost_total";
