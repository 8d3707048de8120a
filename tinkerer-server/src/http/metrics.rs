//! Prometheus metrics endpoint.

use crate::server::ControlPlane;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(plane): Extension<Arc<ControlPlane>>) -> impl IntoResponse {
    let m = plane.metrics();

    // Gauges — current state
    let agents = plane.registry().len();
    let operations = plane.store().len();

    // Counters — monotonic since startup
    let dispatched = m.operations_dispatched.load(Ordering::Relaxed);
    let fragments = m.fragments_received.load(Ordering::Relaxed);
    let dropped = m.fragments_dropped.load(Ordering::Relaxed);
    let bytes_rx = m.bytes_received.load(Ordering::Relaxed);
    let bytes_tx = m.bytes_streamed.load(Ordering::Relaxed);
    let registered = m.agents_registered_total.load(Ordering::Relaxed);
    let evicted = m.agents_evicted.load(Ordering::Relaxed);
    let timed_out = m.operations_timed_out.load(Ordering::Relaxed);
    let aborts = m.aborts_sent.load(Ordering::Relaxed);
    let capacity = m.capacity_rejections.load(Ordering::Relaxed);

    let body = format!(
        r#"# HELP tinkerer_agents_connected Number of connected agents
# TYPE tinkerer_agents_connected gauge
tinkerer_agents_connected {agents}

# HELP tinkerer_operations_outstanding Number of open operation queue entries
# TYPE tinkerer_operations_outstanding gauge
tinkerer_operations_outstanding {operations}

# HELP tinkerer_info Server information
# TYPE tinkerer_info gauge
tinkerer_info{{version="{version}"}} 1

# HELP tinkerer_operations_dispatched_total Total operations dispatched to agents
# TYPE tinkerer_operations_dispatched_total counter
tinkerer_operations_dispatched_total {dispatched}

# HELP tinkerer_fragments_received_total Total result fragments accepted from agents
# TYPE tinkerer_fragments_received_total counter
tinkerer_fragments_received_total {fragments}

# HELP tinkerer_fragments_dropped_total Total fragments dropped for unknown operations
# TYPE tinkerer_fragments_dropped_total counter
tinkerer_fragments_dropped_total {dropped}

# HELP tinkerer_bytes_received_total Total response bytes received from agents
# TYPE tinkerer_bytes_received_total counter
tinkerer_bytes_received_total {bytes_rx}

# HELP tinkerer_bytes_streamed_total Total response bytes streamed to callers
# TYPE tinkerer_bytes_streamed_total counter
tinkerer_bytes_streamed_total {bytes_tx}

# HELP tinkerer_agents_registered_total Total agent registrations including reconnects
# TYPE tinkerer_agents_registered_total counter
tinkerer_agents_registered_total {registered}

# HELP tinkerer_agents_evicted_total Total agents evicted by the heartbeat monitor
# TYPE tinkerer_agents_evicted_total counter
tinkerer_agents_evicted_total {evicted}

# HELP tinkerer_operations_timed_out_total Total operations terminated by the staleness sweep
# TYPE tinkerer_operations_timed_out_total counter
tinkerer_operations_timed_out_total {timed_out}

# HELP tinkerer_aborts_sent_total Total ABORT requests sent to agents
# TYPE tinkerer_aborts_sent_total counter
tinkerer_aborts_sent_total {aborts}

# HELP tinkerer_capacity_rejections_total Total fragments rejected for exceeding the buffer limit
# TYPE tinkerer_capacity_rejections_total counter
tinkerer_capacity_rejections_total {capacity}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
