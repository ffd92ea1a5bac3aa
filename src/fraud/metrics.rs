//! C14 — Metrics Registry.
//!
//! Installs the Prometheus exporter at startup and documents every counter
//! name this crate emits.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Counters and histograms named here are registered at the point of the
/// event across `evaluator.rs`, `outbox/*.rs`, and `watcher.rs` — this
/// module only installs the exporter and documents the set:
///
/// - `async_enqueue_ok`, `async_enqueue_dropped` (C8)
/// - `outbox_xadd_success`, `outbox_xadd_failure` (C9)
/// - `outbox_publish_failure`, `outbox_reclaimed_total` (C10/C11)
/// - `hot_reload_success_total`, `hot_reload_failure_total` (C13)
/// - `evaluation_latency_ms` histogram, `velocity_circuit_state` gauge (C6/C7)
pub fn install(bind_addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(bind_addr)
        .install()?;
    info!(%bind_addr, "prometheus metrics exporter installed");
    Ok(())
}
