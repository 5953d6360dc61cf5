//! Metrics export.
//!
//! The pool records through the `metrics` facade; this module installs the
//! Prometheus exporter that serves them.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Describe the pool's metrics.
pub fn init_metrics() {
    relaymux_core::metrics::describe();
    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to start metrics server on {addr}"))?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}
