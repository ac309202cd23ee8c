//! Observability setup: structured logging, metrics (Prometheus), tracing.

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with structured logging.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,osprey=debug"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Initialize the Prometheus metrics exporter on `listen_addr`.
pub fn init_metrics(listen_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let addr: std::net::SocketAddr = listen_addr.parse()?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("Prometheus metrics endpoint on http://{}/metrics", addr);
    Ok(())
}

/// Record one synchronous peer request issued by a remote operator.
/// `op` is the iterator call name ("getSome", "shutdown", ...).
pub fn record_remote_request(op: &str, duration_us: u64, success: bool) {
    metrics::counter!(
        "osprey_remote_requests_total",
        "op" => op.to_string(),
        "success" => success.to_string()
    )
    .increment(1);
    metrics::histogram!("osprey_remote_request_duration_us", "op" => op.to_string())
        .record(duration_us as f64);
}

/// Record the output of one gather merge step.
pub fn record_gather_rows(sorted: bool, rows: usize) {
    metrics::counter!(
        "osprey_gather_rows_total",
        "mode" => if sorted { "sorted" } else { "plain" }
    )
    .increment(rows as u64);
}

/// Record the shared-buffer depth of a scatter block after a pull.
pub fn record_scatter_buffer_depth(depth: usize) {
    metrics::gauge!("osprey_scatter_buffer_depth").set(depth as f64);
}

/// Record rows routed to a shard client by a distribute block.
pub fn record_distribute_rows(shard: &str, rows: usize) {
    metrics::counter!(
        "osprey_distribute_rows_total",
        "shard" => shard.to_string()
    )
    .increment(rows as u64);
}
