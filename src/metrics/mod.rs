//! # Metrics Collection Module

pub mod handler;

/// Initializes the metrics exporter.
///
/// Installs the global Prometheus recorder and spawns a background task
/// for periodic upkeep of histograms and summaries.
///
/// # Feature Requirements
/// Requires the `prometheus` feature; a no-op otherwise.
pub fn init() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        use tracing::debug;
        debug!("Prometheus metrics endpoint is enabled");
        if let Ok(handle) = PrometheusBuilder::new().install_recorder() {
            crate::metrics::handler::set_prom_handle(handle.clone());
            // Periodic upkeep keeps histogram memory bounded.
            use std::time::Duration;
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(30));
                loop {
                    tick.tick().await;
                    handle.run_upkeep();
                }
            });
        }
    }
}

/// Records upstream tool call metrics.
///
/// Tracks call count and latency by server, tool, and surfaced status.
///
/// # Arguments
/// * `server` - Server id of the upstream
/// * `tool` - Tool name
/// * `status` - Status surfaced to the caller
/// * `latency_ms` - Upstream call time in milliseconds
pub fn record_upstream_call(server: &str, tool: &str, status: u16, latency_ms: f64) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::{counter, histogram};
        let status_s = status.to_string();
        counter!(
            "toolgate_upstream_calls_total",
            "server" => server.to_string(),
            "tool" => tool.to_string(),
            "status" => status_s
        )
        .increment(1);
        histogram!(
            "toolgate_upstream_latency_ms",
            "server" => server.to_string(),
            "tool" => tool.to_string()
        )
        .record(latency_ms);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        // No-op when metrics are disabled
        let _ = (server, tool, status, latency_ms);
    }
}

/// Records API HTTP request metrics.
///
/// Tracks request count and latency by endpoint path, HTTP method, and
/// response status.
///
/// # Arguments
/// * `path` - The API endpoint path (e.g., "/servers")
/// * `method` - HTTP method (e.g., "GET", "POST")
/// * `status` - HTTP response status code
/// * `latency_ms` - Request processing time in milliseconds
pub fn record_api_http(path: &str, method: &str, status: u16, latency_ms: f64) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::{counter, histogram};
        let status_s = status.to_string();
        counter!(
            "toolgate_api_calls_total",
            "path" => path.to_string(),
            "method" => method.to_string(),
            "status" => status_s.clone()
        )
        .increment(1);
        histogram!(
            "toolgate_api_latency_ms",
            "path" => path.to_string(),
            "method" => method.to_string(),
            "status" => status_s
        )
        .record(latency_ms);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        // No-op when metrics are disabled
        let _ = (path, method, status, latency_ms);
    }
}

/// Records one catalog refresh run.
///
/// # Arguments
/// * `succeeded` - Upstreams rebuilt from a fresh response
/// * `failed` - Upstreams that kept their previous records
/// * `latency_ms` - Wall time of the whole run
pub fn record_refresh(succeeded: usize, failed: usize, latency_ms: f64) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::{counter, histogram};
        counter!("toolgate_refresh_total").increment(1);
        counter!("toolgate_refresh_upstreams_total", "outcome" => "succeeded")
            .increment(succeeded as u64);
        counter!("toolgate_refresh_upstreams_total", "outcome" => "failed")
            .increment(failed as u64);
        histogram!("toolgate_refresh_latency_ms").record(latency_ms);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        // No-op when metrics are disabled
        let _ = (succeeded, failed, latency_ms);
    }
}
