//! # Metrics HTTP Handler
//!
//! Serves Prometheus-formatted metrics at the `/metrics` endpoint when the
//! `prometheus` feature is enabled.
//!
//! ## HTTP Responses
//!
//! - `200 OK`: Metrics successfully rendered
//! - `503 Service Unavailable`: Metrics recorder not initialized
//! - `404 Not Found`: Metrics feature not compiled in

use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::Response;

/// Global Prometheus handle for metrics rendering.
///
/// Holds the Prometheus recorder handle once initialized. Uses `OnceLock`
/// for thread-safe, one-time initialization.
#[cfg(feature = "prometheus")]
static PROM_HANDLE: std::sync::OnceLock<metrics_exporter_prometheus::PrometheusHandle> =
    std::sync::OnceLock::new();

/// Sets the global Prometheus handle for metrics rendering.
///
/// Called once during server initialization to provide the metrics system
/// with a handle for rendering Prometheus-formatted output.
#[cfg(feature = "prometheus")]
pub(crate) fn set_prom_handle(handle: metrics_exporter_prometheus::PrometheusHandle) {
    let _ = PROM_HANDLE.set(handle);
}

/// Builds an HTTP response containing Prometheus metrics.
///
/// Returns metrics in the standard Prometheus text format (version 0.0.4).
pub fn make_metrics_response() -> Response {
    #[cfg(feature = "prometheus")]
    {
        tracing::debug!("Metrics requested");
        if let Some(handle) = PROM_HANDLE.get() {
            // Render current metrics when the handle has been initialized.
            let body = handle.render();
            return Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
                .body(Body::from(body))
                .expect("Failed to build metrics response");
        }
        // Return 503 when the Prometheus recorder has not been initialized yet.
        Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Body::from("prometheus recorder not initialized"))
            .expect("Failed to build service unavailable response")
    }
    #[cfg(not(feature = "prometheus"))]
    {
        // Return 404 when Prometheus support is not compiled in.
        tracing::warn!("Metrics endpoint called with metrics disabled");
        Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Body::from("metrics disabled"))
            .expect("Failed to build not found response")
    }
}
