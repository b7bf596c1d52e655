//! Health check handlers for the gateway.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness plus a summary of the catalog state
//! - `GET /livez` - Returns 200/OK if the server is alive
//! - `GET /readyz` - Returns 200/OK if the server is ready to serve requests
//!
//! # Response Format
//!
//! `/livez` and `/readyz` support content negotiation:
//! - `Accept: application/json` returns `{"status": "live|ready|not live|not ready"}`
//! - Default returns plain text

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::{Json, extract::State, response::Response};
use serde_json::json;

use crate::state::GatewayState;

/// Liveness plus catalog visibility.
///
/// # Endpoint
/// `GET /health`
///
/// # Returns
/// 200 OK with `{status, catalog}` where `catalog` reports enabled server
/// count, cached tool count, and the epoch of the last refresh.
pub async fn health(State(state): State<Arc<GatewayState>>) -> (StatusCode, Json<serde_json::Value>) {
    tracing::debug!("health_handler invoked");

    let snapshot = state.catalog.snapshot();
    let enabled = state.servers.values().filter(|d| d.enabled).count();
    let status = if state.is_alive() { "ok" } else { "terminating" };

    (
        StatusCode::OK,
        Json(json!({
            "status": status,
            "catalog": {
                "servers": enabled,
                "tools": snapshot.tool_count(),
                "populated": snapshot.populated,
                "last_refresh_epoch_ms": snapshot.last_refresh_ms,
            }
        })),
    )
}

/// Liveness check handler.
///
/// # Endpoint
/// `GET /livez`
///
/// # Returns
/// - 200 OK with "live" if the server is alive
/// - 503 Service Unavailable with "not live" if the server is not alive
pub async fn livez(State(state): State<Arc<GatewayState>>, headers: HeaderMap) -> Response {
    tracing::debug!("livez_handler invoked");

    let accept = headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let (status, text) = if state.is_alive() {
        (StatusCode::OK, "live")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not live")
    };

    negotiate(status, text, accept)
}

/// Readiness check handler.
///
/// # Endpoint
/// `GET /readyz`
///
/// # Returns
/// - 200 OK with "ready" once startup (including the gated refresh) completed
/// - 503 Service Unavailable with "not ready" otherwise
pub async fn readyz(State(state): State<Arc<GatewayState>>, headers: HeaderMap) -> Response {
    tracing::debug!("readyz_handler invoked");

    let accept = headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let (status, text) = if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    };

    negotiate(status, text, accept)
}

fn negotiate(status: StatusCode, text: &str, accept: &str) -> Response {
    let body = if accept.contains("application/json") {
        json!({ "status": text }).to_string()
    } else {
        text.to_string()
    };

    Response::builder()
        .status(status)
        .header(
            "Content-Type",
            if accept.contains("application/json") {
                "application/json"
            } else {
                "text/plain"
            },
        )
        .body(body.into())
        .unwrap()
}
