/// Catalog listing handlers.
///
/// These endpoints expose the caller-filtered view of the catalog:
///
/// - `GET /openapi.json` - Dynamic OpenAPI 3.1 document
/// - `GET /servers` - Server ids the caller may see
/// - `GET /{server_id}` - Tools of one server
///
/// Before the first refresh completes the filtered catalog is simply
/// empty; only store outages surface as 503 here.
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use crate::errors::GatewayError;
use crate::server::auth::UserIdentity;
use crate::server::openapi::build_document;
use crate::state::GatewayState;

/// Dynamic OpenAPI document filtered to the caller.
///
/// # Endpoint
/// `GET /openapi.json`
///
/// # Returns
/// The OpenAPI 3.1 document whose operations are exactly the tools the
/// caller may invoke (plus the meta operations in meta-tools mode).
pub async fn openapi_doc(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<UserIdentity>,
) -> Result<impl IntoResponse, GatewayError> {
    let start = Instant::now();
    tracing::debug!("API: GET /openapi.json");

    let snapshot = state.catalog.snapshot();
    let db = state.db();
    let permitted = state
        .access
        .permitted_servers(&identity, db.as_deref(), &state.servers)
        .await?;
    let document = build_document(&snapshot, &permitted, state.config.meta_tools_mode);

    let latency_ms = start.elapsed().as_millis() as f64;
    crate::metrics::record_api_http("/openapi.json", "GET", 200, latency_ms);
    Ok((StatusCode::OK, Json(document)))
}

/// Server ids the caller may see.
///
/// # Endpoint
/// `GET /servers`
pub async fn list_servers(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<UserIdentity>,
) -> Result<impl IntoResponse, GatewayError> {
    let start = Instant::now();
    tracing::debug!("API: GET /servers");

    let db = state.db();
    let permitted = state
        .access
        .permitted_servers(&identity, db.as_deref(), &state.servers)
        .await?;
    let servers: Vec<&String> = permitted.iter().collect();

    let latency_ms = start.elapsed().as_millis() as f64;
    crate::metrics::record_api_http("/servers", "GET", 200, latency_ms);
    Ok((StatusCode::OK, Json(json!({ "servers": servers }))))
}

/// Tools of one server, caller-filtered.
///
/// # Endpoint
/// `GET /{server_id}`
///
/// # Returns
/// - 200 OK with the server's tools
/// - 403 when the server is not in the caller's access set
/// - 404 when no such server is configured
pub async fn list_server_tools(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<UserIdentity>,
    Path(server_id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let start = Instant::now();
    tracing::debug!("API: GET /{}", server_id);

    if !state.servers.contains_key(&server_id) {
        return Err(GatewayError::UnknownServer(server_id));
    }
    let db = state.db();
    let permitted = state
        .access
        .permitted_servers(&identity, db.as_deref(), &state.servers)
        .await?;
    if !permitted.contains(&server_id) {
        return Err(GatewayError::AccessDenied);
    }

    let snapshot = state.catalog.snapshot();
    let tools: Vec<_> = snapshot
        .tools
        .get(&server_id)
        .map(|tools| {
            tools
                .values()
                .map(|record| {
                    json!({
                        "name": record.tool_name,
                        "description": record.description,
                        "inputSchema": record.schema.to_json_schema(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let latency_ms = start.elapsed().as_millis() as f64;
    crate::metrics::record_api_http("/{server_id}", "GET", 200, latency_ms);
    Ok((
        StatusCode::OK,
        Json(json!({ "server": server_id, "tools": tools })),
    ))
}
