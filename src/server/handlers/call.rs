/// Tool invocation handlers.
///
/// - `POST /{server_id}/{tool_name}` - Execute a tool with the given JSON body
/// - `POST /{server_id}_{tool_name}` - Deprecated flat-name form
///
/// The shared [`invoke`] pipeline performs the access check, resolves the
/// tenant-effective endpoint and credential, dispatches on the upstream's
/// tier, and normalises the response envelope. Tool calls are never
/// retried.
use axum::{
    Extension,
    body::{Body, Bytes},
    extract::{Path, State},
    response::Response,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::catalog::ToolRecord;
use crate::errors::GatewayError;
use crate::server::auth::UserIdentity;
use crate::server::persist::StoreError;
use crate::server::routing::resolve_target;
use crate::state::GatewayState;

/// Execute a tool addressed by `/{server_id}/{tool_name}`.
///
/// # Endpoint
/// `POST /{server_id}/{tool_name}`
///
/// # Returns
/// - the upstream response (status forwarded verbatim, 5xx as 502)
/// - 400 for a malformed JSON body
/// - 403 / 404 / 503 / 504 per the gateway error taxonomy
pub async fn call_tool(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<UserIdentity>,
    Path((server_id, tool_name)): Path<(String, String)>,
    raw_body: Bytes,
) -> Result<Response, GatewayError> {
    tracing::debug!("API: POST /{}/{}", server_id, tool_name);
    let parsed = parse_body(&raw_body)?;

    if !state.servers.contains_key(&server_id) {
        return Err(GatewayError::UnknownServer(server_id));
    }
    check_access(&state, &identity, &server_id).await?;

    let snapshot = state.catalog.snapshot();
    if !snapshot.populated {
        return Err(GatewayError::CatalogNotReady);
    }
    let Some(record) = snapshot.tool(&server_id, &tool_name) else {
        return Err(GatewayError::UnknownTool(server_id, tool_name));
    };

    invoke(&state, &identity, record, raw_body, &parsed).await
}

/// Execute a tool addressed by the deprecated flat name.
///
/// # Endpoint
/// `POST /{server_id}_{tool_name}`
///
/// Kept for callers generated against older documents; the path parameter
/// is resolved against the catalog, trying every split point.
pub async fn call_tool_flat(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<UserIdentity>,
    Path(flat_name): Path<String>,
    raw_body: Bytes,
) -> Result<Response, GatewayError> {
    tracing::debug!("API: POST /{} (flat form)", flat_name);
    let parsed = parse_body(&raw_body)?;

    let snapshot = state.catalog.snapshot();
    if !snapshot.populated {
        return Err(GatewayError::CatalogNotReady);
    }
    let Some(record) = snapshot.resolve_flat_name(&flat_name) else {
        return Err(GatewayError::UnknownServer(flat_name));
    };
    let record = record.clone();
    check_access(&state, &identity, &record.server_id).await?;

    invoke(&state, &identity, &record, raw_body, &parsed).await
}

/// Parse the caller's JSON body; an empty body counts as `{}`.
pub(crate) fn parse_body(raw: &Bytes) -> Result<Value, GatewayError> {
    if raw.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(raw).map_err(|e| GatewayError::BadRequest(format!("invalid JSON: {e}")))
}

/// Access check for the call path: a store outage yields the empty access
/// set (fail closed), so the caller sees 403, and the request is never
/// forwarded upstream.
pub(crate) async fn check_access(
    state: &GatewayState,
    identity: &UserIdentity,
    server_id: &str,
) -> Result<(), GatewayError> {
    let db = state.db();
    match state
        .access
        .can_access(identity, db.as_deref(), &state.servers, server_id)
        .await
    {
        Ok(true) => Ok(()),
        Ok(false) => Err(GatewayError::AccessDenied),
        Err(StoreError::Unavailable(reason)) => {
            tracing::warn!(%reason, "store unavailable, failing closed");
            Err(GatewayError::AccessDenied)
        }
        Err(StoreError::NotFound) => Err(GatewayError::AccessDenied),
    }
}

/// Shared invocation pipeline used by both call forms and `meta/call_tool`.
pub(crate) async fn invoke(
    state: &Arc<GatewayState>,
    identity: &UserIdentity,
    record: &ToolRecord,
    raw_body: Bytes,
    parsed_body: &Value,
) -> Result<Response, GatewayError> {
    let start = Instant::now();
    let descriptor = state
        .servers
        .get(&record.server_id)
        .ok_or_else(|| GatewayError::UnknownServer(record.server_id.clone()))?;

    let db = state.db();
    let target = resolve_target(descriptor, identity, db.as_deref())
        .await
        .map_err(GatewayError::from)?;

    // Run the upstream call on its own task: a client disconnect drops
    // this handler future, not the in-flight upstream call, whose response
    // is then simply discarded.
    let task_state = state.clone();
    let task_record = record.clone();
    let task_target = target.clone();
    let task_body = parsed_body.clone();
    let result = match tokio::spawn(async move {
        task_state
            .executor
            .execute(&task_record, &task_target, raw_body, &task_body)
            .await
    })
    .await
    {
        Ok(result) => result,
        Err(e) => Err(GatewayError::UpstreamUnreachable(format!(
            "executor task failed: {e}"
        ))),
    };
    let latency_ms = start.elapsed().as_millis() as f64;

    match result {
        Ok(upstream) => {
            tracing::info!(
                caller = %identity.email,
                server = %record.server_id,
                tool = %record.tool_name,
                status = upstream.status,
                latency_ms,
                "tool call completed"
            );
            crate::metrics::record_upstream_call(
                &record.server_id,
                &record.tool_name,
                upstream.status,
                latency_ms,
            );

            let mut builder = Response::builder().status(upstream.status);
            if let Some(content_type) = &upstream.content_type {
                builder = builder.header("Content-Type", content_type);
            }
            builder
                .body(Body::from(upstream.body))
                .map_err(|e| GatewayError::UpstreamUnreachable(e.to_string()))
        }
        Err(e) => {
            tracing::warn!(
                caller = %identity.email,
                server = %record.server_id,
                tool = %record.tool_name,
                kind = e.kind(),
                latency_ms,
                "tool call failed"
            );
            crate::metrics::record_upstream_call(
                &record.server_id,
                &record.tool_name,
                e.status().as_u16(),
                latency_ms,
            );
            Err(e)
        }
    }
}
