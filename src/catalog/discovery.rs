//! Per-tier tool discovery.
//!
//! Exactly one strategy per transport tier: JSON-RPC upstreams advertise
//! tools through a `tools/list` call; every other tier publishes an OpenAPI
//! document (directly, or through its bridge's HTTP facade) whose POST
//! operations become tool records.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::catalog::{Invocation, ServerDescriptor, ToolRecord, ToolSchema};
use crate::server::constants::REQUEST_USER_AGENT;

/// Errors produced while discovering one upstream.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("discovery timed out")]
    Timeout,

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("malformed descriptor: {0}")]
    Malformed(String),

    /// Duplicate tool name within a single server. `(server_id, tool_name)`
    /// is the cache's primary key, so the whole batch is rejected.
    #[error("duplicate tool '{0}' advertised by one server")]
    DuplicateTool(String),
}

/// Result of discovering one upstream: its tool records plus any OpenAPI
/// schema components worth merging into the emitted document.
#[derive(Debug, Default)]
pub struct DiscoveredServer {
    pub tools: Vec<ToolRecord>,
    pub schema_components: BTreeMap<String, Value>,
}

/// Discover the tools advertised by one enabled upstream.
pub async fn discover_server(
    client: &reqwest::Client,
    descriptor: &ServerDescriptor,
) -> Result<DiscoveredServer, DiscoveryError> {
    if descriptor.tier.is_rpc() {
        discover_rpc(client, descriptor).await
    } else {
        discover_openapi(client, descriptor).await
    }
}

// ------------------------- OpenAPI walk -------------------------

async fn discover_openapi(
    client: &reqwest::Client,
    descriptor: &ServerDescriptor,
) -> Result<DiscoveredServer, DiscoveryError> {
    let url = format!("{}/openapi.json", descriptor.endpoint);
    tracing::debug!(server = %descriptor.server_id, %url, "discovering via OpenAPI document");

    let mut request = client.get(&url).header("User-Agent", REQUEST_USER_AGENT);
    if let Some(credential) = &descriptor.credential {
        request = request.bearer_auth(credential);
    }
    let response = request.send().await.map_err(map_reqwest_error)?;
    if !response.status().is_success() {
        return Err(DiscoveryError::Status(response.status().as_u16()));
    }
    let document: Value = response
        .json()
        .await
        .map_err(|e| DiscoveryError::Malformed(e.to_string()))?;

    parse_openapi_document(descriptor, &document)
}

/// Walk all POST operations of an OpenAPI document into tool records.
///
/// The tool name is the path with its leading slash removed; request body
/// schemas are normalised, resolving one level of `$ref` against the
/// document's own components.
pub fn parse_openapi_document(
    descriptor: &ServerDescriptor,
    document: &Value,
) -> Result<DiscoveredServer, DiscoveryError> {
    let mut out = DiscoveredServer::default();
    let components = document
        .get("components")
        .and_then(|c| c.get("schemas"))
        .and_then(Value::as_object);

    if let Some(schemas) = components {
        for (name, schema) in schemas {
            out.schema_components.insert(name.clone(), schema.clone());
        }
    }

    let Some(paths) = document.get("paths").and_then(Value::as_object) else {
        // An OpenAPI document without paths advertises nothing.
        return Ok(out);
    };

    let mut seen = std::collections::BTreeSet::new();
    for (path, item) in paths {
        let Some(operation) = item.get("post") else {
            continue;
        };
        let tool_name = path.trim_start_matches('/').to_string();
        if tool_name.is_empty() {
            continue;
        }
        if !seen.insert(tool_name.clone()) {
            return Err(DiscoveryError::DuplicateTool(tool_name));
        }

        let description = operation
            .get("summary")
            .or_else(|| operation.get("description"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let schema = operation
            .get("requestBody")
            .map(|body| schema_from_request_body(body, components))
            .unwrap_or_default();

        out.tools.push(ToolRecord {
            server_id: descriptor.server_id.clone(),
            tool_name: tool_name.clone(),
            description,
            schema,
            tier: descriptor.tier,
            invocation: Invocation::Http {
                path: path.clone(),
            },
        });
    }

    Ok(out)
}

fn schema_from_request_body(
    body: &Value,
    components: Option<&serde_json::Map<String, Value>>,
) -> ToolSchema {
    let schema = body
        .get("content")
        .and_then(|c| c.get("application/json"))
        .and_then(|m| m.get("schema"));
    let Some(schema) = schema else {
        return ToolSchema::default();
    };
    // Resolve a top-level $ref against the document components; deeper refs
    // collapse to untyped objects.
    if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
        let name = reference.rsplit('/').next().unwrap_or_default();
        if let Some(resolved) = components.and_then(|c| c.get(name)) {
            return ToolSchema::from_json_schema(resolved);
        }
        return ToolSchema::default();
    }
    ToolSchema::from_json_schema(schema)
}

// ------------------------- JSON-RPC tools/list -------------------------

#[derive(Debug, Deserialize)]
struct RpcToolEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    input_schema: Option<Value>,
}

async fn discover_rpc(
    client: &reqwest::Client,
    descriptor: &ServerDescriptor,
) -> Result<DiscoveredServer, DiscoveryError> {
    tracing::debug!(server = %descriptor.server_id, "discovering via JSON-RPC tools/list");

    let envelope = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/list",
    });

    let mut request = client
        .post(&descriptor.endpoint)
        .header("User-Agent", REQUEST_USER_AGENT)
        .header("Accept", "application/json, text/event-stream")
        .json(&envelope);
    if let Some(credential) = &descriptor.credential {
        request = request.bearer_auth(credential);
    }
    let response = request.send().await.map_err(map_reqwest_error)?;
    if !response.status().is_success() {
        return Err(DiscoveryError::Status(response.status().as_u16()));
    }

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response
        .text()
        .await
        .map_err(|e| DiscoveryError::Malformed(e.to_string()))?;

    let message = extract_rpc_message(content_type.as_deref(), &body, 1)
        .map_err(DiscoveryError::Malformed)?;
    if let Some(error) = message.get("error") {
        return Err(DiscoveryError::Malformed(format!(
            "tools/list error: {error}"
        )));
    }
    let tools: Vec<RpcToolEntry> = message
        .get("result")
        .and_then(|r| r.get("tools"))
        .map(|t| serde_json::from_value(t.clone()))
        .transpose()
        .map_err(|e| DiscoveryError::Malformed(e.to_string()))?
        .unwrap_or_default();

    let mut out = DiscoveredServer::default();
    let mut seen = std::collections::BTreeSet::new();
    for tool in tools {
        if !seen.insert(tool.name.clone()) {
            return Err(DiscoveryError::DuplicateTool(tool.name));
        }
        let schema = tool
            .input_schema
            .as_ref()
            .map(ToolSchema::from_json_schema)
            .unwrap_or_default();
        out.tools.push(ToolRecord {
            server_id: descriptor.server_id.clone(),
            tool_name: tool.name.clone(),
            description: tool.description.unwrap_or_default(),
            schema,
            tier: descriptor.tier,
            invocation: Invocation::Rpc { method: tool.name },
        });
    }
    Ok(out)
}

/// Pull the JSON-RPC message with the given id out of a response body.
///
/// Streamable-HTTP upstreams may answer either with a plain JSON object or
/// with an SSE stream whose `data:` lines each carry one JSON-RPC message;
/// in the streaming case the accumulated stream is scanned for the matching
/// id and everything else is discarded.
pub(crate) fn extract_rpc_message(
    content_type: Option<&str>,
    body: &str,
    id: u64,
) -> Result<Value, String> {
    let is_stream = content_type
        .map(|ct| ct.starts_with("text/event-stream"))
        .unwrap_or(false);

    if !is_stream {
        let message: Value =
            serde_json::from_str(body).map_err(|e| format!("invalid JSON-RPC response: {e}"))?;
        return Ok(message);
    }

    let mut last_match = None;
    for line in body.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let Ok(message) = serde_json::from_str::<Value>(data.trim()) else {
            continue;
        };
        if message.get("id").and_then(Value::as_u64) == Some(id) {
            last_match = Some(message);
        }
    }
    last_match.ok_or_else(|| format!("no JSON-RPC message with id {id} in stream"))
}

fn map_reqwest_error(e: reqwest::Error) -> DiscoveryError {
    if e.is_timeout() {
        DiscoveryError::Timeout
    } else {
        DiscoveryError::Http(e.to_string())
    }
}
