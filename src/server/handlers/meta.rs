/// Meta-tools facade.
///
/// Collapses the whole catalog into three uniform operations so that
/// model-driven callers see a constant-size descriptor regardless of how
/// many tools are aggregated:
///
/// - `POST /meta/search_tools` - rank permitted tools against a query
/// - `POST /meta/describe_tools` - full input schemas by qualified name
/// - `POST /meta/call_tool` - invoke a tool by qualified name
///
/// Ranking uses cosine similarity over the catalog embeddings; when no
/// vectors are available (provider unconfigured, or generation failed) it
/// falls back to case-insensitive substring scoring.
use axum::{
    Extension, Json,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use crate::catalog::ToolRecord;
use crate::catalog::embedding::{cosine_similarity, substring_score};
use crate::errors::GatewayError;
use crate::server::auth::UserIdentity;
use crate::server::constants::{SEARCH_DEFAULT_TOP_K, SEARCH_MAX_TOP_K};
use crate::server::handlers::call::{check_access, invoke, parse_body};
use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct DescribeRequest {
    names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CallRequest {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Rank the caller's permitted tools against a natural-language query.
///
/// # Endpoint
/// `POST /meta/search_tools`
///
/// # Returns
/// A ranked list of `{server_id, tool_name, description, score}`. `top_k`
/// defaults to 10, is clamped to 50, and `top_k = 0` returns an empty
/// list.
pub async fn search_tools(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<UserIdentity>,
    raw_body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let start = Instant::now();
    tracing::debug!("API: POST /meta/search_tools");
    let request: SearchRequest = decode_body(&raw_body)?;

    let top_k = request
        .top_k
        .unwrap_or(SEARCH_DEFAULT_TOP_K)
        .min(SEARCH_MAX_TOP_K);

    let permitted = permitted_servers(&state, &identity).await?;
    let snapshot = state.catalog.snapshot();
    let candidates: Vec<&ToolRecord> = snapshot
        .tools
        .iter()
        .filter(|(server_id, _)| permitted.contains(*server_id))
        .flat_map(|(_, tools)| tools.values())
        .collect();

    let ranked = if top_k == 0 {
        Vec::new()
    } else {
        rank(&state, &request.query, candidates, top_k).await
    };

    let results: Vec<Value> = ranked
        .into_iter()
        .map(|(record, score)| {
            json!({
                "server_id": record.server_id,
                "tool_name": record.tool_name,
                "description": one_line(&record.description),
                "score": score,
            })
        })
        .collect();

    let latency_ms = start.elapsed().as_millis() as f64;
    crate::metrics::record_api_http("/meta/search_tools", "POST", 200, latency_ms);
    Ok((StatusCode::OK, Json(json!({ "results": results }))))
}

/// Full input schemas for a set of qualified tool names.
///
/// # Endpoint
/// `POST /meta/describe_tools`
///
/// Unknown names come back as explicit nulls rather than being dropped,
/// so callers can tell "no such tool" from a truncated answer.
pub async fn describe_tools(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<UserIdentity>,
    raw_body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let start = Instant::now();
    tracing::debug!("API: POST /meta/describe_tools");
    let request: DescribeRequest = decode_body(&raw_body)?;

    let permitted = permitted_servers(&state, &identity).await?;
    let snapshot = state.catalog.snapshot();

    let mut tools = Map::new();
    for name in request.names {
        let described = snapshot
            .resolve_flat_name(&name)
            .filter(|record| permitted.contains(&record.server_id))
            .map(|record| {
                json!({
                    "server_id": record.server_id,
                    "tool_name": record.tool_name,
                    "description": record.description,
                    "inputSchema": record.schema.to_json_schema(),
                })
            })
            .unwrap_or(Value::Null);
        tools.insert(name, described);
    }

    let latency_ms = start.elapsed().as_millis() as f64;
    crate::metrics::record_api_http("/meta/describe_tools", "POST", 200, latency_ms);
    Ok((StatusCode::OK, Json(json!({ "tools": Value::Object(tools) }))))
}

/// Invoke a tool by qualified name.
///
/// # Endpoint
/// `POST /meta/call_tool`
///
/// Equivalent to the corresponding direct call; access control is
/// identical. A missing tool name is a 400.
pub async fn call_tool(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<UserIdentity>,
    raw_body: Bytes,
) -> Result<Response, GatewayError> {
    tracing::debug!("API: POST /meta/call_tool");
    let request: CallRequest = decode_body(&raw_body)?;
    if request.name.trim().is_empty() {
        return Err(GatewayError::BadRequest("missing tool name".to_string()));
    }
    let arguments = request.arguments.unwrap_or_else(|| Value::Object(Default::default()));

    let snapshot = state.catalog.snapshot();
    if !snapshot.populated {
        return Err(GatewayError::CatalogNotReady);
    }
    let Some(record) = snapshot.resolve_flat_name(&request.name) else {
        return Err(GatewayError::UnknownTool(String::new(), request.name));
    };
    let record = record.clone();
    check_access(&state, &identity, &record.server_id).await?;

    let raw_arguments = Bytes::from(arguments.to_string());
    invoke(&state, &identity, &record, raw_arguments, &arguments).await
}

// ------------------------- Helper Functions -------------------------

/// Rank candidates against the query. Cosine ranking runs when the query
/// embedding succeeds and at least one candidate carries a vector;
/// otherwise substring scoring covers every candidate.
async fn rank<'a>(
    state: &GatewayState,
    query: &str,
    candidates: Vec<&'a ToolRecord>,
    top_k: usize,
) -> Vec<(&'a ToolRecord, f64)> {
    let embeddings = state.catalog.embeddings();

    if !embeddings.is_empty()
        && let Some(provider) = &state.embedder
    {
        match provider.embed(query).await {
            Ok(query_vector) => {
                let mut scored: Vec<(&ToolRecord, f64)> = candidates
                    .iter()
                    .filter_map(|record| {
                        embeddings.get(&record.key()).map(|vector| {
                            (
                                *record,
                                cosine_similarity(&query_vector, vector) as f64,
                            )
                        })
                    })
                    .collect();
                scored.sort_by(|a, b| b.1.total_cmp(&a.1));
                scored.truncate(top_k);
                return scored;
            }
            Err(e) => {
                tracing::debug!(error = %e, "query embedding failed, using substring ranking");
            }
        }
    }

    let mut scored: Vec<(&ToolRecord, f64)> = candidates
        .into_iter()
        .map(|record| {
            let score = substring_score(query, &record.tool_name, &record.description);
            (record, score as f64)
        })
        .filter(|(_, score)| *score > 0.0)
        .collect();
    scored.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| a.0.qualified_name().cmp(&b.0.qualified_name()))
    });
    scored.truncate(top_k);
    scored
}

/// Listing-style access resolution: store outages surface as 503.
async fn permitted_servers(
    state: &GatewayState,
    identity: &UserIdentity,
) -> Result<Arc<BTreeSet<String>>, GatewayError> {
    let db = state.db();
    state
        .access
        .permitted_servers(identity, db.as_deref(), &state.servers)
        .await
        .map_err(GatewayError::from)
}

fn decode_body<T: serde::de::DeserializeOwned>(raw: &Bytes) -> Result<T, GatewayError> {
    let value = parse_body(raw)?;
    serde_json::from_value(value).map_err(|e| GatewayError::BadRequest(e.to_string()))
}

fn one_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
