//! Router / executor: translate a gateway call into the upstream's wire
//! format and forward it.
//!
//! Tool calls are never retried here; retry policy belongs to the caller.
//! The executor owns the shared egress client (built once at startup) and
//! the monotonically increasing JSON-RPC id counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use serde_json::{Value, json};

use crate::catalog::discovery::extract_rpc_message;
use crate::catalog::{Invocation, ServerDescriptor, ToolRecord};
use crate::errors::{GatewayError, StartupError};
use crate::server::auth::UserIdentity;
use crate::server::constants::{CREDENTIAL_KEY_BEARER, REQUEST_USER_AGENT};
use crate::server::persist::{AccessStore, StoreError};

/// Endpoint and credential actually used for one call, after tenant
/// overrides are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveTarget {
    /// Base endpoint, trailing slash trimmed.
    pub endpoint: String,
    /// Bearer credential, when one applies.
    pub credential: Option<String>,
}

/// Compute the effective endpoint and credential for a call.
///
/// Starts from the descriptor defaults, then substitutes the tenant-keyed
/// endpoint and credential overrides of the caller's groups. When several
/// of the caller's groups carry an override for the same server, the
/// alphabetically first group name wins and a warning is emitted.
///
/// Store outages fail the call: silently falling back to the default
/// endpoint or credential would route one tenant's traffic with another
/// tenant's settings.
pub async fn resolve_target(
    descriptor: &ServerDescriptor,
    identity: &UserIdentity,
    db: Option<&dyn AccessStore>,
) -> Result<EffectiveTarget, StoreError> {
    let mut target = EffectiveTarget {
        endpoint: descriptor.endpoint.clone(),
        credential: descriptor.credential.clone(),
    };
    let Some(db) = db else {
        return Ok(target);
    };

    // Identity groups iterate in sorted order, so the first hit is the
    // alphabetical tie-break winner.
    let mut endpoint_hit: Option<&str> = None;
    let mut credential_hit: Option<&str> = None;
    for group in &identity.groups {
        if let Some(endpoint) = db
            .tenant_endpoint(group, &descriptor.server_id)
            .await?
        {
            match endpoint_hit {
                None => {
                    endpoint_hit = Some(group);
                    target.endpoint = endpoint.trim_end_matches('/').to_string();
                }
                Some(winner) => {
                    tracing::warn!(
                        server = %descriptor.server_id,
                        winner,
                        ignored = %group,
                        "multiple groups override this endpoint; alphabetically first wins"
                    );
                }
            }
        }
        if let Some(secret) = db
            .tenant_credential(group, &descriptor.server_id, CREDENTIAL_KEY_BEARER)
            .await?
        {
            match credential_hit {
                None => {
                    credential_hit = Some(group);
                    target.credential = Some(secret);
                }
                Some(winner) => {
                    tracing::warn!(
                        server = %descriptor.server_id,
                        winner,
                        ignored = %group,
                        "multiple groups override this credential; alphabetically first wins"
                    );
                }
            }
        }
    }

    Ok(target)
}

/// What came back from the upstream, already normalised to the gateway's
/// surface semantics (5xx translated to 502, JSON-RPC envelope unwrapped).
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl UpstreamResponse {
    fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            content_type: Some("application/json".to_string()),
            body: Bytes::from(value.to_string()),
        }
    }
}

/// Shared egress executor.
pub struct Executor {
    client: reqwest::Client,
    rpc_id: AtomicU64,
}

impl Executor {
    /// Build the shared egress client with the configured call timeout.
    pub fn new(call_timeout: Duration) -> Result<Self, StartupError> {
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| StartupError::Other(format!("egress client: {e}")))?;
        Ok(Self {
            client,
            rpc_id: AtomicU64::new(0),
        })
    }

    /// Next JSON-RPC request id; monotonically increasing per connection.
    fn next_rpc_id(&self) -> u64 {
        self.rpc_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Execute one tool call against its upstream.
    ///
    /// `raw_body` is the caller's body verbatim (HTTP tiers forward it
    /// byte-for-byte); `parsed_body` is the same body as JSON for the
    /// JSON-RPC envelope.
    pub async fn execute(
        &self,
        record: &ToolRecord,
        target: &EffectiveTarget,
        raw_body: Bytes,
        parsed_body: &Value,
    ) -> Result<UpstreamResponse, GatewayError> {
        match &record.invocation {
            Invocation::Http { path } => {
                self.execute_http(target, path, raw_body).await
            }
            Invocation::Rpc { method } => {
                self.execute_rpc(target, method, parsed_body).await
            }
        }
    }

    /// Plain HTTP tier: `POST {endpoint}{path}` with body passthrough and
    /// the effective credential as a bearer header.
    async fn execute_http(
        &self,
        target: &EffectiveTarget,
        path: &str,
        raw_body: Bytes,
    ) -> Result<UpstreamResponse, GatewayError> {
        let url = join_url(&target.endpoint, path);
        let mut request = self
            .client
            .post(&url)
            .header("User-Agent", REQUEST_USER_AGENT)
            .header("Content-Type", "application/json")
            .body(raw_body);
        if let Some(credential) = &target.credential {
            request = request.bearer_auth(credential);
        }

        let response = request.send().await.map_err(map_send_error)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::UpstreamUnreachable(e.to_string()))?;

        // Forward status and body verbatim; 5xx collapses to 502.
        let status = if status >= 500 { 502 } else { status };
        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }

    /// JSON-RPC tier: wrap the body in a `tools/call` envelope, unwrap the
    /// `result` / `error` member of the (possibly streamed) response.
    async fn execute_rpc(
        &self,
        target: &EffectiveTarget,
        method: &str,
        arguments: &Value,
    ) -> Result<UpstreamResponse, GatewayError> {
        let id = self.next_rpc_id();
        let envelope = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {
                "name": method,
                "arguments": arguments,
            }
        });

        let mut request = self
            .client
            .post(&target.endpoint)
            .header("User-Agent", REQUEST_USER_AGENT)
            .header("Accept", "application/json, text/event-stream")
            .json(&envelope);
        if let Some(credential) = &target.credential {
            request = request.bearer_auth(credential);
        }

        let response = request.send().await.map_err(map_send_error)?;
        let status = response.status().as_u16();
        if status >= 500 {
            let body = response.bytes().await.unwrap_or_default();
            return Ok(UpstreamResponse {
                status: 502,
                content_type: Some("application/json".to_string()),
                body,
            });
        }
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::UpstreamUnreachable(e.to_string()))?;
        if status >= 400 {
            // Forward upstream 4xx verbatim.
            return Ok(UpstreamResponse {
                status,
                content_type,
                body: Bytes::from(text),
            });
        }

        let message = extract_rpc_message(content_type.as_deref(), &text, id)
            .map_err(GatewayError::UpstreamUnreachable)?;
        if let Some(error) = message.get("error") {
            tracing::debug!(%error, "upstream JSON-RPC error");
            return Ok(UpstreamResponse::json(502, &json!({ "error": error })));
        }
        let result = message.get("result").cloned().unwrap_or(Value::Null);
        Ok(UpstreamResponse::json(200, &result))
    }
}

/// Join an endpoint and a tool path with exactly one slash between them.
/// Trailing slashes on endpoints are trimmed idempotently, so overrides
/// written with or without one behave the same.
fn join_url(endpoint: &str, path: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn map_send_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() || e.is_connect() {
        GatewayError::UpstreamUnreachable(e.to_string())
    } else {
        GatewayError::UpstreamUnreachable(format!("request failed: {e}"))
    }
}
