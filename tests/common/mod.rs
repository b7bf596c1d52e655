//! Shared harness for the integration tests: an in-memory access store,
//! state/router builders, and small request helpers.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use toolgate::catalog::{CatalogSnapshot, Invocation, ServerDescriptor, ToolKey, ToolRecord, ToolSchema};
use toolgate::config::{GatewayConfig, RefreshConfig, Tier};
use toolgate::server::auth::{
    EDGE_ADMIN_HEADER, EDGE_EMAIL_HEADER, EDGE_GROUPS_HEADER, EDGE_VALIDATED_HEADER,
};
use toolgate::server::persist::{AccessStore, StoreError, StoredEmbedding};
use toolgate::server::service::build_router;
use toolgate::state::GatewayState;

pub const SECRET: &str = "integration-test-secret";

/// In-memory [`AccessStore`] seeded through its public fields.
///
/// With `fail` set, every operation reports the store as unavailable, which
/// is how the outage tests drive the fail-closed paths.
#[derive(Default)]
pub struct MemoryStore {
    pub user_groups: HashMap<String, Vec<String>>,
    pub group_servers: HashMap<String, Vec<String>>,
    pub admins: BTreeSet<String>,
    pub direct_grants: HashMap<String, Vec<String>>,
    pub tenant_credentials: HashMap<(String, String, String), String>,
    pub tenant_endpoints: HashMap<(String, String), String>,
    pub user_emails: HashMap<String, String>,
    pub embeddings: Mutex<HashMap<ToolKey, (String, Vec<f32>)>>,
    pub fail: bool,
}

impl MemoryStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.fail {
            Err(StoreError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AccessStore for MemoryStore {
    async fn groups_for_user(&self, email: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(self.user_groups.get(email).cloned().unwrap_or_default())
    }

    async fn servers_for_groups(&self, groups: &[String]) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let mut out = Vec::new();
        for group in groups {
            out.extend(self.group_servers.get(group).cloned().unwrap_or_default());
        }
        Ok(out)
    }

    async fn is_admin(&self, email: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.admins.contains(email))
    }

    async fn direct_servers_for_user(&self, email: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(self.direct_grants.get(email).cloned().unwrap_or_default())
    }

    async fn tenant_credential(
        &self,
        tenant_id: &str,
        server_id: &str,
        key_name: &str,
    ) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self
            .tenant_credentials
            .get(&(
                tenant_id.to_string(),
                server_id.to_string(),
                key_name.to_string(),
            ))
            .cloned())
    }

    async fn tenant_endpoint(
        &self,
        tenant_id: &str,
        server_id: &str,
    ) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self
            .tenant_endpoints
            .get(&(tenant_id.to_string(), server_id.to_string()))
            .cloned())
    }

    async fn email_for_user_id(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.user_emails.get(user_id).cloned())
    }

    async fn embeddings_for_keys(
        &self,
        keys: &[ToolKey],
    ) -> Result<Vec<StoredEmbedding>, StoreError> {
        self.check()?;
        let stored = self.embeddings.lock().unwrap();
        Ok(keys
            .iter()
            .filter_map(|key| {
                stored.get(key).map(|(hash, vector)| StoredEmbedding {
                    server_id: key.0.clone(),
                    tool_name: key.1.clone(),
                    content_hash: hash.clone(),
                    vector: vector.clone(),
                })
            })
            .collect())
    }

    async fn upsert_embedding(
        &self,
        server_id: &str,
        tool_name: &str,
        content_hash: &str,
        vector: &[f32],
    ) -> Result<(), StoreError> {
        self.check()?;
        self.embeddings.lock().unwrap().insert(
            (server_id.to_string(), tool_name.to_string()),
            (content_hash.to_string(), vector.to_vec()),
        );
        Ok(())
    }
}

/// Configuration tuned for tests: no retry back-off, short timeouts.
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        refresh: RefreshConfig {
            timeout_seconds: 2,
            retries: 0,
            retry_delay_seconds: 0,
            skip_startup_refresh: true,
            concurrency: 4,
        },
        call_timeout_seconds: 2,
        access_cache_ttl_seconds: 60,
        ..GatewayConfig::default()
    }
}

/// Enabled descriptor pointing at `endpoint` with a per-server credential.
pub fn descriptor(id: &str, tier: Tier, endpoint: &str) -> ServerDescriptor {
    ServerDescriptor {
        server_id: id.to_string(),
        name: id.to_string(),
        description: format!("{id} upstream"),
        tier,
        endpoint: endpoint.trim_end_matches('/').to_string(),
        credential: Some(format!("{id}-credential")),
        default_groups: vec![],
        enabled: true,
    }
}

pub fn descriptors(list: Vec<ServerDescriptor>) -> BTreeMap<String, ServerDescriptor> {
    list.into_iter()
        .map(|d| (d.server_id.clone(), d))
        .collect()
}

/// Build a gateway state over explicit descriptors and a memory store.
pub fn state_with(
    config: GatewayConfig,
    servers: BTreeMap<String, ServerDescriptor>,
    store: Option<MemoryStore>,
) -> Arc<GatewayState> {
    let state = GatewayState::with_servers(config, SECRET, servers).unwrap();
    let state = Arc::new(state);
    if let Some(store) = store {
        state.set_database(Arc::new(store));
    }
    state
}

pub fn router(state: Arc<GatewayState>) -> Router {
    build_router(state)
}

/// Install a snapshot built from the given records.
pub fn install_records(state: &GatewayState, records: Vec<ToolRecord>) {
    let mut snapshot = CatalogSnapshot::default();
    for record in records {
        snapshot
            .tools
            .entry(record.server_id.clone())
            .or_default()
            .insert(record.tool_name.clone(), record);
    }
    state.catalog.install(snapshot);
}

pub fn http_record(server: &str, tool: &str, description: &str) -> ToolRecord {
    ToolRecord {
        server_id: server.to_string(),
        tool_name: tool.to_string(),
        description: description.to_string(),
        schema: ToolSchema::default(),
        tier: Tier::OpenApi,
        invocation: Invocation::Http {
            path: format!("/{tool}"),
        },
    }
}

pub fn rpc_record(server: &str, tool: &str, description: &str) -> ToolRecord {
    ToolRecord {
        server_id: server.to_string(),
        tool_name: tool.to_string(),
        description: description.to_string(),
        schema: ToolSchema::default(),
        tier: Tier::JsonRpc,
        invocation: Invocation::Rpc {
            method: tool.to_string(),
        },
    }
}

/// Headers asserting an edge-validated caller.
pub fn edge_request(method: &str, path: &str, email: &str, groups: &[&str], admin: bool) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header(EDGE_VALIDATED_HEADER, "1")
        .header(EDGE_EMAIL_HEADER, email)
        .header(EDGE_GROUPS_HEADER, groups.join(","))
        .header(EDGE_ADMIN_HEADER, if admin { "true" } else { "false" })
        .body(Body::empty())
        .unwrap()
}

pub fn edge_post(path: &str, email: &str, groups: &[&str], body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(EDGE_VALIDATED_HEADER, "1")
        .header(EDGE_EMAIL_HEADER, email)
        .header(EDGE_GROUPS_HEADER, groups.join(","))
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    }
}

pub async fn expect_status(router: &Router, request: Request<Body>, status: StatusCode) -> Value {
    let response = send(router, request).await;
    assert_eq!(response.status(), status, "unexpected status");
    body_json(response).await
}
