//! Tool catalog: canonical records and the swap-on-refresh snapshot store.
//!
//! The catalog is the only process-wide mutable state besides the access
//! cache. Refreshes build a complete [`CatalogSnapshot`] off to the side and
//! install it with a single O(1) swap; readers clone the current `Arc` and
//! never observe a half-built catalog.

pub mod discovery;
pub mod embedding;
pub mod refresh;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::{Tier, UpstreamEntry};

/// Composite key identifying a tool: `(server_id, tool_name)`.
pub type ToolKey = (String, String);

/// In-process catalog entry for one configured upstream.
///
/// Constructed at startup from the static descriptor table merged with the
/// environment; immutable thereafter. `enabled` is computed at load: an
/// upstream without its credential stays listed but disabled.
#[derive(Debug, Clone, Serialize)]
pub struct ServerDescriptor {
    pub server_id: String,
    pub name: String,
    pub description: String,
    pub tier: Tier,
    /// Base endpoint with any trailing slash trimmed.
    pub endpoint: String,
    /// Default bearer credential resolved from the environment.
    #[serde(skip_serializing)]
    pub credential: Option<String>,
    /// Groups granted access by configuration.
    pub default_groups: Vec<String>,
    pub enabled: bool,
}

impl ServerDescriptor {
    /// Build a descriptor from a config entry, resolving the credential
    /// from the environment.
    pub fn from_entry(entry: &UpstreamEntry) -> Self {
        let credential = entry.resolve_credential();
        let enabled = credential.is_some();
        Self {
            server_id: entry.id.clone(),
            name: entry.name.clone().unwrap_or_else(|| entry.id.clone()),
            description: entry.description.clone().unwrap_or_default(),
            tier: entry.tier,
            endpoint: entry.endpoint.as_str().trim_end_matches('/').to_string(),
            credential,
            default_groups: entry.groups.clone(),
            enabled,
        }
    }
}

/// How a cached tool is invoked on its upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Invocation {
    /// `POST {endpoint}{path}` with body passthrough.
    Http { path: String },
    /// JSON-RPC `tools/call` with `params.name = method`.
    Rpc { method: String },
}

/// Structured input schema for a tool: parameter names, types, required
/// flags. Normalised from either a JSON-Schema `inputSchema` (JSON-RPC
/// tier) or an OpenAPI request body (HTTP tiers); converts back losslessly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub properties: BTreeMap<String, PropertySchema>,
    pub required: Vec<String>,
}

/// One parameter in a [`ToolSchema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    /// JSON type name ("string", "integer", "number", "boolean", "array",
    /// "object").
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Item schema for arrays.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,
    /// Closed value set, when the upstream declares one.
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl PropertySchema {
    fn from_value(value: &Value) -> Self {
        let type_name = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("object")
            .to_string();
        let description = value
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        let items = value
            .get("items")
            .map(|v| Box::new(PropertySchema::from_value(v)));
        let enum_values = value
            .get("enum")
            .and_then(Value::as_array)
            .map(|v| v.to_vec());
        Self {
            type_name,
            description,
            items,
            enum_values,
        }
    }

    fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".into(), Value::String(self.type_name.clone()));
        if let Some(desc) = &self.description {
            obj.insert("description".into(), Value::String(desc.clone()));
        }
        if let Some(items) = &self.items {
            obj.insert("items".into(), items.to_value());
        }
        if let Some(values) = &self.enum_values {
            obj.insert("enum".into(), Value::Array(values.clone()));
        }
        Value::Object(obj)
    }
}

impl ToolSchema {
    /// Normalise a JSON-Schema object (`{type: object, properties, required}`)
    /// into a `ToolSchema`. Anything that is not an object schema collapses
    /// to the empty schema.
    pub fn from_json_schema(schema: &Value) -> Self {
        let mut out = ToolSchema::default();
        let Some(props) = schema.get("properties").and_then(Value::as_object) else {
            return out;
        };
        for (name, prop) in props {
            out.properties
                .insert(name.clone(), PropertySchema::from_value(prop));
        }
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            out.required = required
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
        out
    }

    /// Render the schema as a JSON-Schema object value.
    pub fn to_json_schema(&self) -> Value {
        let mut props = Map::new();
        for (name, prop) in &self.properties {
            props.insert(name.clone(), prop.to_value());
        }
        json!({
            "type": "object",
            "properties": Value::Object(props),
            "required": self.required,
        })
    }

    /// Lift the schema into an OpenAPI `requestBody` object.
    pub fn to_request_body(&self) -> Value {
        json!({
            "required": true,
            "content": {
                "application/json": {
                    "schema": self.to_json_schema(),
                }
            }
        })
    }

    /// Recover a `ToolSchema` from an OpenAPI `requestBody` object. Inverse
    /// of [`to_request_body`](Self::to_request_body).
    pub fn from_request_body(body: &Value) -> Self {
        body.get("content")
            .and_then(|c| c.get("application/json"))
            .and_then(|m| m.get("schema"))
            .map(Self::from_json_schema)
            .unwrap_or_default()
    }
}

/// Cache row for one advertised tool.
///
/// Never mutated in place: refresh builds replacement records wholesale.
#[derive(Debug, Clone, Serialize)]
pub struct ToolRecord {
    pub server_id: String,
    pub tool_name: String,
    pub description: String,
    pub schema: ToolSchema,
    pub tier: Tier,
    pub invocation: Invocation,
}

impl ToolRecord {
    /// Flat qualified name, `{server_id}_{tool_name}`, used by the
    /// deprecated flat routes and the meta-tools surface.
    pub fn qualified_name(&self) -> String {
        format!("{}_{}", self.server_id, self.tool_name)
    }

    /// Text embedded for semantic ranking.
    pub fn embedding_text(&self) -> String {
        format!("{}: {}", self.tool_name, self.description)
    }

    pub fn key(&self) -> ToolKey {
        (self.server_id.clone(), self.tool_name.clone())
    }
}

/// One coherent view of the discovered catalog.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    /// False only for the placeholder installed before the first refresh
    /// completes. Listings over an unpopulated snapshot are empty; calls
    /// return 503.
    pub populated: bool,
    /// Millisecond epoch of the refresh that produced this snapshot.
    pub last_refresh_ms: Option<u64>,
    /// `server_id -> tool_name -> record`. Ordered for stable output.
    pub tools: BTreeMap<String, BTreeMap<String, ToolRecord>>,
    /// Upstream OpenAPI `components.schemas`, kept per server so a failed
    /// refresh can retain them alongside the server's tool records. The
    /// emitter merges and deduplicates them per request.
    pub schema_components: BTreeMap<String, BTreeMap<String, Value>>,
}

impl CatalogSnapshot {
    pub fn tool(&self, server_id: &str, tool_name: &str) -> Option<&ToolRecord> {
        self.tools.get(server_id).and_then(|m| m.get(tool_name))
    }

    pub fn tool_count(&self) -> usize {
        self.tools.values().map(BTreeMap::len).sum()
    }

    /// Resolve a flat `{server_id}_{tool_name}` name against the catalog.
    /// Server ids may themselves contain underscores, so every split point
    /// is tried, longest server id first.
    pub fn resolve_flat_name(&self, flat: &str) -> Option<&ToolRecord> {
        for (server_id, tools) in self.tools.iter().rev() {
            if let Some(rest) = flat.strip_prefix(server_id.as_str())
                && let Some(tool_name) = rest.strip_prefix('_')
                && let Some(record) = tools.get(tool_name)
            {
                return Some(record);
            }
        }
        None
    }
}

/// Snapshot store with a single writer and lock-free-in-spirit readers.
///
/// Writers (the refresh engine) hold `refresh_gate` for the whole rebuild
/// and the inner write lock only for the O(1) `Arc` swap. Readers take the
/// read lock just long enough to clone the `Arc`.
pub struct ToolCatalog {
    snapshot: RwLock<Arc<CatalogSnapshot>>,
    embeddings: RwLock<Arc<HashMap<ToolKey, Arc<Vec<f32>>>>>,
    /// Serialises refreshes; `POST /refresh` and the startup refresh share it.
    pub refresh_gate: tokio::sync::Mutex<()>,
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(CatalogSnapshot::default())),
            embeddings: RwLock::new(Arc::new(HashMap::new())),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Current coherent snapshot.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Install a freshly built snapshot and drop embeddings from the
    /// previous generation so rankings never use stale vectors.
    pub fn install(&self, mut snapshot: CatalogSnapshot) {
        snapshot.populated = true;
        snapshot.last_refresh_ms = Some(epoch_ms());
        {
            let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
            *guard = Arc::new(snapshot);
        }
        let mut emb = self.embeddings.write().unwrap_or_else(|e| e.into_inner());
        *emb = Arc::new(HashMap::new());
    }

    /// Current embedding vectors, keyed by `(server_id, tool_name)`.
    pub fn embeddings(&self) -> Arc<HashMap<ToolKey, Arc<Vec<f32>>>> {
        self.embeddings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the embedding map wholesale (post-swap, best-effort).
    pub fn install_embeddings(&self, map: HashMap<ToolKey, Arc<Vec<f32>>>) {
        let mut guard = self.embeddings.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(map);
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(server: &str, tool: &str) -> ToolRecord {
        ToolRecord {
            server_id: server.to_string(),
            tool_name: tool.to_string(),
            description: String::new(),
            schema: ToolSchema::default(),
            tier: Tier::OpenApi,
            invocation: Invocation::Http {
                path: format!("/{tool}"),
            },
        }
    }

    #[test]
    fn schema_round_trips_through_request_body() {
        let schema = ToolSchema::from_json_schema(&json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "description": "Issue title"},
                "labels": {"type": "array", "items": {"type": "string"}},
                "priority": {"type": "integer", "enum": [1, 2, 3]},
            },
            "required": ["title"],
        }));
        let body = schema.to_request_body();
        let back = ToolSchema::from_request_body(&body);
        assert_eq!(schema, back);
        assert_eq!(back.required, vec!["title".to_string()]);
        assert_eq!(back.properties["labels"].items.as_ref().unwrap().type_name, "string");
    }

    #[test]
    fn non_object_schema_collapses_to_empty() {
        let schema = ToolSchema::from_json_schema(&json!({"type": "string"}));
        assert!(schema.properties.is_empty());
        assert!(schema.required.is_empty());
    }

    #[test]
    fn flat_name_resolution_prefers_longest_server_id() {
        let mut snapshot = CatalogSnapshot::default();
        let mut a = BTreeMap::new();
        a.insert("issue_create".to_string(), record("github", "issue_create"));
        snapshot.tools.insert("github".to_string(), a);
        let mut b = BTreeMap::new();
        b.insert("create".to_string(), record("github_issue", "create"));
        snapshot.tools.insert("github_issue".to_string(), b);

        let hit = snapshot.resolve_flat_name("github_issue_create").unwrap();
        assert_eq!(hit.server_id, "github_issue");
        assert_eq!(hit.tool_name, "create");

        assert!(snapshot.resolve_flat_name("github_missing").is_none());
    }

    #[test]
    fn install_clears_embeddings() {
        let catalog = ToolCatalog::new();
        let mut map = HashMap::new();
        map.insert(
            ("github".to_string(), "merge".to_string()),
            Arc::new(vec![0.5_f32]),
        );
        catalog.install_embeddings(map);
        assert_eq!(catalog.embeddings().len(), 1);

        catalog.install(CatalogSnapshot::default());
        assert!(catalog.embeddings().is_empty());
        assert!(catalog.snapshot().populated);
    }

    #[test]
    fn unpopulated_snapshot_is_default() {
        let catalog = ToolCatalog::new();
        let snap = catalog.snapshot();
        assert!(!snap.populated);
        assert_eq!(snap.tool_count(), 0);
    }

    fn generation(tool_names: &[&str]) -> CatalogSnapshot {
        let mut snapshot = CatalogSnapshot::default();
        let mut tools = BTreeMap::new();
        for name in tool_names {
            tools.insert(name.to_string(), record("github", name));
        }
        snapshot.tools.insert("github".to_string(), tools);
        snapshot
    }

    /// Concurrent readers observe either the pre-refresh or post-refresh
    /// catalog, never a mix: every snapshot is one complete generation.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_observe_a_mixed_catalog() {
        let catalog = Arc::new(ToolCatalog::new());
        catalog.install(generation(&["a1", "a2"]));

        let writer = {
            let catalog = catalog.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    if i % 2 == 0 {
                        catalog.install(generation(&["b1", "b2", "b3"]));
                    } else {
                        catalog.install(generation(&["a1", "a2"]));
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let catalog = catalog.clone();
                tokio::spawn(async move {
                    for _ in 0..200 {
                        let snap = catalog.snapshot();
                        let names: Vec<&String> =
                            snap.tools["github"].keys().collect();
                        let is_a = names == ["a1", "a2"];
                        let is_b = names == ["b1", "b2", "b3"];
                        assert!(is_a || is_b, "mixed catalog observed: {names:?}");
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }
}
