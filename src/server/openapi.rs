//! Dynamic OpenAPI 3.1 emitter.
//!
//! The document is assembled fresh on every request from the current
//! catalog snapshot, restricted to the servers the caller may see. All
//! intermediate maps are ordered, so repeated requests between refreshes
//! produce byte-identical documents.

use std::collections::BTreeSet;

use serde_json::{Map, Value, json};

use crate::catalog::CatalogSnapshot;
use crate::server::constants::{
    OPENAPI_INFO_TITLE, OPENAPI_INFO_VERSION, SEARCH_DEFAULT_TOP_K, SEARCH_MAX_TOP_K,
};

/// Build the user-filtered document.
///
/// Expanded mode emits one `POST /{server_id}/{tool_name}` per permitted
/// tool plus the deprecated flat `POST /{server_id}_{tool_name}` form.
/// Meta-tools mode emits exactly the three meta operations and advertises
/// no individual tools.
pub fn build_document(
    snapshot: &CatalogSnapshot,
    permitted: &BTreeSet<String>,
    meta_mode: bool,
) -> Value {
    let mut paths = Map::new();
    let mut components = Map::new();

    if meta_mode {
        insert_meta_paths(&mut paths);
    } else {
        for (server_id, tools) in &snapshot.tools {
            if !permitted.contains(server_id) {
                continue;
            }
            for (tool_name, record) in tools {
                let request_body = record.schema.to_request_body();
                let summary = if record.description.is_empty() {
                    tool_name.clone()
                } else {
                    record.description.clone()
                };
                paths.insert(
                    format!("/{server_id}/{tool_name}"),
                    json!({
                        "post": {
                            "operationId": format!("{server_id}_{tool_name}"),
                            "summary": summary,
                            "tags": [server_id],
                            "requestBody": request_body,
                            "responses": default_responses(),
                        }
                    }),
                );
                // Backward-compatible flat form; same request shape.
                paths.insert(
                    format!("/{server_id}_{tool_name}"),
                    json!({
                        "post": {
                            "operationId": format!("{server_id}_{tool_name}_flat"),
                            "summary": summary,
                            "tags": [server_id],
                            "deprecated": true,
                            "requestBody": request_body,
                            "responses": default_responses(),
                        }
                    }),
                );
            }
        }
        merge_components(snapshot, permitted, &mut components);
    }

    let mut document = json!({
        "openapi": "3.1.0",
        "info": {
            "title": OPENAPI_INFO_TITLE,
            "version": OPENAPI_INFO_VERSION,
        },
        "paths": Value::Object(paths),
    });
    if !components.is_empty() {
        document["components"] = json!({ "schemas": Value::Object(components) });
    }
    document
}

/// Merge upstream schema components for the permitted servers,
/// deduplicated by name; a name collision with a different shape is
/// resolved by prefixing the later server's id.
fn merge_components(
    snapshot: &CatalogSnapshot,
    permitted: &BTreeSet<String>,
    out: &mut Map<String, Value>,
) {
    for (server_id, schemas) in &snapshot.schema_components {
        if !permitted.contains(server_id) {
            continue;
        }
        for (name, schema) in schemas {
            match out.get(name) {
                None => {
                    out.insert(name.clone(), schema.clone());
                }
                Some(existing) if existing == schema => {}
                Some(_) => {
                    out.insert(format!("{server_id}_{name}"), schema.clone());
                }
            }
        }
    }
}

fn default_responses() -> Value {
    json!({
        "200": { "description": "Tool result" },
        "403": { "description": "Access denied" },
        "404": { "description": "Unknown server or tool" },
    })
}

fn insert_meta_paths(paths: &mut Map<String, Value>) {
    paths.insert(
        "/meta/search_tools".to_string(),
        json!({
            "post": {
                "operationId": "meta_search_tools",
                "summary": "Rank the permitted tools against a natural-language query",
                "requestBody": {
                    "required": true,
                    "content": {"application/json": {"schema": {
                        "type": "object",
                        "properties": {
                            "query": {"type": "string"},
                            "top_k": {
                                "type": "integer",
                                "default": SEARCH_DEFAULT_TOP_K,
                                "maximum": SEARCH_MAX_TOP_K,
                            },
                        },
                        "required": ["query"],
                    }}}
                },
                "responses": default_responses(),
            }
        }),
    );
    paths.insert(
        "/meta/describe_tools".to_string(),
        json!({
            "post": {
                "operationId": "meta_describe_tools",
                "summary": "Full input schemas for qualified tool names",
                "requestBody": {
                    "required": true,
                    "content": {"application/json": {"schema": {
                        "type": "object",
                        "properties": {
                            "names": {"type": "array", "items": {"type": "string"}},
                        },
                        "required": ["names"],
                    }}}
                },
                "responses": default_responses(),
            }
        }),
    );
    paths.insert(
        "/meta/call_tool".to_string(),
        json!({
            "post": {
                "operationId": "meta_call_tool",
                "summary": "Invoke a tool by qualified name",
                "requestBody": {
                    "required": true,
                    "content": {"application/json": {"schema": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "arguments": {"type": "object"},
                        },
                        "required": ["name"],
                    }}}
                },
                "responses": default_responses(),
            }
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Invocation, ToolRecord, ToolSchema};
    use crate::config::Tier;
    use std::collections::BTreeMap;

    fn snapshot() -> CatalogSnapshot {
        let mut snapshot = CatalogSnapshot::default();
        for server in ["github", "filesystem"] {
            let mut tools = BTreeMap::new();
            tools.insert(
                "do_thing".to_string(),
                ToolRecord {
                    server_id: server.to_string(),
                    tool_name: "do_thing".to_string(),
                    description: "Do the thing".to_string(),
                    schema: ToolSchema::default(),
                    tier: Tier::OpenApi,
                    invocation: Invocation::Http {
                        path: "/do_thing".to_string(),
                    },
                },
            );
            snapshot.tools.insert(server.to_string(), tools);
        }
        snapshot
    }

    fn permitted(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn document_is_filtered_to_permitted_servers() {
        let doc = build_document(&snapshot(), &permitted(&["github"]), false);
        let paths = doc["paths"].as_object().unwrap();
        assert!(paths.contains_key("/github/do_thing"));
        assert!(paths.contains_key("/github_do_thing"));
        assert!(!paths.contains_key("/filesystem/do_thing"));
        assert_eq!(
            paths["/github_do_thing"]["post"]["deprecated"],
            Value::Bool(true)
        );
    }

    #[test]
    fn meta_mode_emits_exactly_three_operations() {
        let doc = build_document(&snapshot(), &permitted(&["github", "filesystem"]), true);
        let paths = doc["paths"].as_object().unwrap();
        assert_eq!(paths.len(), 3);
        assert!(paths.contains_key("/meta/search_tools"));
        assert!(paths.contains_key("/meta/describe_tools"));
        assert!(paths.contains_key("/meta/call_tool"));
    }

    #[test]
    fn component_collisions_are_prefixed() {
        let mut snap = snapshot();
        let mut a = BTreeMap::new();
        a.insert("Issue".to_string(), json!({"type": "object"}));
        snap.schema_components.insert("filesystem".to_string(), a);
        let mut b = BTreeMap::new();
        b.insert("Issue".to_string(), json!({"type": "string"}));
        b.insert("Common".to_string(), json!({"type": "object"}));
        snap.schema_components.insert("github".to_string(), b);

        let doc = build_document(&snap, &permitted(&["github", "filesystem"]), false);
        let schemas = doc["components"]["schemas"].as_object().unwrap();
        assert_eq!(schemas["Issue"], json!({"type": "object"}));
        assert_eq!(schemas["github_Issue"], json!({"type": "string"}));
        assert!(schemas.contains_key("Common"));
    }

    #[test]
    fn operations_lift_the_tool_schema_into_the_request_body() {
        let mut snap = CatalogSnapshot::default();
        let schema = ToolSchema::from_json_schema(&json!({
            "type": "object",
            "properties": {"pr": {"type": "integer"}},
            "required": ["pr"],
        }));
        let mut tools = BTreeMap::new();
        tools.insert(
            "merge".to_string(),
            ToolRecord {
                server_id: "github".to_string(),
                tool_name: "merge".to_string(),
                description: "Merge".to_string(),
                schema: schema.clone(),
                tier: Tier::OpenApi,
                invocation: Invocation::Http {
                    path: "/merge".to_string(),
                },
            },
        );
        snap.tools.insert("github".to_string(), tools);

        let doc = build_document(&snap, &permitted(&["github"]), false);
        let nested = &doc["paths"]["/github/merge"]["post"]["requestBody"];
        let flat = &doc["paths"]["/github_merge"]["post"]["requestBody"];
        assert_eq!(nested, &schema.to_request_body());
        // The deprecated flat twin references the same request shape.
        assert_eq!(nested, flat);
    }

    #[test]
    fn repeated_builds_are_byte_identical() {
        let snap = snapshot();
        let grants = permitted(&["github", "filesystem"]);
        let first = build_document(&snap, &grants, false).to_string();
        let second = build_document(&snap, &grants, false).to_string();
        assert_eq!(first, second);
    }
}
