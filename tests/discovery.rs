//! Discovery and refresh engine behavior against doubled upstreams.

mod common;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;
use toolgate::catalog::Invocation;
use toolgate::catalog::refresh::refresh_catalog;
use toolgate::config::Tier;

fn openapi_doc() -> serde_json::Value {
    json!({
        "openapi": "3.1.0",
        "paths": {
            "/merge_pull_request": {
                "post": {
                    "summary": "Merge a pull request",
                    "requestBody": {"content": {"application/json": {"schema": {
                        "type": "object",
                        "properties": {"pr": {"type": "integer"}},
                        "required": ["pr"],
                    }}}}
                }
            },
            "/close_issue": {
                "post": {"summary": "Close an issue"}
            }
        },
        "components": {"schemas": {"PullRequest": {"type": "object"}}}
    })
}

/// OpenAPI-tier discovery walks POST operations into tool records and
/// sends the upstream credential while doing so.
#[tokio::test]
async fn openapi_discovery_builds_records() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/openapi.json"))
        .and(header("Authorization", "Bearer github-credential"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openapi_doc()))
        .mount(&upstream)
        .await;

    let state = state_with(
        test_config(),
        descriptors(vec![descriptor("github", Tier::OpenApi, &upstream.uri())]),
        Some(MemoryStore::default()),
    );
    let outcome = refresh_catalog(&state).await;

    assert_eq!(outcome.succeeded, vec!["github".to_string()]);
    assert_eq!(outcome.total_tools, 2);
    let snapshot = state.catalog.snapshot();
    let record = snapshot.tool("github", "merge_pull_request").unwrap();
    assert_eq!(record.schema.required, vec!["pr".to_string()]);
    assert!(snapshot.schema_components["github"].contains_key("PullRequest"));
}

/// A JSON-RPC upstream answering `tools/list` with one tool yields one
/// record whose request body requires `title: string`.
#[tokio::test]
async fn jsonrpc_discovery_converts_input_schemas() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"jsonrpc": "2.0", "method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"tools": [{
                "name": "create_issue",
                "description": "Create a Linear issue",
                "inputSchema": {
                    "type": "object",
                    "properties": {"title": {"type": "string"}},
                    "required": ["title"],
                }
            }]}
        })))
        .mount(&upstream)
        .await;

    let state = state_with(
        test_config(),
        descriptors(vec![descriptor("linear", Tier::JsonRpc, &upstream.uri())]),
        Some(MemoryStore::default()),
    );
    let outcome = refresh_catalog(&state).await;

    assert_eq!(outcome.succeeded, vec!["linear".to_string()]);
    let snapshot = state.catalog.snapshot();
    let record = snapshot.tool("linear", "create_issue").unwrap();
    assert_eq!(record.invocation, Invocation::Rpc { method: "create_issue".to_string() });
    assert_eq!(record.schema.required, vec!["title".to_string()]);
    assert_eq!(record.schema.properties["title"].type_name, "string");

    // Round-trip law: lifting into a request body and back preserves the
    // parameter set.
    let body = record.schema.to_request_body();
    assert_eq!(
        toolgate::catalog::ToolSchema::from_request_body(&body),
        record.schema
    );
}

/// A refresh where one upstream fails keeps that server's previous records
/// and updates every upstream that succeeded.
#[tokio::test]
async fn failed_upstream_retains_previous_records() {
    let github = MockServer::start().await;
    let linear = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/openapi.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openapi_doc()))
        .mount(&github)
        .await;
    Mock::given(method("GET"))
        .and(path("/openapi.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "paths": {"/old_tool": {"post": {"summary": "Old"}}}
        })))
        .mount(&linear)
        .await;

    let state = state_with(
        test_config(),
        descriptors(vec![
            descriptor("github", Tier::OpenApi, &github.uri()),
            descriptor("linear", Tier::OpenApi, &linear.uri()),
        ]),
        Some(MemoryStore::default()),
    );
    let first = refresh_catalog(&state).await;
    assert_eq!(first.failed.len(), 0);
    assert!(state.catalog.snapshot().tool("linear", "old_tool").is_some());

    // Second round: linear starts failing, github grows a tool.
    linear.reset().await;
    Mock::given(method("GET"))
        .and(path("/openapi.json"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&linear)
        .await;

    let second = refresh_catalog(&state).await;
    assert_eq!(second.succeeded, vec!["github".to_string()]);
    assert_eq!(second.failed, vec!["linear".to_string()]);
    let snapshot = state.catalog.snapshot();
    assert!(snapshot.tool("linear", "old_tool").is_some(), "previous records retained");
    assert!(snapshot.tool("github", "merge_pull_request").is_some());
}

/// An empty or malformed descriptor replaces the server's records with the
/// empty set instead of retaining them.
#[tokio::test]
async fn malformed_descriptor_yields_empty_set() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/openapi.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openapi_doc()))
        .mount(&upstream)
        .await;

    let state = state_with(
        test_config(),
        descriptors(vec![descriptor("github", Tier::OpenApi, &upstream.uri())]),
        Some(MemoryStore::default()),
    );
    refresh_catalog(&state).await;
    assert_eq!(state.catalog.snapshot().tool_count(), 2);

    upstream.reset().await;
    Mock::given(method("GET"))
        .and(path("/openapi.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
        .mount(&upstream)
        .await;

    let outcome = refresh_catalog(&state).await;
    assert_eq!(outcome.succeeded, vec!["github".to_string()]);
    assert_eq!(state.catalog.snapshot().tool_count(), 0);
}

/// Duplicate tool names within one server reject that server's batch.
#[tokio::test]
async fn duplicate_tool_names_reject_the_batch() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"tools": [
                {"name": "create_issue", "inputSchema": {"type": "object"}},
                {"name": "create_issue", "inputSchema": {"type": "object"}},
            ]}
        })))
        .mount(&upstream)
        .await;

    let state = state_with(
        test_config(),
        descriptors(vec![descriptor("linear", Tier::JsonRpc, &upstream.uri())]),
        Some(MemoryStore::default()),
    );
    let outcome = refresh_catalog(&state).await;
    assert_eq!(outcome.failed, vec!["linear".to_string()]);
    assert_eq!(state.catalog.snapshot().tool_count(), 0);
}

/// SSE and child-process upstreams discover through their bridge's HTTP
/// facade exactly like direct OpenAPI upstreams.
#[tokio::test]
async fn facade_tiers_discover_via_openapi() {
    let sse_bridge = MockServer::start().await;
    let child_bridge = MockServer::start().await;
    for bridge in [&sse_bridge, &child_bridge] {
        Mock::given(method("GET"))
            .and(path("/openapi.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "paths": {"/run_query": {"post": {"summary": "Run a query"}}}
            })))
            .mount(bridge)
            .await;
    }

    let state = state_with(
        test_config(),
        descriptors(vec![
            descriptor("grafana", Tier::Sse, &sse_bridge.uri()),
            descriptor("sqlite", Tier::ChildProcess, &child_bridge.uri()),
        ]),
        Some(MemoryStore::default()),
    );
    let outcome = refresh_catalog(&state).await;

    assert_eq!(
        outcome.succeeded,
        vec!["grafana".to_string(), "sqlite".to_string()]
    );
    let snapshot = state.catalog.snapshot();
    assert_eq!(snapshot.tool("grafana", "run_query").unwrap().tier, Tier::Sse);
    assert_eq!(
        snapshot.tool("sqlite", "run_query").unwrap().tier,
        Tier::ChildProcess
    );
}

/// Disabled upstreams are skipped entirely.
#[tokio::test]
async fn disabled_upstreams_are_not_discovered() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openapi_doc()))
        .expect(0)
        .mount(&upstream)
        .await;

    let mut disabled = descriptor("github", Tier::OpenApi, &upstream.uri());
    disabled.enabled = false;
    disabled.credential = None;

    let state = state_with(
        test_config(),
        descriptors(vec![disabled]),
        Some(MemoryStore::default()),
    );
    let outcome = refresh_catalog(&state).await;
    assert!(outcome.succeeded.is_empty());
    assert!(outcome.failed.is_empty());
    assert!(state.catalog.snapshot().populated);
}
