//! The explicit refresh endpoint: admin gating and idempotence.

mod common;

use axum::http::StatusCode;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;
use toolgate::config::Tier;

fn doc() -> serde_json::Value {
    json!({
        "paths": {
            "/merge_pull_request": {"post": {"summary": "Merge a pull request"}}
        }
    })
}

/// Non-admin callers cannot trigger a rebuild.
#[tokio::test]
async fn refresh_requires_admin() {
    let state = state_with(
        test_config(),
        descriptors(vec![descriptor("github", Tier::OpenApi, "http://github.local")]),
        Some(MemoryStore::default()),
    );
    let app = router(state);

    expect_status(
        &app,
        edge_post("/refresh", "alice@a.com", &["MCP-GitHub"], json!({})),
        StatusCode::FORBIDDEN,
    )
    .await;
}

/// Repeated refreshes are safe: the final cache state depends only on the
/// upstreams, not on the number of runs.
#[tokio::test]
async fn refresh_is_idempotent() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/openapi.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(doc()))
        .mount(&upstream)
        .await;

    let state = state_with(
        test_config(),
        descriptors(vec![descriptor("github", Tier::OpenApi, &upstream.uri())]),
        Some(MemoryStore::default()),
    );
    let app = router(state.clone());

    // Before the first refresh the catalog is unpopulated: listings are
    // empty rather than failing.
    let body = expect_status(
        &app,
        edge_request("GET", "/github", "root@a.com", &["MCP-Admin"], false),
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["tools"], json!([]));

    for _ in 0..3 {
        let body = expect_status(
            &app,
            edge_post("/refresh", "root@a.com", &["MCP-Admin"], json!({})),
            StatusCode::OK,
        )
        .await;
        assert_eq!(body["succeeded"], json!(["github"]));
        assert_eq!(body["tools"], json!(1));
    }

    let snapshot = state.catalog.snapshot();
    assert!(snapshot.populated);
    assert!(snapshot.tool("github", "merge_pull_request").is_some());

    let body = expect_status(
        &app,
        edge_request("GET", "/health", "root@a.com", &["MCP-Admin"], false),
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["catalog"]["tools"], json!(1));
    assert_eq!(body["catalog"]["populated"], json!(true));
}
