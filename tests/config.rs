use std::fs;
use std::path::PathBuf;

use toolgate::catalog::ServerDescriptor;
use toolgate::config::{ConfigError, GatewayConfig, Tier, UpstreamEntry};

fn write_temp_config(contents: &str) -> tempfile::NamedTempFile {
    let f = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    fs::write(f.path(), contents).unwrap();
    f
}

/// Test that loading configuration with no file present uses explicit
/// defaults instead of relying on struct Default for nested blocks.
#[test]
fn load_missing_file_uses_explicit_defaults() {
    let cfg = GatewayConfig::load_with_overrides(
        Some(PathBuf::from("__does_not_exist__")),
        Some("127.0.0.1:3001".to_string()),
        None,
        None,
    )
    .unwrap();

    assert_eq!(
        cfg.server.clone().unwrap().bind_address.unwrap(),
        "127.0.0.1:3001"
    );
    assert!(!cfg.meta_tools_mode);
    assert_eq!(cfg.refresh.timeout_seconds, 10);
    assert_eq!(cfg.refresh.retries, 3);
    assert_eq!(cfg.refresh.retry_delay_seconds, 5);
    assert_eq!(cfg.call_timeout_seconds, 30);
    assert_eq!(cfg.request_body_max_bytes, 1024 * 1024);
    assert_eq!(cfg.access_cache_ttl_seconds, 60);
    assert!(cfg.embedding.is_none());
    assert!(cfg.upstreams.is_empty());
}

/// Test loading YAML config without a server block, verifying defaults are
/// applied and CLI overrides work.
#[test]
fn load_yaml_without_server_block_applies_defaults() {
    let tf = write_temp_config(
        r#"
        meta_tools_mode: false
        upstreams:
          - id: github
            endpoint: "http://localhost:9001"
          - id: linear
            tier: json-rpc
            endpoint: "http://localhost:9002/mcp"
        "#,
    );

    let cfg = GatewayConfig::load_with_overrides(
        Some(tf.path().to_path_buf()),
        None,
        Some(true),
        Some(true),
    )
    .unwrap();

    // server block defaulted even though absent from the file
    let server = cfg.server.clone().unwrap();
    assert_eq!(server.bind_address.as_deref(), Some("127.0.0.1:8000"));

    // CLI overrides applied with highest precedence
    assert!(cfg.meta_tools_mode);
    assert!(cfg.refresh.skip_startup_refresh);

    assert_eq!(cfg.upstreams.len(), 2);
    assert_eq!(cfg.upstreams[1].tier, Tier::JsonRpc);
}

/// Unknown keys anywhere in the file are rejected at startup.
#[test]
fn unknown_root_key_is_rejected() {
    let tf = write_temp_config(
        r#"
        meta_tools_mode: false
        tool_cache_mode: eager
        "#,
    );

    let err = GatewayConfig::load_with_overrides(Some(tf.path().to_path_buf()), None, None, None)
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("tool_cache_mode"), "got: {message}");
}

#[test]
fn unknown_nested_key_is_rejected_with_location() {
    let tf = write_temp_config(
        r#"
        refresh:
          timeout_seconds: 10
          backoff_style: exponential
        "#,
    );

    let err = GatewayConfig::load_with_overrides(Some(tf.path().to_path_buf()), None, None, None)
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("backoff_style"), "got: {message}");
    assert!(message.contains("line"), "got: {message}");
}

#[test]
fn duplicate_upstream_ids_are_rejected() {
    let tf = write_temp_config(
        r#"
        upstreams:
          - id: github
            endpoint: "http://localhost:9001"
          - id: github
            endpoint: "http://localhost:9002"
        "#,
    );

    let err = GatewayConfig::load_with_overrides(Some(tf.path().to_path_buf()), None, None, None)
        .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

/// An upstream is enabled iff its credential env var is present and
/// non-empty; the endpoint's trailing slash is trimmed at load.
#[test]
fn descriptor_enablement_follows_credential_env() {
    let entry: UpstreamEntry = serde_yaml_ng::from_str(
        r#"
        id: github
        endpoint: "http://localhost:9001/"
        credential_env: TOOLGATE_TEST_CFG_PRESENT
        "#,
    )
    .unwrap();

    // SAFETY: test-local variable name, no concurrent reader.
    unsafe { std::env::set_var("TOOLGATE_TEST_CFG_PRESENT", "shhh") };
    let descriptor = ServerDescriptor::from_entry(&entry);
    assert!(descriptor.enabled);
    assert_eq!(descriptor.credential.as_deref(), Some("shhh"));
    assert_eq!(descriptor.endpoint, "http://localhost:9001");

    let absent: UpstreamEntry = serde_yaml_ng::from_str(
        r#"
        id: jira
        endpoint: "http://localhost:9003"
        credential_env: TOOLGATE_TEST_CFG_ABSENT
        "#,
    )
    .unwrap();
    let descriptor = ServerDescriptor::from_entry(&absent);
    assert!(!descriptor.enabled);
    assert!(descriptor.credential.is_none());
}

/// The shipped example configuration stays loadable.
#[test]
fn example_config_parses() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("toolgate.example.yaml");
    let cfg =
        GatewayConfig::load_with_overrides(Some(path), None, None, None).unwrap();

    assert_eq!(cfg.upstreams.len(), 5);
    let tiers: Vec<Tier> = cfg.upstreams.iter().map(|u| u.tier).collect();
    assert_eq!(
        tiers,
        vec![
            Tier::OpenApi,
            Tier::JsonRpc,
            Tier::Sse,
            Tier::ChildProcess,
            Tier::Container,
        ]
    );
    assert_eq!(cfg.upstreams[0].credential_env.as_deref(), Some("GITHUB_TOOLS_TOKEN"));
    let embedding = cfg.embedding.unwrap();
    assert_eq!(embedding.dim, 1536);
    assert_eq!(cfg.server.unwrap().cors.as_deref(), Some("*"));
}

/// Mandatory secrets resolve from the environment and fail fast when
/// missing.
#[test]
fn mandatory_secrets_fail_fast() {
    let tf = write_temp_config(
        r#"
        token_signing_secret_env: TOOLGATE_TEST_CFG_NO_SUCH_SECRET
        "#,
    );
    let cfg = GatewayConfig::load_with_overrides(Some(tf.path().to_path_buf()), None, None, None)
        .unwrap();
    assert!(cfg.signing_secret().is_err());
}
