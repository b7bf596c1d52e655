pub use components::{EmbeddingConfig, HttpEndpointConfig, RefreshConfig, StoreConfig};
pub use upstreams::{Tier, UpstreamEntry};

use serde::{Deserialize, Serialize};
/**
 * Toolgate configuration root module.
 *
 * - Defines the root configuration struct (`GatewayConfig`) and its defaults.
 * - Provides config file loading, CLI/env override logic, and error reporting.
 * - Uses `components.rs` for block types and `defaults.rs` for default helpers.
 *
 * Unknown keys anywhere in the file are rejected at startup: every struct in
 * this tree carries `deny_unknown_fields`, and parse errors carry the YAML
 * line/column.
 */
use std::collections::BTreeSet;
use std::{path::Path, path::PathBuf};
use thiserror::Error;

use crate::errors::StartupError;

pub mod components;
pub mod defaults;
pub mod upstreams;

// Root configuration for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Environment variable holding the shared token signing secret.
    #[serde(default = "defaults::default_signing_secret_env")]
    pub token_signing_secret_env: String,

    /// Persistent store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Static descriptor table, one entry per supported upstream.
    #[serde(default)]
    pub upstreams: Vec<UpstreamEntry>,

    /// Expose only the three meta-tools instead of individual tools.
    #[serde(default = "defaults::default_false")]
    pub meta_tools_mode: bool,

    /// Refresh engine settings.
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Tool call timeout in seconds.
    #[serde(default = "defaults::default_call_timeout")]
    pub call_timeout_seconds: u64,

    /// Inbound request body ceiling in bytes.
    #[serde(default = "defaults::default_request_body_max_bytes")]
    pub request_body_max_bytes: usize,

    /// TTL for cached access decisions, in seconds.
    #[serde(default = "defaults::default_access_cache_ttl")]
    pub access_cache_ttl_seconds: u64,

    /// Embedding provider; absent means substring ranking only.
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,

    /// HTTP listener configuration.
    pub server: Option<HttpEndpointConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl GatewayConfig {
    /// Compute the default configuration file path.
    pub fn default_path() -> PathBuf {
        if let Some(override_path) = std::env::var_os("TOOLGATE_CONFIG_PATH") {
            return PathBuf::from(override_path);
        }
        PathBuf::from("/").join("etc").join("toolgate").join("config")
    }

    /// Create a default configuration when no file is present.
    fn default_config() -> Self {
        Self {
            token_signing_secret_env: defaults::default_signing_secret_env(),
            store: StoreConfig::default(),
            upstreams: Vec::new(),
            meta_tools_mode: defaults::default_false(),
            refresh: RefreshConfig::default(),
            call_timeout_seconds: defaults::default_call_timeout(),
            request_body_max_bytes: defaults::default_request_body_max_bytes(),
            access_cache_ttl_seconds: defaults::default_access_cache_ttl(),
            embedding: None,
            server: Some(HttpEndpointConfig::default()),
        }
    }

    /// Load config from file and apply CLI overrides.
    ///
    /// Loads configuration from a YAML file if it exists, otherwise uses
    /// defaults. Then applies command-line overrides with highest precedence.
    ///
    /// # Arguments
    /// * `config_path` - Optional path to the configuration file. Uses default if None.
    /// * `bind_address` - Optional listener bind address.
    /// * `meta_tools_mode` - Optional flag forcing meta-tools mode on/off.
    /// * `skip_startup_refresh` - Optional flag skipping the gated startup refresh.
    ///
    /// # Returns
    /// The loaded and overridden configuration, or a ConfigError.
    pub fn load_with_overrides(
        config_path: Option<PathBuf>,
        bind_address: Option<String>,
        meta_tools_mode: Option<bool>,
        skip_startup_refresh: Option<bool>,
    ) -> Result<Self, ConfigError> {
        let path = config_path.unwrap_or_else(Self::default_path);

        // Parse from file with line/column + serde path diagnostics
        let mut cfg = if path.exists() {
            tracing::debug!("Reading from configuration file {:?}", path);
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::Parse(path.clone(), format!("I/O error: {}", e)))?;
            let parsed_cfg = Self::parse_yaml_with_path(&path, &text)?;

            // Ensure the server block has defaults even if missing from file
            Self {
                server: parsed_cfg
                    .server
                    .or_else(|| Some(HttpEndpointConfig::default())),
                ..parsed_cfg
            }
        } else {
            tracing::warn!(
                "No configuration file (checked {:?}) initializing with defaults",
                path
            );
            Self::default_config()
        };

        // Apply CLI/env overrides (highest precedence)
        if let (Some(addr), Some(ref mut server)) = (bind_address, cfg.server.as_mut()) {
            server.bind_address = Some(addr);
        }
        if let Some(meta) = meta_tools_mode {
            cfg.meta_tools_mode = meta;
        }
        if let Some(skip) = skip_startup_refresh {
            cfg.refresh.skip_startup_refresh = skip;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse YAML configuration with enhanced error reporting.
    ///
    /// Uses serde_yaml_ng to parse the YAML text, and includes line/column
    /// information in error messages. Unknown keys fail here.
    fn parse_yaml_with_path(path: &Path, text: &str) -> Result<Self, ConfigError> {
        serde_yaml_ng::from_str::<Self>(text).map_err(|e| {
            let msg = if let Some(loc) = e.location() {
                format!(
                    "yaml error at line {}, column {}: {}",
                    loc.line(),
                    loc.column(),
                    e
                )
            } else {
                format!("yaml error: {}", e)
            };

            ConfigError::Parse(path.to_path_buf(), msg)
        })
    }

    /// Structural validation independent of the environment.
    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for upstream in &self.upstreams {
            if upstream.id.trim().is_empty() {
                return Err(ConfigError::Invalid("upstream with empty id".to_string()));
            }
            if !seen.insert(upstream.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate upstream id '{}'",
                    upstream.id
                )));
            }
        }
        if self.call_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "call_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.refresh.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "refresh.concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the mandatory token signing secret from the environment.
    pub fn signing_secret(&self) -> Result<String, StartupError> {
        resolve_mandatory_env(&self.token_signing_secret_env)
    }

    /// Resolve the mandatory database connection string from the environment.
    pub fn database_url(&self) -> Result<String, StartupError> {
        resolve_mandatory_env(&self.store.database_url_env)
    }
}

fn resolve_mandatory_env(name: &str) -> Result<String, StartupError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| StartupError::MissingSecret(name.to_string()))
}

// Errors during configuration loading/parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to parse configuration content.
    ///
    /// Tuple fields:
    /// - 0: Path to the configuration file that failed to parse
    /// - 1: Error message from the underlying parser
    #[error("Failed to parse {0}: {1}")]
    Parse(PathBuf, String),

    /// Structurally invalid configuration.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
