/// Toolgate configuration components module.
///
/// This module defines user-facing configuration structures for the gateway.
/// It provides the building blocks for the root `GatewayConfig` in `mod.rs`.
use super::defaults;
use serde::{Deserialize, Serialize};

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpEndpointConfig {
    /// CORS allowed origins ("*" or comma-separated list).
    #[serde(default = "defaults::default_cors")]
    pub cors: Option<String>,

    /// Bind address for the gateway listener.
    #[serde(default = "defaults::default_bind_address_opt")]
    pub bind_address: Option<String>,
}

impl Default for HttpEndpointConfig {
    fn default() -> Self {
        Self {
            cors: defaults::default_cors(),
            bind_address: defaults::default_bind_address_opt(),
        }
    }
}

/// Refresh engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefreshConfig {
    /// Per-upstream discovery timeout in seconds.
    #[serde(default = "defaults::default_refresh_timeout")]
    pub timeout_seconds: u64,

    /// How many times a failing upstream discovery is retried.
    #[serde(default = "defaults::default_refresh_retries")]
    pub retries: u32,

    /// Fixed back-off between retries, in seconds.
    #[serde(default = "defaults::default_refresh_retry_delay")]
    pub retry_delay_seconds: u64,

    /// Skip the gated refresh normally run before the listener starts.
    #[serde(default = "defaults::default_false")]
    pub skip_startup_refresh: bool,

    /// Bounded fan-out width for concurrent discovery.
    #[serde(default = "defaults::default_refresh_concurrency")]
    pub concurrency: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: defaults::default_refresh_timeout(),
            retries: defaults::default_refresh_retries(),
            retry_delay_seconds: defaults::default_refresh_retry_delay(),
            skip_startup_refresh: defaults::default_false(),
            concurrency: defaults::default_refresh_concurrency(),
        }
    }
}

/// Embedding provider configuration (OpenAI-compatible `/v1/embeddings`).
///
/// Optional: when absent the meta-tools search falls back to substring
/// ranking and no vectors are generated during refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Full URL of the embeddings endpoint.
    pub endpoint: String,

    /// Model identifier sent with each request.
    pub model: String,

    /// Environment variable holding the provider API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Expected vector dimension; mismatched vectors are discarded.
    #[serde(default = "defaults::default_embedding_dim")]
    pub dim: usize,

    /// Request timeout in seconds.
    #[serde(default = "defaults::default_embedding_timeout")]
    pub timeout_seconds: u64,
}

impl EmbeddingConfig {
    /// Resolve the API key from the environment; empty counts as absent.
    pub fn resolve_api_key(&self) -> Option<String> {
        let name = self.api_key_env.as_deref().unwrap_or("TOOLGATE_EMBEDDING_API_KEY");
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }
}

/// Persistent store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Environment variable holding the Postgres connection string.
    #[serde(default = "defaults::default_database_url_env")]
    pub database_url_env: String,

    /// Maximum connections in the shared pool.
    #[serde(default = "defaults::default_pool_size")]
    pub pool_size: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url_env: defaults::default_database_url_env(),
            pool_size: defaults::default_pool_size(),
        }
    }
}
