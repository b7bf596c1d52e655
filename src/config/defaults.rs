/// Toolgate configuration defaults module.
///
/// Default value helpers for serde deserialization in config structs. These
/// functions keep defaulting consistent between `components.rs` and `mod.rs`,
/// including the case where entire config blocks are missing from the file.

/// Default true value.
pub(crate) fn default_true() -> bool {
    true
}

/// Default false value.
pub(crate) fn default_false() -> bool {
    false
}

/// Default CORS configuration.
///
/// Returns `None` to indicate no CORS configuration.
pub(crate) fn default_cors() -> Option<String> {
    None
}

/// Default gateway bind address as an option.
pub(crate) fn default_bind_address_opt() -> Option<String> {
    Some(crate::server::constants::DEFAULT_BIND_ADDRESS.to_string())
}

/// Environment variable holding the token signing secret.
pub(crate) fn default_signing_secret_env() -> String {
    "TOOLGATE_TOKEN_SIGNING_SECRET".to_string()
}

/// Environment variable holding the database connection string.
pub(crate) fn default_database_url_env() -> String {
    "TOOLGATE_DATABASE_URL".to_string()
}

/// Per-upstream discovery timeout in seconds.
pub(crate) fn default_refresh_timeout() -> u64 {
    10
}

/// Discovery retry count per upstream.
pub(crate) fn default_refresh_retries() -> u32 {
    3
}

/// Fixed delay between discovery retries, in seconds.
pub(crate) fn default_refresh_retry_delay() -> u64 {
    5
}

/// Bounded fan-out width for concurrent upstream discovery.
pub(crate) fn default_refresh_concurrency() -> usize {
    8
}

/// Tool call timeout in seconds.
pub(crate) fn default_call_timeout() -> u64 {
    30
}

/// Request body ceiling in bytes (1 MiB).
pub(crate) fn default_request_body_max_bytes() -> usize {
    1024 * 1024
}

/// Access decision cache TTL in seconds.
pub(crate) fn default_access_cache_ttl() -> u64 {
    60
}

/// Embedding vector dimension (OpenAI `text-embedding-3-small`).
pub(crate) fn default_embedding_dim() -> usize {
    1536
}

/// Embedding request timeout in seconds.
pub(crate) fn default_embedding_timeout() -> u64 {
    10
}

/// Maximum DB connections in the shared pool.
pub(crate) fn default_pool_size() -> u32 {
    10
}
