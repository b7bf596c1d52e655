//! Persistent storage adapter for the gateway.
//!
//! [`AccessStore`] is the read surface the rest of the gateway programs
//! against: user group membership, group to server grants, admin flags,
//! tenant-keyed credentials and endpoint overrides, the external identity
//! table mapping user ids to emails, and the bulk embedding read. The one
//! write, `upsert_embedding`, belongs to the refresh engine so vectors
//! survive restarts; the access-control tables stay read-only.
//!
//! [`Database`] is the production backend: a shared Postgres pool with an
//! independent per-query timeout. Tests substitute their own in-memory
//! implementation of the trait.
//!
//! A missing row is never confused with an outage: lookups return
//! `Ok(None)` / empty collections, and only transport or pool failures
//! surface as [`StoreError::Unavailable`].

pub mod models;

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use thiserror::Error;

use models::EmbeddingRow;
pub use models::StoredEmbedding;

use crate::catalog::ToolKey;

/// Upper bound for any single store query.
const DB_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced by the store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached, the pool was exhausted, or the
    /// query timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The requested row does not exist.
    #[error("row not found")]
    NotFound,
}

/// Read operations the gateway performs against shared storage.
#[async_trait]
pub trait AccessStore: Send + Sync {
    /// Groups the user belongs to.
    async fn groups_for_user(&self, email: &str) -> Result<Vec<String>, StoreError>;

    /// Server ids permitted for any of the given groups.
    async fn servers_for_groups(&self, groups: &[String]) -> Result<Vec<String>, StoreError>;

    /// Whether the user carries the admin flag. The backing table is
    /// maintained by the external identity store; an absent row simply
    /// means "not admin".
    async fn is_admin(&self, email: &str) -> Result<bool, StoreError>;

    /// Servers granted directly to the user, bypassing groups.
    async fn direct_servers_for_user(&self, email: &str) -> Result<Vec<String>, StoreError>;

    /// Tenant-keyed credential override, or `None` when the tenant carries
    /// no override for this server/key.
    async fn tenant_credential(
        &self,
        tenant_id: &str,
        server_id: &str,
        key_name: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Tenant-keyed endpoint override, or `None`.
    async fn tenant_endpoint(
        &self,
        tenant_id: &str,
        server_id: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Email for an external identity-store user id.
    async fn email_for_user_id(&self, user_id: &str) -> Result<Option<String>, StoreError>;

    /// Bulk read of stored embeddings for a set of tool keys.
    async fn embeddings_for_keys(
        &self,
        keys: &[ToolKey],
    ) -> Result<Vec<StoredEmbedding>, StoreError>;

    /// Store one freshly generated embedding. Best-effort: callers log and
    /// continue on failure.
    async fn upsert_embedding(
        &self,
        server_id: &str,
        tool_name: &str,
        content_hash: &str,
        vector: &[f32],
    ) -> Result<(), StoreError>;

    /// Release backend resources at shutdown. Default: nothing to release.
    async fn close(&self) {}
}

/// Postgres-backed [`AccessStore`] over a shared connection pool.
///
/// Cloning is cheap; all clones share the same pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create the shared pool.
    ///
    /// The pool connects lazily: startup succeeds with the store down, and
    /// the outage surfaces per-query as [`StoreError::Unavailable`], which
    /// callers translate into fail-closed access decisions or 503s.
    pub fn connect(url: &str, pool_size: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(DB_QUERY_TIMEOUT)
            .connect_lazy(url)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessStore for Database {
    async fn groups_for_user(&self, email: &str) -> Result<Vec<String>, StoreError> {
        run(sqlx::query_scalar::<_, String>(
            "SELECT group_name FROM gateway.user_groups WHERE user_email = $1",
        )
        .bind(email)
        .fetch_all(&self.pool))
        .await
    }

    async fn servers_for_groups(&self, groups: &[String]) -> Result<Vec<String>, StoreError> {
        if groups.is_empty() {
            return Ok(Vec::new());
        }
        run(sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT server_id FROM gateway.group_servers WHERE group_name = ANY($1)",
        )
        .bind(groups)
        .fetch_all(&self.pool))
        .await
    }

    async fn is_admin(&self, email: &str) -> Result<bool, StoreError> {
        let count = run(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM gateway.admin_users WHERE user_email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool))
        .await?;
        Ok(count > 0)
    }

    async fn direct_servers_for_user(&self, email: &str) -> Result<Vec<String>, StoreError> {
        run(sqlx::query_scalar::<_, String>(
            "SELECT server_id FROM gateway.user_servers WHERE user_email = $1",
        )
        .bind(email)
        .fetch_all(&self.pool))
        .await
    }

    async fn tenant_credential(
        &self,
        tenant_id: &str,
        server_id: &str,
        key_name: &str,
    ) -> Result<Option<String>, StoreError> {
        run(sqlx::query_scalar::<_, String>(
            "SELECT secret_value FROM gateway.tenant_credentials \
             WHERE tenant_id = $1 AND server_id = $2 AND key_name = $3",
        )
        .bind(tenant_id)
        .bind(server_id)
        .bind(key_name)
        .fetch_optional(&self.pool))
        .await
    }

    async fn tenant_endpoint(
        &self,
        tenant_id: &str,
        server_id: &str,
    ) -> Result<Option<String>, StoreError> {
        run(sqlx::query_scalar::<_, String>(
            "SELECT endpoint FROM gateway.tenant_endpoints \
             WHERE tenant_id = $1 AND server_id = $2",
        )
        .bind(tenant_id)
        .bind(server_id)
        .fetch_optional(&self.pool))
        .await
    }

    async fn email_for_user_id(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let row = run(sqlx::query("SELECT email FROM identity.users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool))
        .await?;
        Ok(row.map(|r| r.get::<String, _>("email")))
    }

    async fn embeddings_for_keys(
        &self,
        keys: &[ToolKey],
    ) -> Result<Vec<StoredEmbedding>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let servers: Vec<String> = keys.iter().map(|(s, _)| s.clone()).collect();
        let tools: Vec<String> = keys.iter().map(|(_, t)| t.clone()).collect();
        let rows = run(sqlx::query_as::<_, EmbeddingRow>(
            "SELECT server_id, tool_name, content_hash, vector \
             FROM gateway.tool_embeddings \
             WHERE (server_id, tool_name) IN (SELECT * FROM unnest($1::text[], $2::text[]))",
        )
        .bind(&servers)
        .bind(&tools)
        .fetch_all(&self.pool))
        .await?;
        Ok(rows.into_iter().map(StoredEmbedding::from).collect())
    }

    async fn upsert_embedding(
        &self,
        server_id: &str,
        tool_name: &str,
        content_hash: &str,
        vector: &[f32],
    ) -> Result<(), StoreError> {
        run(sqlx::query(
            "INSERT INTO gateway.tool_embeddings (server_id, tool_name, content_hash, vector) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (server_id, tool_name) \
             DO UPDATE SET content_hash = $3, vector = $4",
        )
        .bind(server_id)
        .bind(tool_name)
        .bind(content_hash)
        .bind(Json(vector.to_vec()))
        .execute(&self.pool))
        .await?;
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Apply the shared query timeout and map transport failures.
async fn run<T>(fut: impl Future<Output = Result<T, sqlx::Error>>) -> Result<T, StoreError> {
    match tokio::time::timeout(DB_QUERY_TIMEOUT, fut).await {
        Err(_) => Err(StoreError::Unavailable("query timed out".to_string())),
        Ok(Ok(value)) => Ok(value),
        Ok(Err(sqlx::Error::RowNotFound)) => Err(StoreError::NotFound),
        Ok(Err(e)) => Err(StoreError::Unavailable(e.to_string())),
    }
}
