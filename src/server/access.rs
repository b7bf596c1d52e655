//! Access resolution: from a caller identity to the set of server ids the
//! caller may see and invoke.
//!
//! Per-tool authorisation is derived from per-server authorisation: a tool
//! is visible and callable iff its server is in the caller's permitted set.
//! Decisions are cached in a bounded TTL cache keyed by
//! `(email, sorted groups)` so group changes propagate within the TTL
//! without manual invalidation. Admin decisions are computed fresh so an
//! admin always sees exactly the servers enabled at the moment of the
//! request.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::catalog::ServerDescriptor;
use crate::server::auth::UserIdentity;
use crate::server::persist::{AccessStore, StoreError};

/// Group whose members implicitly map to every enabled server.
pub const ADMIN_GROUP: &str = "MCP-Admin";

/// Bound on distinct `(email, groups)` entries held at once.
const ACCESS_CACHE_CAPACITY: u64 = 10_000;

/// Resolves and caches per-caller access sets.
pub struct AccessResolver {
    cache: Cache<String, Arc<BTreeSet<String>>>,
}

impl AccessResolver {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(ACCESS_CACHE_CAPACITY)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Whether the caller holds the admin role (flag or admin group).
    pub fn is_admin(identity: &UserIdentity) -> bool {
        identity.admin || identity.groups.contains(ADMIN_GROUP)
    }

    /// The set of server ids this caller may see.
    ///
    /// Algorithm, in priority order: admin short-circuits to all enabled
    /// servers; otherwise the union of group grants (persisted and
    /// config-declared) and direct user grants, intersected with the
    /// enabled set.
    ///
    /// `Err(Unavailable)` means the store could not answer; callers fail
    /// closed (calls) or surface 503 (listings).
    pub async fn permitted_servers(
        &self,
        identity: &UserIdentity,
        db: Option<&dyn AccessStore>,
        servers: &BTreeMap<String, ServerDescriptor>,
    ) -> Result<Arc<BTreeSet<String>>, StoreError> {
        let enabled: BTreeSet<String> = servers
            .values()
            .filter(|d| d.enabled)
            .map(|d| d.server_id.clone())
            .collect();

        if Self::is_admin(identity) {
            return Ok(Arc::new(enabled));
        }
        if identity.is_anonymous() {
            return Ok(Arc::new(BTreeSet::new()));
        }

        let key = identity.cache_key();
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(hit);
        }

        let mut permitted = BTreeSet::new();

        // Config-declared group grants.
        for descriptor in servers.values() {
            if descriptor
                .default_groups
                .iter()
                .any(|g| identity.groups.contains(g))
            {
                permitted.insert(descriptor.server_id.clone());
            }
        }

        // Persisted grants: union over the caller's groups, plus direct
        // per-user grants.
        let db = db.ok_or_else(|| StoreError::Unavailable("store not configured".to_string()))?;
        let groups: Vec<String> = identity.groups.iter().cloned().collect();
        permitted.extend(db.servers_for_groups(&groups).await?);
        if !identity.email.is_empty() {
            permitted.extend(db.direct_servers_for_user(&identity.email).await?);
        }

        // Only currently enabled servers survive.
        permitted.retain(|id| enabled.contains(id));

        let permitted = Arc::new(permitted);
        self.cache.insert(key, permitted.clone()).await;
        Ok(permitted)
    }

    /// Boolean decision for one specific server.
    pub async fn can_access(
        &self,
        identity: &UserIdentity,
        db: Option<&dyn AccessStore>,
        servers: &BTreeMap<String, ServerDescriptor>,
        server_id: &str,
    ) -> Result<bool, StoreError> {
        let permitted = self.permitted_servers(identity, db, servers).await?;
        Ok(permitted.contains(server_id))
    }

    /// Drop all cached decisions (tests and explicit refresh).
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}
