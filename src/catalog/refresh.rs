//! Catalog refresh engine.
//!
//! Rediscovers tools from every enabled upstream with a bounded fan-out,
//! then installs the result as one atomic snapshot swap. A slow or failing
//! upstream never blocks the others:
//!
//! - transport failures (connect error, timeout, error status) are retried
//!   with a fixed back-off, and on final failure the server's previous
//!   records are retained;
//! - an empty or malformed response replaces the server's records with the
//!   empty set;
//! - a duplicate tool name within one server rejects that server's whole
//!   batch, retaining its previous records.
//!
//! Embedding vectors are generated after the swap, best-effort, reusing
//! stored vectors for tools whose name and description did not change.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{FutureExt, StreamExt};

use crate::catalog::discovery::{DiscoveredServer, DiscoveryError, discover_server};
use crate::catalog::embedding::content_hash;
use crate::catalog::{CatalogSnapshot, ServerDescriptor, ToolKey};
use crate::config::RefreshConfig;
use crate::state::GatewayState;

/// Summary of one refresh run.
#[derive(Debug, Default)]
pub struct RefreshOutcome {
    /// Servers whose records were rebuilt from a fresh response.
    pub succeeded: Vec<String>,
    /// Servers that kept their previous records after final failure.
    pub failed: Vec<String>,
    /// Tool count of the installed snapshot.
    pub total_tools: usize,
}

/// Run a complete refresh and install the new snapshot.
///
/// Serialised by the catalog's refresh gate: a second caller blocks until
/// the in-flight refresh finishes, then runs its own. The startup refresh
/// and `POST /refresh` share this path.
pub async fn refresh_catalog(state: &GatewayState) -> RefreshOutcome {
    let _gate = state.catalog.refresh_gate.lock().await;
    let started = Instant::now();
    let previous = state.catalog.snapshot();

    let enabled: Vec<&ServerDescriptor> = state
        .servers
        .values()
        .filter(|d| d.enabled)
        .collect();
    tracing::info!(upstreams = enabled.len(), "starting catalog refresh");

    let refresh_cfg = &state.config.refresh;
    let client = &state.discovery_client;
    let mut futures_list: Vec<
        futures::future::BoxFuture<'_, (String, Result<DiscoveredServer, DiscoveryError>)>,
    > = Vec::new();
    for descriptor in enabled.into_iter() {
        futures_list.push(
            async move {
                let result = discover_with_retries(client, descriptor, refresh_cfg).await;
                (descriptor.server_id.clone(), result)
            }
            .boxed(),
        );
    }
    let results: Vec<(String, Result<DiscoveredServer, DiscoveryError>)> =
        futures::stream::iter(futures_list)
            .buffer_unordered(refresh_cfg.concurrency)
            .collect()
            .await;

    let mut outcome = RefreshOutcome::default();
    let mut snapshot = CatalogSnapshot::default();
    for (server_id, result) in results {
        match result {
            Ok(discovered) => {
                let mut tools = BTreeMap::new();
                for record in discovered.tools {
                    tools.insert(record.tool_name.clone(), record);
                }
                tracing::debug!(server = %server_id, tools = tools.len(), "discovered");
                snapshot.tools.insert(server_id.clone(), tools);
                if !discovered.schema_components.is_empty() {
                    snapshot
                        .schema_components
                        .insert(server_id.clone(), discovered.schema_components);
                }
                outcome.succeeded.push(server_id);
            }
            Err(e) => {
                tracing::warn!(server = %server_id, error = %e, "discovery failed, retaining previous records");
                if let Some(prev_tools) = previous.tools.get(&server_id) {
                    snapshot
                        .tools
                        .insert(server_id.clone(), prev_tools.clone());
                }
                if let Some(prev_components) = previous.schema_components.get(&server_id) {
                    snapshot
                        .schema_components
                        .insert(server_id.clone(), prev_components.clone());
                }
                outcome.failed.push(server_id);
            }
        }
    }
    outcome.succeeded.sort();
    outcome.failed.sort();
    outcome.total_tools = snapshot.tool_count();

    state.catalog.install(snapshot);
    let elapsed_ms = started.elapsed().as_millis() as f64;
    crate::metrics::record_refresh(outcome.succeeded.len(), outcome.failed.len(), elapsed_ms);
    tracing::info!(
        succeeded = outcome.succeeded.len(),
        failed = outcome.failed.len(),
        tools = outcome.total_tools,
        elapsed_ms,
        "catalog refresh installed"
    );

    generate_embeddings(state).await;

    outcome
}

/// Discover one upstream, retrying transport failures with a fixed back-off.
///
/// A malformed-but-delivered response is not retried: it deterministically
/// yields the empty set. A duplicate tool name rejects the batch outright.
async fn discover_with_retries(
    client: &reqwest::Client,
    descriptor: &ServerDescriptor,
    config: &RefreshConfig,
) -> Result<DiscoveredServer, DiscoveryError> {
    let mut attempt = 0;
    loop {
        let result = tokio::time::timeout(
            Duration::from_secs(config.timeout_seconds),
            discover_server(client, descriptor),
        )
        .await
        .unwrap_or(Err(DiscoveryError::Timeout));

        match result {
            Ok(discovered) => return Ok(discovered),
            Err(DiscoveryError::Malformed(reason)) => {
                tracing::warn!(
                    server = %descriptor.server_id,
                    %reason,
                    "malformed descriptor, replacing with empty set"
                );
                return Ok(DiscoveredServer::default());
            }
            Err(e @ DiscoveryError::DuplicateTool(_)) => return Err(e),
            Err(e) => {
                if attempt >= config.retries {
                    return Err(e);
                }
                attempt += 1;
                tracing::debug!(
                    server = %descriptor.server_id,
                    attempt,
                    error = %e,
                    "retrying discovery"
                );
                tokio::time::sleep(Duration::from_secs(config.retry_delay_seconds)).await;
            }
        }
    }
}

/// Attach embedding vectors to the freshly installed snapshot.
///
/// Best-effort throughout: stored vectors are reused when the content hash
/// matches, new vectors come from the provider one call at a time, and any
/// failure just leaves that tool without a vector (the search falls back to
/// substring ranking for it).
async fn generate_embeddings(state: &GatewayState) {
    let Some(provider) = &state.embedder else {
        return;
    };
    let snapshot = state.catalog.snapshot();
    let entries: Vec<(ToolKey, String, String)> = snapshot
        .tools
        .values()
        .flat_map(|tools| tools.values())
        .map(|record| {
            let text = record.embedding_text();
            let hash = content_hash(&text);
            (record.key(), text, hash)
        })
        .collect();
    if entries.is_empty() {
        return;
    }

    let keys: Vec<ToolKey> = entries.iter().map(|(k, _, _)| k.clone()).collect();
    let mut stored: HashMap<ToolKey, (String, Vec<f32>)> = HashMap::new();
    if let Some(db) = state.db() {
        match db.embeddings_for_keys(&keys).await {
            Ok(rows) => {
                for row in rows {
                    stored.insert(
                        (row.server_id, row.tool_name),
                        (row.content_hash, row.vector),
                    );
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not read stored embeddings");
            }
        }
    }

    let dim = provider.dim();
    let mut map: HashMap<ToolKey, Arc<Vec<f32>>> = HashMap::new();
    let mut generated = 0usize;
    for (key, text, hash) in entries {
        if let Some((stored_hash, vector)) = stored.remove(&key)
            && stored_hash == hash
            && vector.len() == dim
        {
            map.insert(key, Arc::new(vector));
            continue;
        }
        match provider.embed(&text).await {
            Ok(vector) if vector.len() == dim => {
                if let Some(db) = state.db()
                    && let Err(e) = db.upsert_embedding(&key.0, &key.1, &hash, &vector).await
                {
                    tracing::debug!(error = %e, "embedding upsert skipped");
                }
                map.insert(key, Arc::new(vector));
                generated += 1;
            }
            Ok(vector) => {
                tracing::warn!(
                    server = %key.0,
                    tool = %key.1,
                    got = vector.len(),
                    expected = dim,
                    "discarding embedding with unexpected dimension"
                );
            }
            Err(e) => {
                tracing::warn!(server = %key.0, tool = %key.1, error = %e, "embedding failed");
            }
        }
    }

    let attached = map.len();
    state.catalog.install_embeddings(map);
    tracing::debug!(attached, generated, "embeddings installed");
}
