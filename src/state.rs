/// The application state is responsible for:
///
/// - Maintaining the lifecycle state of the gateway
/// - Hosting the tool catalog, access resolver, and shared clients
use std::collections::BTreeMap;
use std::sync::{
    Arc, RwLock,
    atomic::{AtomicU8, Ordering},
};
use std::time::Duration;

use crate::catalog::embedding::{EmbeddingProvider, HttpEmbeddingProvider};
use crate::catalog::{ServerDescriptor, ToolCatalog};
use crate::config::GatewayConfig;
use crate::errors::StartupError;
use crate::server::access::AccessResolver;
use crate::server::auth::IdentityResolver;
use crate::server::persist::AccessStore;
use crate::server::routing::Executor;

use tracing::debug;

/** Application lifecycle states. */
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ApplicationState {
    /// Unknown state, typically the initial state.
    Unknown = 0,
    /// The application is initializing.
    Initializing = 1,
    /// Connecting the persistent store pool.
    ConnectingStore = 2,
    /// Running the gated startup refresh.
    RefreshingCatalog = 3,
    /// Starting network services.
    StartingNetwork = 4,
    /// The application is ready to serve requests.
    Ready = 5,
    /// The application is terminating.
    Terminating = 6,
}

// Shared state of the gateway process.
//
// Everything here is acquired once at startup and shared across requests:
// the immutable server descriptor table, the swap-on-refresh tool catalog,
// the TTL'd access cache, the token resolver, and the egress clients. The
// store handle is the only slot filled in after construction, mirroring
// the startup sequence.
pub struct GatewayState {
    /// Current application lifecycle state.
    pub state: AtomicU8,
    /// Immutable configuration record.
    pub config: GatewayConfig,
    /// Descriptor per configured upstream, keyed by server id. Immutable
    /// after load; `enabled` was computed from the environment.
    pub servers: BTreeMap<String, ServerDescriptor>,
    /// Discovered tool catalog.
    pub catalog: ToolCatalog,
    /// Access decisions with TTL cache.
    pub access: AccessResolver,
    /// Bearer token validation.
    pub identity: IdentityResolver,
    /// Egress executor for tool calls.
    pub executor: Executor,
    /// Egress client for discovery (shorter timeout than tool calls).
    pub discovery_client: reqwest::Client,
    /// Embedding provider; `None` disables semantic ranking.
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    /// Store handle (optional until startup connects it, and in tests).
    pub database: RwLock<Option<Arc<dyn AccessStore>>>,
}

impl GatewayState {
    /// Build the state from configuration, resolving upstream credentials
    /// from the environment.
    pub fn new(config: GatewayConfig, signing_secret: &str) -> Result<Self, StartupError> {
        let servers: BTreeMap<String, ServerDescriptor> = config
            .upstreams
            .iter()
            .map(|entry| (entry.id.clone(), ServerDescriptor::from_entry(entry)))
            .collect();
        Self::with_servers(config, signing_secret, servers)
    }

    /// Build the state with an explicit descriptor table (tests inject
    /// descriptors directly instead of going through the environment).
    pub fn with_servers(
        config: GatewayConfig,
        signing_secret: &str,
        servers: BTreeMap<String, ServerDescriptor>,
    ) -> Result<Self, StartupError> {
        for descriptor in servers.values() {
            if !descriptor.enabled {
                tracing::warn!(
                    server = %descriptor.server_id,
                    "upstream disabled: credential not present in environment"
                );
            }
        }

        let discovery_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.refresh.timeout_seconds))
            .build()
            .map_err(|e| StartupError::Other(format!("discovery client: {e}")))?;

        let executor = Executor::new(Duration::from_secs(config.call_timeout_seconds))?;

        let embedder: Option<Arc<dyn EmbeddingProvider>> = match &config.embedding {
            Some(embedding_config) => Some(Arc::new(
                HttpEmbeddingProvider::new(embedding_config)
                    .map_err(|e| StartupError::Other(format!("embedding client: {e}")))?,
            )),
            None => None,
        };

        Ok(Self {
            state: AtomicU8::new(ApplicationState::Unknown as u8),
            access: AccessResolver::new(Duration::from_secs(config.access_cache_ttl_seconds)),
            identity: IdentityResolver::new(signing_secret),
            catalog: ToolCatalog::new(),
            servers,
            executor,
            discovery_client,
            embedder,
            database: RwLock::new(None),
            config,
        })
    }

    /// Set application lifecycle state.
    pub fn set_state(&self, value: ApplicationState) {
        let v = value as u8;
        debug!("Application state changed to {:?}", v);
        self.state.store(v, Ordering::Relaxed);
    }

    /// Returns true if the application is running (liveness check).
    pub fn is_alive(&self) -> bool {
        let state = self.state.load(Ordering::SeqCst);
        state >= ApplicationState::Initializing as u8 && state < ApplicationState::Terminating as u8
    }

    /// Returns true if the application is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::SeqCst) >= ApplicationState::Ready as u8
    }

    /// Install the store handle.
    pub fn set_database(&self, database: Arc<dyn AccessStore>) {
        if let Ok(mut w) = self.database.write() {
            *w = Some(database);
        }
    }

    /// Clone of the store handle, if connected. Cheap: the backend is
    /// shared behind the `Arc`.
    pub fn db(&self) -> Option<Arc<dyn AccessStore>> {
        self.database
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().cloned())
    }
}
