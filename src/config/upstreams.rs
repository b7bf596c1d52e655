//! Upstream descriptor configuration.
//!
//! This module defines the static descriptor table entries for the tool
//! servers the gateway aggregates. One entry per upstream, read at startup;
//! the credential is resolved from the environment and its absence disables
//! the upstream without failing the load.

use serde::{Deserialize, Serialize};
use url::Url;

use super::defaults;

/// Transport family of an upstream.
///
/// The tier is the single polymorphic point of the gateway: it selects the
/// discovery strategy and the invocation envelope. All tiers except
/// [`Tier::JsonRpc`] speak plain HTTP at our layer (SSE and child-process
/// upstreams sit behind HTTP facades maintained outside this process).
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    /// Direct REST upstream publishing an OpenAPI document.
    #[default]
    OpenApi,
    /// JSON-RPC 2.0 over streamable HTTP (`tools/list` / `tools/call`).
    JsonRpc,
    /// Server-Sent Events upstream, reached through its bridge's HTTP facade.
    Sse,
    /// Child-process tool server wrapped by a local HTTP bridge.
    ChildProcess,
    /// In-cluster HTTP container.
    Container,
}

impl Tier {
    /// Stable lowercase label used in logs, metrics, and the OpenAPI output.
    pub fn label(&self) -> &'static str {
        match self {
            Tier::OpenApi => "open-api",
            Tier::JsonRpc => "json-rpc",
            Tier::Sse => "sse",
            Tier::ChildProcess => "child-process",
            Tier::Container => "container",
        }
    }

    /// Whether invocation uses the JSON-RPC `tools/call` envelope rather
    /// than a plain `POST {endpoint}/{tool}`.
    pub fn is_rpc(&self) -> bool {
        matches!(self, Tier::JsonRpc)
    }
}

/// Upstream entry as configured by the user.
///
/// The `endpoint` is mandatory for every listed upstream. The bearer
/// credential is looked up in the environment: either the variable named by
/// `credential_env` or, when unset, `TOOLGATE_UPSTREAM_<ID>_CREDENTIAL`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamEntry {
    /// Stable slug identifying the server (`server_id` in the catalog).
    pub id: String,
    /// Friendly display name; defaults to the id.
    #[serde(default)]
    pub name: Option<String>,
    /// Human description shown in tool listings.
    #[serde(default)]
    pub description: Option<String>,
    /// Transport tier.
    #[serde(default)]
    pub tier: Tier,
    /// Base endpoint. For child-process upstreams this is the local bridge
    /// address.
    pub endpoint: Url,
    /// Environment variable holding the upstream bearer credential.
    #[serde(default)]
    pub credential_env: Option<String>,
    /// Groups granted access to this server by configuration, in addition
    /// to grants from the persistent store.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl UpstreamEntry {
    /// Name of the environment variable that carries this upstream's
    /// credential.
    pub fn credential_env_name(&self) -> String {
        match &self.credential_env {
            Some(name) => name.clone(),
            None => format!(
                "TOOLGATE_UPSTREAM_{}_CREDENTIAL",
                self.id.to_uppercase().replace('-', "_")
            ),
        }
    }

    /// Resolve the credential from the environment. Empty values count as
    /// absent; an absent credential disables the upstream.
    pub fn resolve_credential(&self) -> Option<String> {
        std::env::var(self.credential_env_name())
            .ok()
            .filter(|v| !v.trim().is_empty())
    }
}
