//! Toolgate entry point.
//!
//! This binary wires together the gateway: configuration loading, state
//! initialization, the persistent store pool, the gated startup refresh,
//! and the HTTP listener.
//!
//! # Application Lifecycle
//!
//! The server follows a structured initialization sequence:
//! 1. **Unknown** → Parse CLI args and initialize state
//! 2. **Initializing** → Load configuration, resolve secrets
//! 3. **ConnectingStore** → Create the shared store pool
//! 4. **RefreshingCatalog** → Run the gated startup refresh (unless skipped)
//! 5. **StartingNetwork** → Bind the listener
//! 6. **Ready** → Gateway is fully operational
//! 7. **Terminating** → Gateway is shutting down

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::fmt;

use toolgate::catalog::refresh::refresh_catalog;
use toolgate::config::GatewayConfig;
use toolgate::server::persist::Database;
use toolgate::server::service::start;
use toolgate::state::{ApplicationState, GatewayState};

/// CLI arguments definition for the gateway.
///
/// This struct defines all command-line arguments and environment variables
/// supported by the server. Field documentation is used by Clap to generate
/// help text, so keep them in rustdoc format.
#[derive(Parser, Debug, Clone)]
#[command(name = "toolgate", version, about = "Multi-tenant tool gateway", long_about = None)]
struct Args {
    /// Config file path (overrides default path and TOOLGATE_CONFIG_PATH)
    #[arg(long = "config-file", value_name = "FILE", env = "TOOLGATE_CONFIG_PATH")]
    config_file: Option<std::path::PathBuf>,

    /// Listener bind address override (optional)
    #[arg(
        long = "bind-address",
        value_name = "BIND_ADDRESS",
        env = "TOOLGATE_BIND_ADDRESS",
        required = false
    )]
    bind_address: Option<String>,

    /// Expose only the meta-tools surface (CLI override)
    #[arg(
        long = "meta-tools",
        value_name = "META_TOOLS",
        env = "TOOLGATE_META_TOOLS",
        required = false
    )]
    meta_tools: Option<bool>,

    /// Skip the gated startup refresh (CLI override)
    #[arg(
        long = "skip-startup-refresh",
        value_name = "SKIP_STARTUP_REFRESH",
        env = "TOOLGATE_SKIP_STARTUP_REFRESH",
        required = false
    )]
    skip_startup_refresh: Option<bool>,
}

/// Main entry point for the gateway.
///
/// # Returns
/// - `Ok(())` if the server starts and runs successfully
/// - `Err(anyhow::Error)` if initialization or execution fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let fmt_layer = fmt::layer().with_target(false).compact();
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(tracing_subscriber::filter::EnvFilter::new(env_filter))
        .init();

    // Load configuration from file, environment, and CLI overrides
    let config = GatewayConfig::load_with_overrides(
        args.config_file.clone(),
        args.bind_address.clone(),
        args.meta_tools,
        args.skip_startup_refresh,
    )?;

    // Mandatory secrets fail fast before anything else starts.
    let signing_secret = config.signing_secret()?;
    let database_url = config.database_url()?;

    let state = Arc::new(GatewayState::new(config, &signing_secret)?);
    state.set_state(ApplicationState::Initializing);
    tracing::debug!("Early init completed");

    // Initialize metrics collection if enabled
    toolgate::metrics::init();

    // Create the shared store pool. The pool connects lazily, so a store
    // outage at boot degrades to per-request 503s instead of a crash loop.
    state.set_state(ApplicationState::ConnectingStore);
    let database = Database::connect(&database_url, state.config.store.pool_size)?;
    state.set_database(Arc::new(database));

    // Gated startup refresh: exactly one run, unless explicitly skipped.
    if state.config.refresh.skip_startup_refresh {
        tracing::warn!("startup refresh skipped; catalog is empty until POST /refresh");
    } else {
        state.set_state(ApplicationState::RefreshingCatalog);
        let outcome = refresh_catalog(&state).await;
        tracing::info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            tools = outcome.total_tools,
            "startup refresh completed"
        );
    }

    // Start the listener
    state.set_state(ApplicationState::StartingNetwork);
    match start(state).await {
        Ok(_) => tracing::debug!("Server has exited"),
        Err(e) => tracing::error!("Server execution failed: {:?}", e),
    }

    Ok(())
}
