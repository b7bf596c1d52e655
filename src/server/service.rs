//! HTTP service implementation - router assembly and server lifecycle.

use anyhow::Context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    server::{
        auth::identity_middleware,
        handlers::{admin, call, catalog, health, meta},
    },
    state::{ApplicationState, GatewayState},
};

/// CORS configuration for the gateway listener.
///
/// Allows specifying allowed origins for cross-origin requests.
/// Supports "*" for all origins or comma-separated list of specific origins.
#[derive(Debug, Clone, Default)]
pub struct Cors {
    /// Comma-separated list of allowed origins, or "*" for all origins.
    pub origins: String,
}

impl Cors {
    /// Creates a CorsLayer from the configuration.
    ///
    /// Parses the origins string and configures the layer appropriately:
    /// - "*" allows all origins
    /// - Comma-separated list allows specific origins
    ///
    /// # Returns
    /// A configured CorsLayer with permissive methods and headers
    pub fn into_layer(self) -> CorsLayer {
        use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin};

        let allow_origin = if self.origins.trim() == "*" {
            AllowOrigin::any()
        } else {
            // Parse comma-separated origins
            let origin_list: Vec<_> = self
                .origins
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.parse().ok())
                .collect();

            tracing::debug!(
                "Parsed CORS origins: {:?} from {:?}",
                origin_list,
                self.origins
            );

            if origin_list.is_empty() {
                tracing::warn!("No valid CORS origins specified, defaulting to allow all");
                AllowOrigin::any()
            } else if origin_list.len() == 1 {
                // For single origin, use exact matching
                AllowOrigin::exact(origin_list.into_iter().next().unwrap())
            } else {
                AllowOrigin::list(origin_list)
            }
        };

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_headers(AllowHeaders::any())
            .allow_methods(AllowMethods::any())
    }
}

/// Handler for the Prometheus metrics endpoint.
#[cfg(feature = "prometheus")]
pub async fn metrics_handler() -> axum::response::Response {
    crate::metrics::handler::make_metrics_response()
}

/// Assemble the route table over the shared state.
///
/// Static routes are registered before the path-parameter routes; the
/// deprecated flat call form shares the single-segment pattern with the
/// per-server tool listing, split by method.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let mut router = Router::new()
        .route("/openapi.json", get(catalog::openapi_doc))
        .route("/servers", get(catalog::list_servers))
        .route("/health", get(health::health))
        .route("/livez", get(health::livez))
        .route("/readyz", get(health::readyz))
        .route("/refresh", post(admin::refresh))
        .route("/meta/search_tools", post(meta::search_tools))
        .route("/meta/describe_tools", post(meta::describe_tools))
        .route("/meta/call_tool", post(meta::call_tool))
        .route(
            "/{server_id}",
            get(catalog::list_server_tools).post(call::call_tool_flat),
        )
        .route("/{server_id}/{tool_name}", post(call::call_tool));

    #[cfg(feature = "prometheus")]
    {
        router = router.route("/metrics", get(metrics_handler));
    }

    let cors = state
        .config
        .server
        .as_ref()
        .and_then(|s| s.cors.clone())
        .map(|origins| Cors { origins }.into_layer());

    router = router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            identity_middleware,
        ))
        .layer(DefaultBodyLimit::max(state.config.request_body_max_bytes))
        .layer(TraceLayer::new_for_http());
    if let Some(cors) = cors {
        router = router.layer(cors);
    }

    router.with_state(state)
}

/// Bind the listener and serve until shutdown.
///
/// Startup and shutdown are idempotent: the caller runs at most one gated
/// refresh before this point, and shutdown drains in-flight requests
/// before the store pool closes.
pub async fn start(state: Arc<GatewayState>) -> anyhow::Result<()> {
    let bind_address = state
        .config
        .server
        .as_ref()
        .and_then(|s| s.bind_address.clone())
        .unwrap_or_else(|| crate::server::constants::DEFAULT_BIND_ADDRESS.to_string());

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {bind_address}"))?;
    tracing::info!(%bind_address, "gateway listening");

    let router = build_router(state.clone());
    state.set_state(ApplicationState::Ready);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .context("serving")?;

    // Graceful shutdown drained in-flight requests; release the pool last.
    if let Some(db) = state.db() {
        db.close().await;
    }
    tracing::info!("gateway stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM and flip the lifecycle state so probes
/// start failing while the drain happens.
async fn shutdown_signal(state: Arc<GatewayState>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "could not install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining");
    state.set_state(ApplicationState::Terminating);
}
