/// Administrative handlers.
///
/// - `POST /refresh` - force a catalog rebuild
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use crate::catalog::refresh::refresh_catalog;
use crate::errors::GatewayError;
use crate::server::access::AccessResolver;
use crate::server::auth::UserIdentity;
use crate::state::GatewayState;

/// Force an out-of-band catalog refresh.
///
/// # Endpoint
/// `POST /refresh`
///
/// Admin only. Safe to invoke any number of times: runs serialise on the
/// catalog's refresh gate, and the final cache state depends only on the
/// upstreams and the persisted store.
///
/// # Returns
/// - 200 OK with a summary of the run
/// - 403 for non-admin callers
pub async fn refresh(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<UserIdentity>,
) -> Result<impl IntoResponse, GatewayError> {
    let start = Instant::now();
    tracing::debug!("API: POST /refresh");

    if !AccessResolver::is_admin(&identity) {
        return Err(GatewayError::AccessDenied);
    }

    let outcome = refresh_catalog(&state).await;
    tracing::info!(
        caller = %identity.email,
        succeeded = outcome.succeeded.len(),
        failed = outcome.failed.len(),
        "explicit refresh completed"
    );

    let latency_ms = start.elapsed().as_millis() as f64;
    crate::metrics::record_api_http("/refresh", "POST", 200, latency_ms);
    Ok((
        StatusCode::OK,
        Json(json!({
            "succeeded": outcome.succeeded,
            "failed": outcome.failed,
            "tools": outcome.total_tools,
        })),
    ))
}
