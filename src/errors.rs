use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::server::persist::StoreError;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Missing secret: environment variable {0} is unset or empty")]
    MissingSecret(String),

    #[error("Store connection error: {0}")]
    StoreError(String),

    #[error("Other startup error: {0}")]
    Other(String),
}

/// Request-level error taxonomy for the gateway surface.
///
/// Every error a handler can surface to a caller is one of these kinds, and
/// each maps to exactly one status code. Upstream 4xx responses are not
/// errors at this layer; they are forwarded verbatim by the executor.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Caller's access set does not contain the target server.
    #[error("access denied")]
    AccessDenied,

    /// No such server id in the catalog.
    #[error("unknown server '{0}'")]
    UnknownServer(String),

    /// Server exists but advertises no such tool.
    #[error("unknown tool '{1}' on server '{0}'")]
    UnknownTool(String, String),

    /// Malformed request body or parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Request body exceeded the configured ceiling.
    #[error("request body too large")]
    PayloadTooLarge,

    /// The catalog has not been populated yet.
    #[error("catalog not ready")]
    CatalogNotReady,

    /// The persistent store could not be reached.
    #[error("store unavailable")]
    StoreUnavailable,

    /// Upstream connect failure or timeout.
    ///
    /// An upstream that answers with a 5xx is not an error at this layer:
    /// the executor forwards its body verbatim under a 502 status.
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),
}

impl GatewayError {
    /// Status code this error surfaces as.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::AccessDenied => StatusCode::FORBIDDEN,
            GatewayError::UnknownServer(_) | GatewayError::UnknownTool(_, _) => {
                StatusCode::NOT_FOUND
            }
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::CatalogNotReady | GatewayError::StoreUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::UpstreamUnreachable(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Short machine-readable kind label, used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::AccessDenied => "access_denied",
            GatewayError::UnknownServer(_) => "unknown_server",
            GatewayError::UnknownTool(_, _) => "unknown_tool",
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::PayloadTooLarge => "payload_too_large",
            GatewayError::CatalogNotReady => "catalog_not_ready",
            GatewayError::StoreUnavailable => "store_unavailable",
            GatewayError::UpstreamUnreachable(_) => "upstream_unreachable",
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(_) => GatewayError::StoreUnavailable,
            // A missing row is a data condition, not an outage; lookups stay
            // fail-closed.
            StoreError::NotFound => GatewayError::AccessDenied,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "is_error": true,
        }));
        (status, body).into_response()
    }
}
