//! Identity resolution.
//!
//! Materialises a [`UserIdentity`] for each inbound request. Resolution
//! never fails the request: whatever goes wrong, the caller proceeds with
//! the degenerate identity (empty email, no groups, not admin) and the
//! access resolver denies from there. Refusing unsigned traffic outright is
//! the outer edge's job, not this layer's.
//!
//! Sources, in priority order:
//! 1. Trust-boundary headers, when the edge marks the request validated.
//! 2. Bearer token on the `Authorization` header.
//! 3. The same bearer token carried in a session cookie.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::server::persist::AccessStore;
use crate::state::GatewayState;

/// Marker header set by the edge after it validated the caller.
pub const EDGE_VALIDATED_HEADER: &str = "x-edge-validated";
/// Caller email, trusted only alongside the validation marker.
pub const EDGE_EMAIL_HEADER: &str = "x-user-email";
/// Comma-separated group list.
pub const EDGE_GROUPS_HEADER: &str = "x-user-groups";
/// Admin flag ("true"/"1").
pub const EDGE_ADMIN_HEADER: &str = "x-user-admin";
/// Optional display name.
pub const EDGE_NAME_HEADER: &str = "x-user-name";

/// Cookie carrying the bearer token for browser clients.
pub const SESSION_COOKIE: &str = "toolgate_token";

/// The caller, as far as this request is concerned.
///
/// Request-scoped; never persisted. Emails are lower-cased before any
/// lookup, groups compare case-sensitively and are deduplicated.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct UserIdentity {
    /// Lower-cased email; empty for the degenerate identity.
    pub email: String,
    /// Deduplicated group names (set order is the sorted order).
    pub groups: BTreeSet<String>,
    /// Admin flag from the edge or the user-role lookup.
    pub admin: bool,
    /// Optional display name, informational only.
    pub name: Option<String>,
}

impl UserIdentity {
    /// The degenerate identity: no email, no groups, not admin.
    pub fn anonymous() -> Self {
        Self {
            email: String::new(),
            groups: BTreeSet::new(),
            admin: false,
            name: None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.email.is_empty() && self.groups.is_empty() && !self.admin
    }

    /// Cache key for access decisions: email plus sorted groups.
    pub fn cache_key(&self) -> String {
        let mut key = self.email.clone();
        key.push('|');
        for (i, group) in self.groups.iter().enumerate() {
            if i > 0 {
                key.push(',');
            }
            key.push_str(group);
        }
        key
    }
}

/// Claims carried by the shared-secret bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// External identity-store user id.
    #[serde(default)]
    pub sub: Option<String>,
    /// Email, when the issuer includes it directly.
    #[serde(default)]
    pub email: Option<String>,
    /// Expiry, validated during decode.
    pub exp: u64,
}

/// Validates bearer tokens with the shared symmetric secret.
///
/// A single algorithm (HS256) is accepted; anything else fails validation
/// and the caller degrades to the anonymous identity.
pub struct IdentityResolver {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl IdentityResolver {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Decode and verify a token. `None` on any signature, shape, or
    /// expiry problem.
    pub fn decode(&self, token: &str) -> Option<TokenClaims> {
        match decode::<TokenClaims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!(error = %e, "bearer token rejected");
                None
            }
        }
    }
}

/// Resolve the caller identity for one request.
pub async fn resolve_identity(
    resolver: &IdentityResolver,
    db: Option<&dyn AccessStore>,
    headers: &HeaderMap,
) -> UserIdentity {
    // 1. Edge-validated headers are authoritative when present.
    if header_is_true(headers, EDGE_VALIDATED_HEADER) {
        return identity_from_edge_headers(headers);
    }

    // 2./3. Bearer token from the Authorization header, else the cookie.
    let token = bearer_from_headers(headers).or_else(|| bearer_from_cookie(headers));
    let Some(token) = token else {
        return UserIdentity::anonymous();
    };
    let Some(claims) = resolver.decode(&token) else {
        return UserIdentity::anonymous();
    };

    identity_from_claims(claims, db).await
}

/// Build the identity from trusted edge headers.
fn identity_from_edge_headers(headers: &HeaderMap) -> UserIdentity {
    let email = header_str(headers, EDGE_EMAIL_HEADER)
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    let groups: BTreeSet<String> = header_str(headers, EDGE_GROUPS_HEADER)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect();
    let admin = header_is_true(headers, EDGE_ADMIN_HEADER);
    let name = header_str(headers, EDGE_NAME_HEADER).map(str::to_string);
    UserIdentity {
        email,
        groups,
        admin,
        name,
    }
}

/// Complete the identity from validated token claims, using the store for
/// email lookup, group membership, and the admin flag. Store outages
/// degrade the identity instead of failing the request.
async fn identity_from_claims(claims: TokenClaims, db: Option<&dyn AccessStore>) -> UserIdentity {
    let mut email = claims.email.unwrap_or_default().trim().to_lowercase();
    if email.is_empty()
        && let (Some(sub), Some(db)) = (&claims.sub, db)
    {
        match db.email_for_user_id(sub).await {
            Ok(Some(found)) => email = found.trim().to_lowercase(),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "identity email lookup failed"),
        }
    }
    if email.is_empty() {
        return UserIdentity::anonymous();
    }

    let mut groups = BTreeSet::new();
    let mut admin = false;
    if let Some(db) = db {
        match db.groups_for_user(&email).await {
            Ok(found) => groups.extend(found),
            Err(e) => tracing::warn!(error = %e, "group lookup failed, continuing without groups"),
        }
        match db.is_admin(&email).await {
            Ok(flag) => admin = flag,
            Err(e) => tracing::warn!(error = %e, "admin lookup failed, continuing as non-admin"),
        }
    }

    UserIdentity {
        email,
        groups,
        admin,
        name: None,
    }
}

/// Identity middleware: resolves the caller once per request and stores it
/// in request extensions for the handlers.
pub async fn identity_middleware(
    State(state): State<Arc<GatewayState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let db = state.db();
    let identity = resolve_identity(&state.identity, db.as_deref(), req.headers()).await;
    if !identity.is_anonymous() {
        tracing::debug!(email = %identity.email, groups = identity.groups.len(), "caller resolved");
    }
    req.extensions_mut().insert(identity);
    next.run(req).await
}

// ------------------------- Helper Functions -------------------------

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_is_true(headers: &HeaderMap, name: &str) -> bool {
    header_str(headers, name)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
}

fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    header_str(headers, header::AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Extract the bearer token from the session cookie.
fn bearer_from_cookie(headers: &HeaderMap) -> Option<String> {
    let cookie_str = header_str(headers, header::COOKIE.as_str())?;
    cookie_str
        .split(';')
        .filter_map(|p| p.trim().strip_prefix(SESSION_COOKIE))
        .find_map(|rest| rest.strip_prefix('='))
        .map(str::to_string)
}
