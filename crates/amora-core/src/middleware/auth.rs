//! Layer 9: authentication enforcement.
//!
//! Requires a valid bearer token and populates the envelope principal.
//! Bypasses: `/health*`, `/metrics*`, `/sync-metrics*`, `/auth/*` except
//! `/auth/verify`, and `/admin/login`. Failures return `401`.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use super::FabricState;
use super::user_context::bearer_token;
use crate::envelope::{Principal, ensure_envelope};
use crate::error::ApiError;
use crate::metrics::AUTH_ATTEMPTS;
use crate::security::{TOKEN_TYPE_ACCESS, TokenError, validate_typed_token};

fn bypassed(path: &str) -> bool {
    path.starts_with("/health")
        || path.starts_with("/metrics")
        || path.starts_with("/sync-metrics")
        || (path.starts_with("/auth/") && !path.starts_with("/auth/verify"))
        || path == "/admin/login"
        // WebSocket handshakes enforce the credential themselves, closing
        // with 1008 instead of an HTTP 401.
        || path == "/chat/ws"
}

fn admin_bypassed(path: &str) -> bool {
    path.starts_with("/health") || path.starts_with("/metrics") || path == "/admin/login"
}

fn verify(
    fabric: &FabricState,
    req: &Request,
) -> Result<crate::security::Claims, ApiError> {
    let Some(token) = bearer_token(req) else {
        warn!(
            path = req.uri().path(),
            service = fabric.service_name(),
            "missing Authorization header"
        );
        AUTH_ATTEMPTS
            .with_label_values(&[fabric.service_name(), "failure", "bearer"])
            .inc();
        return Err(ApiError::AuthenticationRequired);
    };
    let Some(secret) = fabric.jwt_secret() else {
        return Err(ApiError::Internal("JWT secret not configured".into()));
    };
    validate_typed_token(token, secret, TOKEN_TYPE_ACCESS).map_err(|e| {
        warn!(
            path = req.uri().path(),
            service = fabric.service_name(),
            error = %e,
            "token validation failed"
        );
        AUTH_ATTEMPTS
            .with_label_values(&[fabric.service_name(), "failure", "bearer"])
            .inc();
        match e {
            TokenError::Expired => ApiError::TokenExpired,
            other => ApiError::from(other),
        }
    })
}

/// Standard variant: requires a `user_id` claim.
pub async fn require_user(
    State(fabric): State<FabricState>,
    mut req: Request,
    next: Next,
) -> Response {
    if bypassed(req.uri().path()) {
        return next.run(req).await;
    }

    let claims = match verify(&fabric, &req) {
        Ok(claims) => claims,
        Err(e) => return e.into_response(),
    };
    let Some(user_id) = claims.user_id else {
        return ApiError::InvalidToken("missing user_id".into()).into_response();
    };

    AUTH_ATTEMPTS
        .with_label_values(&[fabric.service_name(), "success", "bearer"])
        .inc();
    ensure_envelope(req.extensions_mut()).principal = Principal::User(user_id);
    next.run(req).await
}

/// Admin variant: requires an `admin_id` claim.
pub async fn require_admin(
    State(fabric): State<FabricState>,
    mut req: Request,
    next: Next,
) -> Response {
    if admin_bypassed(req.uri().path()) {
        return next.run(req).await;
    }

    let claims = match verify(&fabric, &req) {
        Ok(claims) => claims,
        Err(e) => return e.into_response(),
    };
    let Some(admin_id) = claims.admin_id else {
        return ApiError::InvalidToken("missing admin_id".into()).into_response();
    };

    ensure_envelope(req.extensions_mut()).principal = Principal::Admin(admin_id);
    next.run(req).await
}
