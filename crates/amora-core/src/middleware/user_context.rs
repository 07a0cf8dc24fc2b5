//! Layer 4: user context.
//!
//! Attempts a JWT decode without failing the request; a valid bearer token
//! populates the envelope principal so logging and rate limiting can key by
//! user. Enforcement happens later, in the authentication layer.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::FabricState;
use crate::envelope::{Principal, ensure_envelope};
use crate::security::{TOKEN_TYPE_ACCESS, validate_typed_token};

/// Bearer token from the `Authorization` header, when present.
pub fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

pub async fn layer(State(fabric): State<FabricState>, mut req: Request, next: Next) -> Response {
    let principal = match (bearer_token(&req), fabric.jwt_secret()) {
        (Some(token), Some(secret)) => {
            match validate_typed_token(token, secret, TOKEN_TYPE_ACCESS) {
                Ok(claims) => match (claims.user_id, claims.admin_id) {
                    (Some(user_id), _) => Principal::User(user_id),
                    (None, Some(admin_id)) => Principal::Admin(admin_id),
                    (None, None) => Principal::Unauthenticated,
                },
                // Invalid tokens are the auth layer's problem, not ours.
                Err(_) => Principal::Unauthenticated,
            }
        }
        _ => Principal::Unauthenticated,
    };

    ensure_envelope(req.extensions_mut()).principal = principal;
    next.run(req).await
}
