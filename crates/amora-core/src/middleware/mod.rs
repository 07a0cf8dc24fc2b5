//! The normative middleware chain.
//!
//! Every service wraps its handler stack in the same ordered composition;
//! omitting a layer or reordering changes observable behavior:
//!
//! 1. error handler
//! 2. distributed tracing
//! 3. correlation ID
//! 4. user context
//! 5. request logging
//! 6. rate limiting
//! 7. metrics
//! 8. audit logging
//! 9. authentication
//!
//! The auth service omits layer 9 (its job is to issue tokens); the admin
//! service swaps in the admin-token variant.

pub mod audit;
pub mod auth;
pub mod correlation;
pub mod error_handler;
pub mod metrics;
pub mod rate_limit;
pub mod request_logging;
pub mod trace;
pub mod user_context;
pub mod versioning;

use std::sync::Arc;

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};

pub use rate_limit::{RateLimitRegistry, RateLimiter};

/// Which authentication layer a service stack ends with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Bearer token with a `user_id` claim (most edge services).
    User,
    /// Bearer token with an `admin_id` claim (admin service).
    Admin,
    /// No authentication layer (auth service issues the tokens).
    Disabled,
}

struct FabricInner {
    service_name: String,
    jwt_secret: Option<String>,
    limits: RateLimitRegistry,
    auth_limiter: RateLimiter,
}

/// Per-process fabric state injected into every middleware layer.
///
/// Cheap to clone; rate-limit windows and the brute-force limiter are shared
/// across all clones within the process and lost on restart.
#[derive(Clone)]
pub struct FabricState {
    inner: Arc<FabricInner>,
}

impl FabricState {
    pub fn new(service_name: &str, jwt_secret: Option<String>) -> Self {
        Self {
            inner: Arc::new(FabricInner {
                service_name: service_name.to_string(),
                jwt_secret,
                limits: RateLimitRegistry::for_service(service_name),
                // 5 attempts per 5 minutes per address on /auth/*.
                auth_limiter: RateLimiter::new(5, 300),
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    pub fn jwt_secret(&self) -> Option<&str> {
        self.inner.jwt_secret.as_deref()
    }

    pub fn limits(&self) -> &RateLimitRegistry {
        &self.inner.limits
    }

    pub fn auth_limiter(&self) -> &RateLimiter {
        &self.inner.auth_limiter
    }
}

/// Wrap `router` in the standard middleware stack.
///
/// Layers are added innermost-first so the request traverses them in the
/// normative order above.
pub fn standard_stack(
    router: Router,
    fabric: FabricState,
    auth_mode: AuthMode,
    use_audit: bool,
) -> Router {
    let mut router = match auth_mode {
        AuthMode::User => router.layer(from_fn_with_state(fabric.clone(), auth::require_user)),
        AuthMode::Admin => router.layer(from_fn_with_state(fabric.clone(), auth::require_admin)),
        AuthMode::Disabled => router,
    };
    if use_audit {
        router = router.layer(from_fn_with_state(fabric.clone(), audit::layer));
    }
    router
        .layer(from_fn_with_state(fabric.clone(), metrics::layer))
        .layer(from_fn_with_state(fabric.clone(), rate_limit::layer))
        .layer(from_fn_with_state(fabric.clone(), request_logging::layer))
        .layer(from_fn_with_state(fabric.clone(), user_context::layer))
        .layer(from_fn(correlation::layer))
        .layer(from_fn_with_state(fabric.clone(), trace::layer))
        .layer(from_fn_with_state(fabric, error_handler::layer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use tower::ServiceExt;

    #[tokio::test]
    async fn stack_echoes_fabric_headers_on_success() {
        let fabric = FabricState::new("profile-service", Some("secret".into()));
        let app = standard_stack(
            Router::new().route("/health", get(|| async { "ok" })),
            fabric,
            AuthMode::User,
            true,
        );

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-correlation-id"));
        assert!(response.headers().contains_key("x-request-id"));
        assert!(response.headers().contains_key("x-trace-id"));
        assert!(response.headers().contains_key("traceparent"));
    }

    #[tokio::test]
    async fn protected_route_rejects_missing_bearer() {
        let fabric = FabricState::new("profile-service", Some("secret".into()));
        let app = standard_stack(
            Router::new().route("/profiles/check", get(|| async { "ok" })),
            fabric,
            AuthMode::User,
            false,
        );

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/profiles/check")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        // Even failures carry the correlation header.
        assert!(response.headers().contains_key("x-correlation-id"));
    }
}
