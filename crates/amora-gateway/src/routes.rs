//! The authoritative route table: rewrites, redirects, and health.

use axum::Json;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use serde_json::json;
use tracing::{info, warn};

use crate::proxy::{moved_permanently, proxy_request};
use crate::server::GatewayState;

/// Strip `prefix` from the front of `path`, substituting `replacement` and
/// preserving the root when nothing remains.
fn rewrite(path: &str, prefix: &str, replacement: &str) -> String {
    let rewritten = match path.strip_prefix(prefix) {
        Some(rest) => format!("{replacement}{rest}"),
        None => path.to_string(),
    };
    if rewritten.is_empty() {
        "/".to_string()
    } else {
        rewritten
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Versioned internal routes (/v1/…)
// ─────────────────────────────────────────────────────────────────────────────

async fn route_auth(State(state): State<GatewayState>, req: Request) -> Response {
    let new_path = rewrite(req.uri().path(), "/v1/auth", "");
    info!(
        from = req.uri().path(),
        to = %new_path,
        target = %state.config.urls.auth,
        "routing auth request"
    );
    proxy_request(&state, &state.config.urls.auth, &new_path, req).await
}

async fn route_profile(State(state): State<GatewayState>, req: Request) -> Response {
    // Both /v1/profile and /v1/profiles land on /profiles.
    let path = req.uri().path();
    let new_path = if path.starts_with("/v1/profiles") {
        rewrite(path, "/v1/profiles", "/profiles")
    } else {
        rewrite(path, "/v1/profile", "/profiles")
    };
    proxy_request(&state, &state.config.urls.profile, &new_path, req).await
}

async fn route_discovery(State(state): State<GatewayState>, req: Request) -> Response {
    let new_path = rewrite(req.uri().path(), "/v1", "");
    proxy_request(&state, &state.config.urls.discovery, &new_path, req).await
}

async fn route_media(State(state): State<GatewayState>, req: Request) -> Response {
    let new_path = rewrite(req.uri().path(), "/v1", "");
    proxy_request(&state, &state.config.urls.media, &new_path, req).await
}

async fn route_chat(State(state): State<GatewayState>, req: Request) -> Response {
    let new_path = rewrite(req.uri().path(), "/v1", "");
    proxy_request(&state, &state.config.urls.chat, &new_path, req).await
}

async fn route_admin(State(state): State<GatewayState>, req: Request) -> Response {
    let new_path = rewrite(req.uri().path(), "/v1", "");
    proxy_request(&state, &state.config.urls.admin, &new_path, req).await
}

async fn route_admin_panel(State(state): State<GatewayState>, req: Request) -> Response {
    // /admin-panel passes through unversioned.
    let path = req.uri().path().to_string();
    proxy_request(&state, &state.config.urls.admin, &path, req).await
}

async fn route_notifications(State(state): State<GatewayState>, req: Request) -> Response {
    let new_path = rewrite(req.uri().path(), "/v1", "");
    proxy_request(&state, &state.config.urls.notification, &new_path, req).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API routes (/api/v1/…)
// ─────────────────────────────────────────────────────────────────────────────

async fn route_api_auth(State(state): State<GatewayState>, req: Request) -> Response {
    let new_path = rewrite(req.uri().path(), "/api/v1/auth", "/auth");
    proxy_request(&state, &state.config.urls.auth, &new_path, req).await
}

async fn route_api_profile(State(state): State<GatewayState>, req: Request) -> Response {
    let path = req.uri().path();
    let new_path = if path.starts_with("/api/v1/profiles") {
        rewrite(path, "/api/v1/profiles", "/profiles")
    } else {
        rewrite(path, "/api/v1/profile", "/profiles")
    };
    proxy_request(&state, &state.config.urls.profile, &new_path, req).await
}

async fn route_api_discovery(State(state): State<GatewayState>, req: Request) -> Response {
    let path = req.uri().path();
    let new_path = if path.starts_with("/api/v1/discover") {
        rewrite(path, "/api/v1/discover", "/discovery/discover")
    } else if path.starts_with("/api/v1/like") {
        rewrite(path, "/api/v1/like", "/discovery/like")
    } else if path.starts_with("/api/v1/pass") {
        rewrite(path, "/api/v1/pass", "/discovery/pass")
    } else if path.starts_with("/api/v1/matches") {
        rewrite(path, "/api/v1/matches", "/discovery/matches")
    } else if path.starts_with("/api/v1/favorites") {
        rewrite(path, "/api/v1/favorites", "/discovery/favorites")
    } else {
        rewrite(path, "/api/v1", "/discovery")
    };
    proxy_request(&state, &state.config.urls.discovery, &new_path, req).await
}

async fn route_api_media(State(state): State<GatewayState>, req: Request) -> Response {
    let new_path = rewrite(req.uri().path(), "/api/v1/photos", "/media");
    proxy_request(&state, &state.config.urls.media, &new_path, req).await
}

async fn route_api_notifications(State(state): State<GatewayState>, req: Request) -> Response {
    let new_path = rewrite(req.uri().path(), "/api/v1/notifications", "/notifications");
    proxy_request(&state, &state.config.urls.notification, &new_path, req).await
}

async fn route_api_admin(State(state): State<GatewayState>, req: Request) -> Response {
    let new_path = rewrite(req.uri().path(), "/api/v1/admin", "/admin-panel");
    proxy_request(&state, &state.config.urls.admin, &new_path, req).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Legacy redirects
// ─────────────────────────────────────────────────────────────────────────────

async fn redirect_to_v1(req: Request) -> Response {
    let new_path = format!("/v1{}", req.uri().path());
    warn!(
        event_type = "legacy_redirect",
        from = req.uri().path(),
        to = %new_path,
        "legacy route redirected"
    );
    moved_permanently(new_path)
}

async fn redirect_api_to_v1(req: Request) -> Response {
    // /api/… -> /api/v1/…
    let new_path = format!("/api/v1{}", &req.uri().path()[4..]);
    warn!(
        event_type = "legacy_api_redirect",
        from = req.uri().path(),
        to = %new_path,
        "legacy API route redirected"
    );
    moved_permanently(new_path)
}

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

async fn health_check(State(state): State<GatewayState>) -> Response {
    let urls = &state.config.urls;
    Json(json!({
        "status": "healthy",
        "service": "api-gateway",
        "routes": {
            "auth": urls.auth,
            "profile": urls.profile,
            "discovery": urls.discovery,
            "media": urls.media,
            "chat": urls.chat,
            "admin": urls.admin,
            "notification": urls.notification,
        },
    }))
    .into_response()
}

/// Register a catch-all plus the bare prefix itself.
fn prefix_route(
    router: axum::Router<GatewayState>,
    prefix: &str,
    handler: axum::routing::MethodRouter<GatewayState>,
) -> axum::Router<GatewayState> {
    router
        .route(prefix, handler.clone())
        .route(&format!("{prefix}/{{*tail}}"), handler)
}

/// Routes proxied to internal services (no CORS - cluster traffic).
pub fn internal_routes() -> axum::Router<GatewayState> {
    let mut router = axum::Router::new()
        .route("/health", get(health_check))
        .route("/api/health", get(health_check));

    router = prefix_route(router, "/v1/auth", any(route_auth));
    router = prefix_route(router, "/v1/profile", any(route_profile));
    router = prefix_route(router, "/v1/profiles", any(route_profile));
    router = prefix_route(router, "/v1/discovery", any(route_discovery));
    router = prefix_route(router, "/v1/media", any(route_media));
    router = prefix_route(router, "/v1/chat", any(route_chat));
    router = prefix_route(router, "/v1/admin", any(route_admin));
    router = prefix_route(router, "/v1/notifications", any(route_notifications));
    router = prefix_route(router, "/admin-panel", any(route_admin_panel));

    // Legacy unversioned paths redirect, never proxy.
    for prefix in [
        "/auth",
        "/profiles",
        "/discovery",
        "/media",
        "/chat",
        "/admin",
        "/notifications",
    ] {
        router = prefix_route(router, prefix, any(redirect_to_v1));
    }
    router
}

/// Public API routes served to the WebApp (CORS applies).
pub fn api_routes() -> axum::Router<GatewayState> {
    let mut router = axum::Router::new();

    router = prefix_route(router, "/api/v1/auth", any(route_api_auth));
    router = prefix_route(router, "/api/v1/profile", any(route_api_profile));
    router = prefix_route(router, "/api/v1/profiles", any(route_api_profile));
    for prefix in [
        "/api/v1/discover",
        "/api/v1/like",
        "/api/v1/pass",
        "/api/v1/matches",
        "/api/v1/favorites",
    ] {
        router = prefix_route(router, prefix, any(route_api_discovery));
    }
    router = prefix_route(router, "/api/v1/photos", any(route_api_media));
    router = prefix_route(router, "/api/v1/notifications", any(route_api_notifications));
    router = prefix_route(router, "/api/v1/admin", any(route_api_admin));

    // Legacy /api/* redirects to /api/v1/*.
    for prefix in [
        "/api/auth",
        "/api/profile",
        "/api/profiles",
        "/api/discover",
        "/api/like",
        "/api/pass",
        "/api/matches",
        "/api/favorites",
        "/api/photos",
        "/api/notifications",
    ] {
        router = prefix_route(router, prefix, any(redirect_api_to_v1));
    }
    router
}
