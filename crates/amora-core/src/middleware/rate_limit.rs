//! Two-tier sliding-window rate limiting.
//!
//! The endpoint tier is keyed by normalized path template (`{id}` segments
//! match any single path segment); the service tier applies a per-process
//! default. Either tier may reject. A separate, stricter limiter guards the
//! `/auth/*` surface against brute force.
//!
//! Windows are bounded timestamp deques keyed by (scope, identity); state is
//! process-local and lost on restart.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use regex::Regex;
use tracing::warn;

use super::FabricState;
use super::audit;
use crate::envelope::{Principal, RequestEnvelope};
use crate::error::ApiError;
use crate::metrics::RATE_LIMIT_HITS;

/// Sliding-window limiter: at most `max_requests` per `window` per identity.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    windows: DashMap<u64, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_seconds: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_seconds),
            windows: DashMap::new(),
        }
    }

    /// Record one request for `identity`; `true` when allowed.
    ///
    /// Timestamps older than the window are evicted on every check, so the
    /// deque length is bounded by `max_requests`.
    pub fn is_allowed(&self, identity: u64) -> bool {
        let now = Instant::now();
        let mut entry = self.windows.entry(identity).or_default();
        while entry
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            entry.pop_front();
        }
        if entry.len() < self.max_requests {
            entry.push_back(now);
            true
        } else {
            false
        }
    }

    /// Drop identities with no activity in the last two windows.
    ///
    /// Call opportunistically from a background task.
    pub fn gc(&self) {
        let now = Instant::now();
        let horizon = self.window * 2;
        self.windows.retain(|_, window| {
            window
                .back()
                .is_some_and(|t| now.duration_since(*t) < horizon)
        });
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window_seconds(&self) -> u64 {
        self.window.as_secs()
    }
}

struct EndpointPolicy {
    template: &'static str,
    pattern: Regex,
    limiter: RateLimiter,
}

/// Endpoint-specific limits for sensitive operations.
const ENDPOINT_POLICIES: &[(&str, usize, u64)] = &[
    ("/auth/validate", 5, 60),
    ("/auth/refresh", 10, 60),
    ("/media/upload", 5, 60),
    ("/media/upload/photo", 3, 60),
    ("/discovery/swipe", 30, 60),
    ("/chat/messages", 20, 60),
    ("/chat/conversations/{id}/messages", 20, 60),
    ("/admin/moderation", 10, 60),
    ("/reports", 5, 60),
    ("/discovery/report", 5, 60),
    ("/chat/reports", 5, 60),
];

/// Per-service default limit (requests per minute).
fn service_limit(service_name: &str) -> usize {
    match service_name {
        "auth-service" => 10,
        "media-service" => 20,
        "admin-service" => 30,
        // Internal traffic only.
        "data-service" => 100,
        _ => 50,
    }
}

/// Anchored matcher for a path template, `{param}` matching one segment.
fn template_regex(template: &str) -> Regex {
    let mut pattern = String::from("^");
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        pattern.push_str(&regex::escape(&rest[..open]));
        pattern.push_str("[^/]+");
        match rest[open..].find('}') {
            Some(close) => rest = &rest[open + close + 1..],
            None => {
                rest = "";
                break;
            }
        }
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');
    Regex::new(&pattern).expect("endpoint template produces a valid regex")
}

/// Rejection details surfaced as `429 RATE_001`.
pub struct RateLimitRejection {
    pub scope: String,
    pub retry_after: u64,
}

/// The two rate-limit tiers for one service process.
pub struct RateLimitRegistry {
    service_name: String,
    service: RateLimiter,
    endpoints: Vec<EndpointPolicy>,
}

impl RateLimitRegistry {
    pub fn for_service(service_name: &str) -> Self {
        let endpoints = ENDPOINT_POLICIES
            .iter()
            .map(|(template, max, window)| EndpointPolicy {
                template,
                pattern: template_regex(template),
                limiter: RateLimiter::new(*max, *window),
            })
            .collect();
        Self {
            service_name: service_name.to_string(),
            service: RateLimiter::new(service_limit(service_name), 60),
            endpoints,
        }
    }

    /// Apply the endpoint tier, then the service tier; either may reject.
    pub fn check(&self, path: &str, identity: u64) -> Result<(), RateLimitRejection> {
        if let Some(policy) = self
            .endpoints
            .iter()
            .find(|p| p.template == path)
            .or_else(|| self.endpoints.iter().find(|p| p.pattern.is_match(path)))
            && !policy.limiter.is_allowed(identity)
        {
            return Err(RateLimitRejection {
                scope: path.to_string(),
                retry_after: policy.limiter.window_seconds(),
            });
        }

        if !self.service.is_allowed(identity) {
            return Err(RateLimitRejection {
                scope: self.service_name.clone(),
                retry_after: self.service.window_seconds(),
            });
        }
        Ok(())
    }

    pub fn gc(&self) {
        self.service.gc();
        for policy in &self.endpoints {
            policy.limiter.gc();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity derivation
// ─────────────────────────────────────────────────────────────────────────────

/// Best client address available: `X-Forwarded-For` first entry, then
/// `X-Real-IP`, then the socket peer.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .filter(|v| !v.is_empty())
        })
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Stable 31-bit integer derived from a client address.
pub fn address_identity(address: &str) -> u64 {
    let hash = address
        .bytes()
        .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
    hash % (1 << 31)
}

/// Rate-limit identity: the authenticated principal when present, otherwise
/// a hash of the client address.
pub fn client_identity(
    principal: Principal,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
) -> u64 {
    match principal {
        Principal::User(id) | Principal::Admin(id) => id as u64,
        Principal::Unauthenticated => address_identity(&client_address(headers, peer)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Middleware layers
// ─────────────────────────────────────────────────────────────────────────────

fn peer_addr(req: &Request) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Layer 6: two-tier rate limiting. Exempts `/health` and `/metrics`.
pub async fn layer(State(fabric): State<FabricState>, req: Request, next: Next) -> Response {
    let path = req.uri().path();
    if path.starts_with("/health") || path.starts_with("/metrics") {
        return next.run(req).await;
    }

    let principal = req
        .extensions()
        .get::<RequestEnvelope>()
        .map(|e| e.principal)
        .unwrap_or_default();
    let identity = client_identity(principal, req.headers(), peer_addr(&req));

    match fabric.limits().check(path, identity) {
        Ok(()) => next.run(req).await,
        Err(rejection) => {
            warn!(
                event_type = "rate_limit_exceeded",
                service = fabric.service_name(),
                endpoint = path,
                identity,
                "rate limit exceeded"
            );
            RATE_LIMIT_HITS
                .with_label_values(&[fabric.service_name(), path])
                .inc();
            audit::audit_log(
                "rate_limit_exceeded",
                principal.user_id(),
                fabric.service_name(),
                None,
            );
            ApiError::RateLimited {
                scope: rejection.scope,
                retry_after: rejection.retry_after,
            }
            .into_response()
        }
    }
}

/// Additional brute-force limiter on `/auth/*`: 5 attempts per 5 minutes per
/// client address, regardless of authentication state.
pub async fn auth_layer(State(fabric): State<FabricState>, req: Request, next: Next) -> Response {
    let path = req.uri().path();
    if !path.starts_with("/auth/") || path.starts_with("/auth/health") {
        return next.run(req).await;
    }

    let address = client_address(req.headers(), peer_addr(&req));
    let identity = address_identity(&address);

    if fabric.auth_limiter().is_allowed(identity) {
        return next.run(req).await;
    }

    warn!(
        event_type = "auth_rate_limit_exceeded",
        service = fabric.service_name(),
        endpoint = path,
        address = %address,
        "too many authentication attempts"
    );
    RATE_LIMIT_HITS
        .with_label_values(&[fabric.service_name(), path])
        .inc();
    ApiError::RateLimited {
        scope: path.to_string(),
        retry_after: fabric.auth_limiter().window_seconds(),
    }
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_requests() {
        let rl = RateLimiter::new(3, 60);
        assert!(rl.is_allowed(1));
        assert!(rl.is_allowed(1));
        assert!(rl.is_allowed(1));
        assert!(!rl.is_allowed(1)); // 4th request denied
    }

    #[test]
    fn different_identities_are_independent() {
        let rl = RateLimiter::new(1, 60);
        assert!(rl.is_allowed(1));
        assert!(!rl.is_allowed(1));
        assert!(rl.is_allowed(2)); // different identity, fresh window
    }

    #[test]
    fn window_eviction_readmits() {
        let rl = RateLimiter::new(2, 0);
        // Zero-second window: every timestamp is immediately stale.
        assert!(rl.is_allowed(1));
        assert!(rl.is_allowed(1));
        assert!(rl.is_allowed(1));
    }

    #[test]
    fn template_regex_substitutes_parameters() {
        let re = template_regex("/chat/conversations/{id}/messages");
        assert!(re.is_match("/chat/conversations/77/messages"));
        assert!(re.is_match("/chat/conversations/abc/messages"));
        assert!(!re.is_match("/chat/conversations/77/messages/5"));
        assert!(!re.is_match("/chat/conversations/77"));
    }

    #[test]
    fn endpoint_tier_applies_before_service_tier() {
        let registry = RateLimitRegistry::for_service("chat-service");
        for _ in 0..20 {
            assert!(registry.check("/chat/conversations/9/messages", 5).is_ok());
        }
        let rejection = registry
            .check("/chat/conversations/9/messages", 5)
            .unwrap_err();
        assert_eq!(rejection.retry_after, 60);
        assert_eq!(rejection.scope, "/chat/conversations/9/messages");
    }

    #[test]
    fn service_tier_rejects_after_default_budget() {
        let registry = RateLimitRegistry::for_service("auth-service");
        // Untemplated path: only the service tier (10/min) applies.
        for _ in 0..10 {
            assert!(registry.check("/auth/verify", 9).is_ok());
        }
        let rejection = registry.check("/auth/verify", 9).unwrap_err();
        assert_eq!(rejection.scope, "auth-service");
    }

    #[test]
    fn identity_prefers_principal_over_address() {
        let headers = HeaderMap::new();
        assert_eq!(client_identity(Principal::User(42), &headers, None), 42);
        let anon = client_identity(Principal::Unauthenticated, &headers, None);
        assert_eq!(anon, address_identity("unknown"));
    }

    #[test]
    fn forwarded_header_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.9, 10.0.0.1".parse().unwrap());
        let peer: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert_eq!(client_address(&headers, Some(peer)), "10.0.0.9");
    }

    #[test]
    fn address_identity_is_stable_and_bounded() {
        let a = address_identity("203.0.113.7");
        assert_eq!(a, address_identity("203.0.113.7"));
        assert!(a < (1 << 31));
    }
}
