//! Gateway routing, rewriting, redirect, and failure-path tests against a
//! recording mock downstream.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::{Json, Router};
use serde_json::{Value, json};
use tower::ServiceExt;

use amora_core::config::ServiceUrls;
use amora_gateway::{GatewayConfig, GatewayServer};

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path_and_query: String,
    correlation_id: Option<String>,
}

type Log = Arc<Mutex<Vec<Recorded>>>;

/// Spawn a downstream that records every request and answers 200 with the
/// path it saw.
async fn spawn_downstream() -> (String, Log) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    async fn record(State(log): State<Log>, req: Request) -> impl IntoResponse {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_default();
        let correlation_id = req
            .headers()
            .get("x-correlation-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        log.lock().unwrap().push(Recorded {
            method: req.method().to_string(),
            path_and_query: path_and_query.clone(),
            correlation_id,
        });
        Json(json!({ "seen": path_and_query }))
    }

    let app = Router::new()
        .route("/", any(record))
        .route("/{*tail}", any(record))
        .with_state(log.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), log)
}

fn config_with(urls: ServiceUrls) -> GatewayConfig {
    GatewayConfig {
        host: "127.0.0.1".into(),
        port: 0,
        urls,
        webapp_domain: Some("https://app.amora.example".into()),
    }
}

fn urls_all(base: &str) -> ServiceUrls {
    ServiceUrls {
        auth: base.to_string(),
        profile: base.to_string(),
        discovery: base.to_string(),
        media: base.to_string(),
        chat: base.to_string(),
        admin: base.to_string(),
        notification: base.to_string(),
        data: base.to_string(),
        bot: base.to_string(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn api_profile_check_is_rewritten_to_profiles_check() {
    let (base, log) = spawn_downstream().await;
    let app = GatewayServer::new(config_with(urls_all(&base))).build_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/profile/check?user_id=42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let seen = log.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "GET");
    assert_eq!(seen[0].path_and_query, "/profiles/check?user_id=42");
}

#[tokio::test]
async fn v1_auth_prefix_is_stripped_preserving_root() {
    let (base, log) = spawn_downstream().await;
    let app = GatewayServer::new(config_with(urls_all(&base))).build_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/auth/validate")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/v1/auth").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let seen = log.lock().unwrap().clone();
    assert_eq!(seen[0].path_and_query, "/validate");
    assert_eq!(seen[1].path_and_query, "/");
}

#[tokio::test]
async fn v1_service_prefixes_strip_version_only() {
    let (base, log) = spawn_downstream().await;
    let app = GatewayServer::new(config_with(urls_all(&base))).build_app();

    for (uri, expected) in [
        ("/v1/profiles/42", "/profiles/42"),
        ("/v1/discovery/matches", "/discovery/matches"),
        ("/v1/chat/conversations", "/chat/conversations"),
        ("/v1/media/7", "/media/7"),
        ("/v1/notifications/send_match", "/notifications/send_match"),
    ] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        let seen = log.lock().unwrap().last().unwrap().clone();
        assert_eq!(seen.path_and_query, expected);
    }
}

#[tokio::test]
async fn api_discovery_aliases_map_to_discovery_paths() {
    let (base, log) = spawn_downstream().await;
    let app = GatewayServer::new(config_with(urls_all(&base))).build_app();

    for (uri, expected) in [
        ("/api/v1/discover", "/discovery/discover"),
        ("/api/v1/like", "/discovery/like"),
        ("/api/v1/pass", "/discovery/pass"),
        ("/api/v1/matches", "/discovery/matches"),
        ("/api/v1/favorites/9", "/discovery/favorites/9"),
        ("/api/v1/photos/upload", "/media/upload"),
        ("/api/v1/admin/stats", "/admin-panel/stats"),
    ] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        let seen = log.lock().unwrap().last().unwrap().clone();
        assert_eq!(seen.path_and_query, expected, "{uri}");
    }
}

#[tokio::test]
async fn legacy_paths_redirect_with_301_and_never_proxy() {
    let (base, log) = spawn_downstream().await;
    let app = GatewayServer::new(config_with(urls_all(&base))).build_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/auth/verify")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/v1/auth/verify"
    );

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/profile")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/api/v1/profile"
    );

    assert!(log.lock().unwrap().is_empty(), "redirects must not proxy");
}

#[tokio::test]
async fn unknown_paths_return_404() {
    let (base, _log) = spawn_downstream().await;
    let app = GatewayServer::new(config_with(urls_all(&base))).build_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v2/unknown/surface")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn downstream_failure_maps_to_503_service_unavailable() {
    // Nothing is listening on this port.
    let urls = urls_all("http://127.0.0.1:1");
    let app = GatewayServer::new(config_with(urls)).build_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/profiles/42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body, json!({ "error": "Service unavailable" }));
}

#[tokio::test]
async fn correlation_id_is_originated_and_forwarded() {
    let (base, log) = spawn_downstream().await;
    let app = GatewayServer::new(config_with(urls_all(&base))).build_app();

    // Inbound request without a correlation header.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/profiles/42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let echoed = response
        .headers()
        .get("x-correlation-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let forwarded = log.lock().unwrap()[0].correlation_id.clone().unwrap();
    assert_eq!(echoed, forwarded);

    // Inbound request with a caller-chosen value.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/profiles/42")
                .header("x-correlation-id", "abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("x-correlation-id").unwrap(),
        "abc-123"
    );
    assert_eq!(
        log.lock().unwrap()[1].correlation_id.as_deref(),
        Some("abc-123")
    );
}

#[tokio::test]
async fn health_lists_route_targets() {
    let (base, _log) = spawn_downstream().await;
    let app = GatewayServer::new(config_with(urls_all(&base))).build_app();

    for uri in ["/health", "/api/health"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "api-gateway");
        assert_eq!(body["routes"]["profile"], base);
    }
}
