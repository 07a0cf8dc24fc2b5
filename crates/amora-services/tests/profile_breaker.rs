//! Circuit-breaker behavior on the profile -> data path: repeated upstream
//! 5xx opens the circuit, and an open circuit issues zero network calls.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::json;
use tower::ServiceExt;

use amora_core::middleware::FabricState;
use amora_services::profile::{self, SERVICE_NAME};
use amora_services::state::ServiceState;

use common::{JWT_SECRET, bearer, body_json, spawn_data_service, test_settings};

#[tokio::test]
async fn three_upstream_500s_open_the_breaker_and_short_circuit() {
    let (url, log) = spawn_data_service(Arc::new(|_req, _i| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": { "code": "SYS_001", "message": "db down" } }),
        )
    }))
    .await;
    let state = ServiceState::new(SERVICE_NAME, test_settings(&url)).await;
    let fabric = FabricState::new(SERVICE_NAME, Some(JWT_SECRET.to_string()));
    let app = profile::app(state, fabric);
    let auth = bearer(42);

    // Three consecutive upstream 5xx surface as 502 EXT_001 and count
    // toward the breaker.
    for i in 0..3 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/profiles/42")
                    .header(header::AUTHORIZATION, &auth)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY, "call {i}");
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "EXT_001");
    }
    assert_eq!(log.lock().unwrap().len(), 3);

    // Fourth call: breaker is open - 503 SYS_002 with no network attempt.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/profiles/42")
                .header(header::AUTHORIZATION, &auth)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "SYS_002");
    assert_eq!(
        log.lock().unwrap().len(),
        3,
        "no data-collaborator access may happen while open"
    );
}

#[tokio::test]
async fn upstream_404_is_surfaced_without_tripping_the_breaker() {
    let (url, log) = spawn_data_service(Arc::new(|_req, _i| {
        (
            StatusCode::NOT_FOUND,
            json!({ "error": { "code": "BIZ_001", "message": "Profile not found" } }),
        )
    }))
    .await;
    let state = ServiceState::new(SERVICE_NAME, test_settings(&url)).await;
    let fabric = FabricState::new(SERVICE_NAME, Some(JWT_SECRET.to_string()));
    let app = profile::app(state, fabric);
    let auth = bearer(42);

    // Many 4xx in a row: every one surfaces verbatim, none short-circuit.
    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/profiles/42")
                    .header(header::AUTHORIZATION, &auth)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "BIZ_001");
    }
    assert_eq!(log.lock().unwrap().len(), 5);
}

#[tokio::test]
async fn outbound_call_carries_correlation_and_trace_headers() {
    let (url, log) = spawn_data_service(Arc::new(|_req, _i| {
        (StatusCode::OK, json!({ "user_id": 42, "name": "A" }))
    }))
    .await;
    let state = ServiceState::new(SERVICE_NAME, test_settings(&url)).await;
    let fabric = FabricState::new(SERVICE_NAME, Some(JWT_SECRET.to_string()));
    let app = profile::app(state, fabric);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/profiles/42")
                .header(header::AUTHORIZATION, bearer(42))
                .header("x-correlation-id", "abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-correlation-id").unwrap(), "abc-123");

    let seen = log.lock().unwrap()[0].clone();
    assert_eq!(seen.correlation_id.as_deref(), Some("abc-123"));
}
