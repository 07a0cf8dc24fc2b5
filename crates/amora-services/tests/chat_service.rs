//! Chat message idempotency and event-surface tests.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::json;
use tower::ServiceExt;

use amora_core::middleware::FabricState;
use amora_services::chat::{self, SERVICE_NAME};
use amora_services::state::ServiceState;

use common::{JWT_SECRET, Script, bearer, body_json, spawn_data_service, test_settings};

async fn app_with(script: Script) -> (axum::Router, common::Log) {
    let (url, log) = spawn_data_service(script).await;
    let state = ServiceState::new(SERVICE_NAME, test_settings(&url)).await;
    let fabric = FabricState::new(SERVICE_NAME, Some(JWT_SECRET.to_string()));
    (chat::app(state, fabric), log)
}

fn send_message(user: i64, conversation: i64, idempotency_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/chat/conversations/{conversation}/messages"))
        .header(header::AUTHORIZATION, bearer(user))
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = idempotency_key {
        builder = builder.header("idempotency-key", key);
    }
    builder
        .body(Body::from(json!({ "content": "hi there" }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn idempotency_key_is_forwarded_verbatim() {
    let (app, log) = app_with(Arc::new(|_req, _i| {
        (
            StatusCode::OK,
            json!({ "message_id": 1, "created_at": "2026-08-01T12:00:00Z" }),
        )
    }))
    .await;

    let response = app.oneshot(send_message(5, 77, Some("k1"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let seen = log.lock().unwrap()[0].clone();
    assert_eq!(seen.path_and_query, "/data/chat/conversations/77/messages");
    assert_eq!(seen.idempotency_key.as_deref(), Some("k1"));
    assert_eq!(seen.body["idempotency_key"], "k1");
    assert_eq!(seen.body["sender_id"], 5);
}

#[tokio::test]
async fn replayed_key_returns_identical_response() {
    // First insert succeeds; the replay is flagged as a duplicate by the
    // data collaborator and must come back byte-identical.
    let (app, log) = app_with(Arc::new(|_req, index| {
        if index == 0 {
            (
                StatusCode::OK,
                json!({ "message_id": 1, "created_at": "2026-08-01T12:00:00Z" }),
            )
        } else {
            (
                StatusCode::OK,
                json!({
                    "message_id": 1,
                    "created_at": "2026-08-01T12:00:00Z",
                    "duplicate": true,
                }),
            )
        }
    }))
    .await;

    let first = app
        .clone()
        .oneshot(send_message(5, 77, Some("k1")))
        .await
        .unwrap();
    let second = app.oneshot(send_message(5, 77, Some("k1"))).await.unwrap();

    assert_eq!(first.status(), StatusCode::CREATED);
    assert_eq!(second.status(), StatusCode::CREATED);
    let first_body = body_json(first).await;
    let second_body = body_json(second).await;
    assert_eq!(first_body, second_body, "replay must be indistinguishable");
    assert_eq!(first_body["message_id"], 1);
    assert!(first_body.get("duplicate").is_none());

    assert_eq!(log.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn message_requires_content_and_bearer() {
    let (app, _log) = app_with(Arc::new(|_req, _i| (StatusCode::OK, json!({})))).await;

    let no_content = Request::builder()
        .method("POST")
        .uri("/chat/conversations/77/messages")
        .header(header::AUTHORIZATION, bearer(5))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.clone().oneshot(no_content).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let no_bearer = Request::builder()
        .method("POST")
        .uri("/chat/conversations/77/messages")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "content": "hi" }).to_string()))
        .unwrap();
    let response = app.oneshot(no_bearer).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "AUTH_001");
}

#[tokio::test]
async fn block_and_report_call_data_collaborator() {
    let (app, log) = app_with(Arc::new(|req, _i| {
        if req.path_and_query.ends_with("/reports") {
            (StatusCode::OK, json!({ "report_id": 11 }))
        } else {
            (StatusCode::OK, json!({ "blocked": true }))
        }
    }))
    .await;

    let block = Request::builder()
        .method("POST")
        .uri("/chat/blocks")
        .header(header::AUTHORIZATION, bearer(5))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "target_user_id": 6 }).to_string()))
        .unwrap();
    let response = app.clone().oneshot(block).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let report = Request::builder()
        .method("POST")
        .uri("/chat/reports")
        .header(header::AUTHORIZATION, bearer(5))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "conversation_id": 77, "reason": "spam" }).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(report).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let seen = log.lock().unwrap().clone();
    assert_eq!(seen[0].path_and_query, "/data/chat/blocks");
    assert_eq!(seen[0].body["blocker_id"], 5);
    assert_eq!(seen[0].body["blocked_id"], 6);
    assert_eq!(seen[1].path_and_query, "/data/chat/reports");
    assert_eq!(seen[1].body["reporter_id"], 5);
    assert_eq!(seen[1].body["reason"], "spam");
}
