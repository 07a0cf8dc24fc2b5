//! Admin service: password login, admin-token enforcement, moderation
//! passthrough.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::json;
use tower::ServiceExt;

use amora_core::middleware::FabricState;
use amora_services::admin::{self, AdminState, SERVICE_NAME};
use amora_services::state::ServiceState;

use common::{JWT_SECRET, Script, bearer, body_json, spawn_data_service, test_settings};

const ADMIN_PASSWORD: &str = "admin-test-password";

async fn app_with(script: Script) -> (axum::Router, common::Log) {
    // AdminState reads ADMIN_PASSWORD from the environment at startup.
    unsafe { std::env::set_var("ADMIN_PASSWORD", ADMIN_PASSWORD) };
    let (url, log) = spawn_data_service(script).await;
    let service = ServiceState::new(SERVICE_NAME, test_settings(&url)).await;
    let state = AdminState::new(service).unwrap();
    let fabric = FabricState::new(SERVICE_NAME, Some(JWT_SECRET.to_string()));
    (admin::app(state, fabric), log)
}

fn login_request(password: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/admin/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "password": password }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn login_exchanges_password_for_admin_token() {
    let (app, log) = app_with(Arc::new(|_req, _i| {
        (StatusCode::OK, json!({ "users": 12 }))
    }))
    .await;

    let response = app.clone().oneshot(login_request(ADMIN_PASSWORD)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let token = body["access_token"].as_str().unwrap().to_string();
    assert_eq!(body["expires_in"], 3600);

    // The admin token opens the protected surface.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/admin/stats")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(log.lock().unwrap()[0].path_and_query, "/data/admin/stats");
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let (app, _log) = app_with(Arc::new(|_req, _i| (StatusCode::OK, json!({})))).await;

    let response = app.oneshot(login_request("nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn user_tokens_cannot_reach_admin_surface() {
    let (app, _log) = app_with(Arc::new(|_req, _i| (StatusCode::OK, json!({})))).await;

    // A valid *user* token lacks the admin_id claim.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/users")
                .header(header::AUTHORIZATION, bearer(42))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "AUTH_002");

    // No token at all.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/admin/users")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
