//! Shared helpers: a recording mock data collaborator and test settings.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use serde_json::Value;

use amora_core::config::{ServiceSettings, ServiceUrls};

pub const JWT_SECRET: &str = "services-test-secret";

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path_and_query: String,
    pub idempotency_key: Option<String>,
    pub correlation_id: Option<String>,
    pub body: Value,
}

pub type Log = Arc<Mutex<Vec<Recorded>>>;

/// Scripted responses: popped per request; the last entry repeats forever.
pub type Script = Arc<dyn Fn(&Recorded, usize) -> (StatusCode, Value) + Send + Sync>;

struct MockState {
    log: Log,
    script: Script,
}

async fn handle(State(state): State<Arc<MockState>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();
    let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    let recorded = Recorded {
        method: parts.method.to_string(),
        path_and_query: parts
            .uri
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_default(),
        idempotency_key: parts
            .headers
            .get("idempotency-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        correlation_id: parts
            .headers
            .get("x-correlation-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    };

    let index = {
        let mut log = state.log.lock().unwrap();
        log.push(recorded.clone());
        log.len() - 1
    };
    let (status, body) = (state.script)(&recorded, index);
    (status, Json(body)).into_response()
}

/// Spawn a mock data collaborator driven by `script(request, index)`.
pub async fn spawn_data_service(script: Script) -> (String, Log) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let state = Arc::new(MockState {
        log: log.clone(),
        script,
    });

    let app = Router::new()
        .route("/", any(handle))
        .route("/{*tail}", any(handle))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), log)
}

/// Settings pointing every collaborator at `data_url`; no broker.
pub fn test_settings(data_url: &str) -> ServiceSettings {
    ServiceSettings {
        host: "127.0.0.1".to_string(),
        port: 0,
        jwt_secret: JWT_SECRET.to_string(),
        rabbitmq_url: None,
        urls: ServiceUrls {
            auth: data_url.to_string(),
            profile: data_url.to_string(),
            discovery: data_url.to_string(),
            media: data_url.to_string(),
            chat: data_url.to_string(),
            admin: data_url.to_string(),
            notification: data_url.to_string(),
            data: data_url.to_string(),
            bot: data_url.to_string(),
        },
    }
}

pub fn bearer(user_id: i64) -> String {
    let pair = amora_core::security::generate_token_pair(user_id, JWT_SECRET).unwrap();
    format!("Bearer {}", pair.access_token)
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
