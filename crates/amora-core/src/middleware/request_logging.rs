//! Layer 5: request logging.
//!
//! One record at request start and one at completion with status, duration,
//! principal, and every envelope ID. Assigns the short per-process
//! `request_id` and returns it in `X-Request-ID`.

use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::info;
use uuid::Uuid;

use super::FabricState;
use crate::envelope::ensure_envelope;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub async fn layer(State(fabric): State<FabricState>, mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().simple().to_string()[..8].to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let user_agent = req
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let envelope = ensure_envelope(req.extensions_mut());
    envelope.request_id = request_id.clone();
    let correlation_id = envelope.correlation_id.clone();
    let user_id = envelope.principal.user_id();

    info!(
        event_type = "request_started",
        request_id = %request_id,
        correlation_id = %correlation_id,
        method = %method,
        path = %path,
        user_agent = %user_agent,
        service = fabric.service_name(),
        "request started"
    );

    let start = Instant::now();
    let mut response = next.run(req).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    info!(
        event_type = "request_completed",
        request_id = %request_id,
        correlation_id = %correlation_id,
        method = %method,
        path = %path,
        status_code = response.status().as_u16(),
        duration_ms,
        user_id,
        service = fabric.service_name(),
        "request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
