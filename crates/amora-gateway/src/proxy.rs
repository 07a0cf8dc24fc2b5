//! Request forwarding to downstream services.
//!
//! Hop-by-hop headers (`Host`, `Connection`) are dropped on the way in;
//! `Transfer-Encoding` and `Connection` are stripped from the response.
//! A `X-Correlation-ID` is originated when the inbound request lacks one.
//! Any downstream error class (connect refused, timeout, transport
//! exception) maps to `503 {"error":"Service unavailable"}`.

use axum::body::{Body, to_bytes};
use axum::extract::Request;
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use amora_core::envelope::RequestEnvelope;

use crate::server::GatewayState;

/// Upper bound on buffered request bodies (larger uploads stream through
/// the media service's own limits, not the gateway's).
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

fn request_headers(headers: &HeaderMap, correlation_id: &str) -> reqwest::header::HeaderMap {
    let mut forwarded = reqwest::header::HeaderMap::new();
    for (name, value) in headers {
        let lowered = name.as_str().to_ascii_lowercase();
        if lowered == "host" || lowered == "connection" {
            continue;
        }
        forwarded.insert(name.clone(), value.clone());
    }
    if !correlation_id.is_empty()
        && let Ok(value) = reqwest::header::HeaderValue::from_str(correlation_id)
    {
        forwarded.insert("x-correlation-id", value);
    }
    forwarded
}

fn service_unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        axum::Json(json!({ "error": "Service unavailable" })),
    )
        .into_response()
}

/// Forward `req` to `{target_url}{path_override}`, mirroring the downstream
/// response.
pub async fn proxy_request(
    state: &GatewayState,
    target_url: &str,
    path_override: &str,
    req: Request,
) -> Response {
    let method = req.method().clone();
    let query = req.uri().query().map(str::to_string);
    let correlation_id = req
        .extensions()
        .get::<RequestEnvelope>()
        .map(|e| e.correlation_id.clone())
        .unwrap_or_default();
    let headers = request_headers(req.headers(), &correlation_id);

    let mut full_url = format!("{}{}", target_url.trim_end_matches('/'), path_override);
    if let Some(query) = query {
        full_url = format!("{full_url}?{query}");
    }

    let body = if method == Method::POST || method == Method::PUT || method == Method::PATCH {
        match to_bytes(req.into_body(), MAX_BODY_BYTES).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!(error = %e, url = %full_url, "failed to read request body");
                return service_unavailable();
            }
        }
    } else {
        None
    };

    let mut outbound = state.http.request(method, &full_url).headers(headers);
    if let Some(bytes) = body {
        outbound = outbound.body(bytes);
    }

    let upstream = match outbound.send().await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, url = %full_url, "error proxying request");
            return service_unavailable();
        }
    };

    let status = upstream.status();
    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        let lowered = name.as_str().to_ascii_lowercase();
        if lowered == "transfer-encoding" || lowered == "connection" {
            continue;
        }
        response_headers.insert(name.clone(), value.clone());
    }

    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, url = %full_url, "error reading downstream response");
            return service_unavailable();
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

/// `301 Moved Permanently` with the given location.
pub fn moved_permanently(location: String) -> Response {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, location)],
    )
        .into_response()
}
