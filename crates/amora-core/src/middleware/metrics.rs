//! Layer 7: HTTP metrics.
//!
//! Increments the request counter labeled by method, path, status, and
//! service; records the duration histogram and the in-flight gauge.

use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::FabricState;
use crate::metrics::{HTTP_ACTIVE_REQUESTS, HTTP_REQUEST_DURATION, HTTP_REQUESTS};

pub async fn layer(State(fabric): State<FabricState>, req: Request, next: Next) -> Response {
    let service = fabric.service_name().to_string();
    let method = req.method().to_string();
    // Label by route template when matched, keeping cardinality bounded.
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    HTTP_ACTIVE_REQUESTS
        .with_label_values(&[service.as_str()])
        .inc();
    let start = Instant::now();

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    HTTP_ACTIVE_REQUESTS
        .with_label_values(&[service.as_str()])
        .dec();
    HTTP_REQUESTS
        .with_label_values(&[
            method.as_str(),
            endpoint.as_str(),
            response.status().as_str(),
            service.as_str(),
        ])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[method.as_str(), endpoint.as_str(), service.as_str()])
        .observe(duration);

    response
}
