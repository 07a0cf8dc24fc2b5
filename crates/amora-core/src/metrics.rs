//! Prometheus metrics shared by every service process.
//!
//! Counters and histograms live in the default registry behind process-wide
//! statics; the metrics middleware records HTTP traffic and
//! [`metrics_handler`] renders the text exposition format at `/metrics`.

use std::sync::LazyLock;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use prometheus::{
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder, register_histogram_vec,
    register_int_counter_vec, register_int_gauge_vec,
};

const DURATION_BUCKETS: &[f64] = &[
    0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

pub static HTTP_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "http_requests_total",
        "Total HTTP requests",
        &["method", "endpoint", "status_code", "service"]
    )
    .expect("register http_requests_total")
});

pub static HTTP_REQUEST_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "endpoint", "service"],
        DURATION_BUCKETS.to_vec()
    )
    .expect("register http_request_duration_seconds")
});

pub static HTTP_ACTIVE_REQUESTS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec!(
        "http_requests_active",
        "Number of active HTTP requests",
        &["service"]
    )
    .expect("register http_requests_active")
});

pub static RATE_LIMIT_HITS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "rate_limit_hits_total",
        "Requests rejected by a rate-limit tier",
        &["service", "endpoint"]
    )
    .expect("register rate_limit_hits_total")
});

pub static AUTH_ATTEMPTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "auth_attempts_total",
        "Authentication attempts by outcome",
        &["service", "result", "method"]
    )
    .expect("register auth_attempts_total")
});

pub static JWT_TOKENS_CREATED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "jwt_tokens_created_total",
        "JWT tokens issued",
        &["service", "token_type"]
    )
    .expect("register jwt_tokens_created_total")
});

pub static INTERACTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "interactions_total",
        "Discovery interactions recorded",
        &["service", "type"]
    )
    .expect("register interactions_total")
});

pub static MESSAGES_SENT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "messages_sent_total",
        "Chat messages accepted",
        &["service"]
    )
    .expect("register messages_sent_total")
});

pub static EVENTS_PUBLISHED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "events_published_total",
        "Domain events published to the bus",
        &["service", "routing_key", "result"]
    )
    .expect("register events_published_total")
});

/// `GET /metrics` — Prometheus text exposition of the default registry.
pub async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&prometheus::gather()) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_endpoint_renders_registered_series() {
        HTTP_REQUESTS
            .with_label_values(&["GET", "/profiles/check", "200", "profile-service"])
            .inc();
        let response = metrics_handler().await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("http_requests_total"));
    }
}
