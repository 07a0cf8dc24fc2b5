//! Layer 2: distributed tracing.
//!
//! Extracts or generates the trace context, creates the request envelope,
//! and echoes the trace headers on the response. Accepts both the W3C
//! `traceparent` format and the custom `X-Trace-ID`/`X-Span-ID` headers.

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use super::FabricState;
use crate::envelope::{RequestEnvelope, TraceContext};

pub async fn layer(State(fabric): State<FabricState>, mut req: Request, next: Next) -> Response {
    let trace = TraceContext::from_headers(req.headers());
    let idempotency_key = req
        .headers()
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    debug!(
        event_type = "trace_start",
        trace_id = %trace.trace_id,
        span_id = %trace.span_id,
        parent_span_id = trace.parent_span_id.as_deref(),
        service = fabric.service_name(),
        path = req.uri().path(),
        method = %req.method(),
        "trace context extracted"
    );

    let header_set = trace.to_headers();
    req.extensions_mut()
        .insert(RequestEnvelope::new(trace, idempotency_key));

    let mut response = next.run(req).await;
    for (name, value) in header_set {
        if let Ok(value) = HeaderValue::from_str(&value) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}
