//! Layer 3: correlation ID.
//!
//! Extracts or generates `X-Correlation-ID`, records it on the envelope,
//! and echoes it on every response - success or failure. Outbound calls
//! propagate the same value (see [`crate::client::ServiceClient`]).

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;
use uuid::Uuid;

use crate::envelope::ensure_envelope;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

pub async fn layer(mut req: Request, next: Next) -> Response {
    let correlation_id = req
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let generated = Uuid::new_v4().to_string();
            debug!(correlation_id = %generated, "generated new correlation ID");
            generated
        });

    ensure_envelope(req.extensions_mut()).correlation_id = correlation_id.clone();

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}
