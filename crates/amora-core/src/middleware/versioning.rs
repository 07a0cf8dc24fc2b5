//! API version extraction (gateway stack).
//!
//! Expects paths like `/v1/profiles/123`. Unversioned paths default to `v1`
//! with a warning log.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::envelope::ensure_envelope;

pub const DEFAULT_API_VERSION: &str = "v1";

pub async fn layer(mut req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let first_segment = path.trim_start_matches('/').split('/').next().unwrap_or("");

    let version = if first_segment.starts_with('v') && first_segment.len() > 1 {
        first_segment.to_string()
    } else {
        warn!(
            event_type = "no_api_version",
            path = %path,
            "no API version in path"
        );
        DEFAULT_API_VERSION.to_string()
    };

    ensure_envelope(req.extensions_mut()).api_version = version;
    next.run(req).await
}
