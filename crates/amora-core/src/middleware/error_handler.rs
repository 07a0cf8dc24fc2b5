//! Layer 1: error handler, top of the stack.
//!
//! Domain errors are serialized by [`crate::error::ApiError`]'s
//! `IntoResponse`; this layer is the last observer: it logs every error
//! response that leaves the process, with the correlation ID the inner
//! layers stamped on it.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{error, warn};

use super::FabricState;
use super::correlation::CORRELATION_ID_HEADER;

pub async fn layer(State(fabric): State<FabricState>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        let correlation_id = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if status.is_server_error() {
            error!(
                method = %method,
                path = %path,
                status = status.as_u16(),
                correlation_id = %correlation_id,
                service = fabric.service_name(),
                "server error response"
            );
        } else {
            warn!(
                method = %method,
                path = %path,
                status = status.as_u16(),
                correlation_id = %correlation_id,
                service = fabric.service_name(),
                "client error response"
            );
        }
    }
    response
}
