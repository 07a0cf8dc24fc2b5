//! Amora edge services.
//!
//! Thin HTTP adaptors that validate input, call the data collaborator
//! through the resilience-wrapped client, publish domain events after the
//! write has committed, and return standard envelopes. Business logic -
//! matching scores, image processing, storage - lives behind the
//! collaborators, not here.

pub mod admin;
pub mod auth;
pub mod chat;
pub mod discovery;
pub mod media;
pub mod notification;
pub mod profile;
pub mod state;

pub use state::ServiceState;

use std::net::SocketAddr;

use axum::Router;
use tracing::info;

/// Bind and serve a service router until the process exits.
///
/// Peer addresses are attached so the rate limiter can key unauthenticated
/// traffic by client address.
pub async fn serve(router: Router, service_name: &str, host: &str, port: u16) -> std::io::Result<()> {
    let addr = format!("{host}:{port}");
    info!(service = service_name, addr = %addr, "service starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
