//! Structured logging setup.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::env_or;

/// Initialize JSON structured logging for a service binary.
///
/// The filter comes from `LOG_LEVEL` (default `info`); `RUST_LOG` overrides
/// when set. Safe to call once per process.
pub fn init(service_name: &str) {
    let level = env_or("LOG_LEVEL", "info").to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_current_span(false))
        .init();

    tracing::info!(service = service_name, event_type = "service_start", "logging initialized");
}
