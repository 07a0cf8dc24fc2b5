//! Amora event bus.
//!
//! One topic exchange (`dating.events`) carries the platform's domain
//! events; each subscribing service owns a durable `<service>.events` queue
//! bound by routing-key patterns. Delivery is persistent and at-least-once:
//! consumers must be idempotent against re-delivery, and publish failures
//! are non-fatal to the publisher (the write has already committed).

pub mod envelope;
pub mod keys;
pub mod publisher;
pub mod routing;
pub mod subscriber;

pub use envelope::EventEnvelope;
pub use publisher::EventPublisher;
pub use routing::matches_pattern;
pub use subscriber::{EventHandler, EventSubscriber};

use thiserror::Error;

/// Exchange every Amora event flows through.
pub const EXCHANGE_NAME: &str = "dating.events";

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("not connected to the broker")]
    NotConnected,

    #[error("malformed event payload: {0}")]
    Payload(#[from] serde_json::Error),
}
