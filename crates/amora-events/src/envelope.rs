//! Event envelope - metadata attached to each published event, distinct
//! from the domain payload.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// One event as seen by a consumer.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    /// Dotted routing key, e.g. `match.created`.
    pub routing_key: String,
    /// Correlation ID propagated from the publishing request, when any.
    pub correlation_id: Option<String>,
    /// Publisher-side timestamp; falls back to receive time when the broker
    /// did not carry one.
    pub occurred_at: DateTime<Utc>,
    /// Domain payload, opaque to the fabric.
    pub payload: Value,
}
