//! Notification fan-out.
//!
//! Subscribes to `match.created` and `message.sent`, resolves recipients,
//! and dispatches push notifications through the messenger collaborator.
//! Delivery is fire-and-forget: a breaker-open messenger yields
//! `{"status":"queued"}` instead of an error, and consumer failures never
//! block publishers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use amora_core::client::ServiceClient;
use amora_core::envelope::RequestEnvelope;
use amora_core::error::{ApiError, ApiResult};
use amora_core::metrics::metrics_handler;
use amora_core::middleware::{AuthMode, FabricState, standard_stack};
use amora_core::resilience::{BreakerConfig, RetryPolicy};
use amora_events::keys::{MATCH_CREATED, MESSAGE_SENT};
use amora_events::{EventEnvelope, EventHandler, EventSubscriber};

use crate::state::ServiceState;

pub const SERVICE_NAME: &str = "notification-service";

#[derive(Clone)]
pub struct NotificationState {
    pub service: ServiceState,
    bot: Arc<ServiceClient>,
}

impl NotificationState {
    pub fn new(service: ServiceState) -> Self {
        let bot = ServiceClient::new(
            SERVICE_NAME,
            "telegram-bot",
            &service.settings().urls.bot,
            BreakerConfig {
                fail_max: 3,
                timeout: Duration::from_secs(30),
            },
            Some(RetryPolicy::notification()),
        );
        Self {
            service,
            bot: Arc::new(bot),
        }
    }

    /// Deliver one push through the messenger collaborator.
    ///
    /// Breaker-open and transport exhaustion degrade to
    /// `{"status":"queued"}`; the event's at-least-once redelivery is the
    /// retry loop.
    async fn deliver(&self, path: &str, payload: Value, envelope: &RequestEnvelope) -> Value {
        match self.bot.post(path, payload, envelope).await {
            Ok(response) if response.is_success() => {
                json!({ "status": "sent" })
            }
            Ok(response) => {
                warn!(status = response.status, path, "messenger rejected notification");
                json!({ "status": "failed", "code": response.status })
            }
            Err(ApiError::ServiceUnavailable { .. }) => {
                warn!(path, "messenger unavailable, notification queued");
                json!({ "status": "queued" })
            }
            Err(e) => {
                error!(error = %e, path, "notification delivery failed");
                json!({ "status": "queued" })
            }
        }
    }
}

fn envelope_for_event(correlation_id: Option<&str>) -> RequestEnvelope {
    let mut envelope = RequestEnvelope::empty();
    if let Some(id) = correlation_id {
        envelope.correlation_id = id.to_string();
    }
    envelope
}

// ─────────────────────────────────────────────────────────────────────────────
// Event handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Handles `match.created`: both users get a push.
pub struct MatchCreatedHandler {
    state: NotificationState,
}

#[async_trait]
impl EventHandler for MatchCreatedHandler {
    async fn handle(
        &self,
        event: EventEnvelope,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(
            correlation_id = event.correlation_id.as_deref(),
            "processing match event"
        );
        let user_id_1 = event.payload.get("user_id_1").and_then(Value::as_i64);
        let user_id_2 = event.payload.get("user_id_2").and_then(Value::as_i64);
        let (Some(a), Some(b)) = (user_id_1, user_id_2) else {
            // Malformed events can never succeed; dropping beats a requeue
            // loop.
            error!("invalid match event data: missing user IDs");
            return Ok(());
        };

        let envelope = envelope_for_event(event.correlation_id.as_deref());
        for (user, matched) in [(a, b), (b, a)] {
            let result = self
                .state
                .deliver(
                    "/notifications/match",
                    json!({ "user_id": user, "match_data": { "matched_user_id": matched } }),
                    &envelope,
                )
                .await;
            info!(user_id = user, status = %result["status"], "match notification");
        }
        Ok(())
    }
}

/// Handles `message.sent`: the other participant gets a push.
pub struct MessageSentHandler {
    state: NotificationState,
}

#[async_trait]
impl EventHandler for MessageSentHandler {
    async fn handle(
        &self,
        event: EventEnvelope,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(
            correlation_id = event.correlation_id.as_deref(),
            "processing message event"
        );
        let conversation_id = event.payload.get("conversation_id").and_then(Value::as_i64);
        let sender_id = event.payload.get("sender_id").and_then(Value::as_i64);
        let (Some(conversation_id), Some(sender_id)) = (conversation_id, sender_id) else {
            error!("invalid message event data: missing required fields");
            return Ok(());
        };

        let envelope = envelope_for_event(event.correlation_id.as_deref());

        // Resolve the recipient: the conversation participant who is not
        // the sender.
        let path = format!("/data/chat/conversations/{conversation_id}");
        let recipient = match self.state.service.data().get(&path, &envelope).await {
            Ok(response) => response
                .body
                .get("participants")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_i64)
                .find(|id| *id != sender_id),
            Err(e) => {
                warn!(error = %e, conversation_id, "could not resolve recipient");
                None
            }
        };

        let Some(recipient) = recipient else {
            info!(conversation_id, sender_id, "no recipient resolved, skipping push");
            return Ok(());
        };

        let result = self
            .state
            .deliver(
                "/notifications/message",
                json!({
                    "user_id": recipient,
                    "conversation_id": conversation_id,
                    "sender_id": sender_id,
                }),
                &envelope,
            )
            .await;
        info!(user_id = recipient, status = %result["status"], "message notification");
        Ok(())
    }
}

/// Wire the subscriber: one durable queue, two patterns.
pub fn build_subscriber(state: NotificationState, rabbitmq_url: &str) -> EventSubscriber {
    let mut subscriber = EventSubscriber::new(rabbitmq_url, SERVICE_NAME);
    subscriber.register_handler(
        MATCH_CREATED,
        Box::new(MatchCreatedHandler {
            state: state.clone(),
        }),
    );
    subscriber.register_handler(MESSAGE_SENT, Box::new(MessageSentHandler { state }));
    subscriber
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal HTTP surface
// ─────────────────────────────────────────────────────────────────────────────

/// `POST /notifications/send_match` - direct dispatch used by internal
/// callers and tests.
async fn send_match(
    State(state): State<NotificationState>,
    axum::Extension(envelope): axum::Extension<RequestEnvelope>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let user_id = body
        .get("user_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| ApiError::MissingField("user_id".into()))?;
    let match_data = body.get("match_data").cloned().unwrap_or_else(|| json!({}));

    let result = state
        .deliver(
            "/notifications/match",
            json!({ "user_id": user_id, "match_data": match_data }),
            &envelope,
        )
        .await;
    Ok(Json(result))
}

/// `POST /notifications/send_message`
async fn send_message(
    State(state): State<NotificationState>,
    axum::Extension(envelope): axum::Extension<RequestEnvelope>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    if body.get("user_id").and_then(Value::as_i64).is_none() {
        return Err(ApiError::MissingField("user_id".into()));
    }

    let result = state.deliver("/notifications/message", body, &envelope).await;
    Ok(Json(result))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": SERVICE_NAME }))
}

pub fn app(state: NotificationState, fabric: FabricState) -> Router {
    let router = Router::new()
        .route("/notifications/send_match", post(send_match))
        .route("/notifications/send_message", post(send_message))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    standard_stack(router, fabric, AuthMode::User, true)
}
