//! Chat service - conversations, messages, read state, blocks, reports,
//! and the per-connection WebSocket surface.
//!
//! Fabric obligations here: the `Idempotency-Key` header is forwarded
//! verbatim to the data collaborator, and `message.sent` is published only
//! when the data call reports a new insert - an idempotent replay returns
//! the stored response without re-publishing.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Extension, Json, Router};
use serde_json::{Value, json};
use tracing::{error, info};

use amora_core::client::{Method, OutboundCall};
use amora_core::envelope::RequestEnvelope;
use amora_core::error::{ApiError, ApiResult};
use amora_core::metrics::{MESSAGES_SENT, metrics_handler};
use amora_core::middleware::{AuthMode, FabricState, standard_stack};
use amora_events::keys::{
    MESSAGE_READ, MESSAGE_SENT, MessageRead, MessageSent, REPORT_CREATED, ReportCreated,
    USER_BLOCKED, UserBlocked,
};

use crate::state::ServiceState;

pub const SERVICE_NAME: &str = "chat-service";

fn principal_user(envelope: &RequestEnvelope) -> ApiResult<i64> {
    envelope
        .principal
        .user_id()
        .ok_or(ApiError::AuthenticationRequired)
}

fn required_str(body: &Value, field: &str) -> ApiResult<String> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::MissingField(field.to_string()))
}

fn required_i64(body: &Value, field: &str) -> ApiResult<i64> {
    body.get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| ApiError::MissingField(field.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// REST surface
// ─────────────────────────────────────────────────────────────────────────────

/// `GET /chat/conversations`
async fn conversations(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
) -> ApiResult<Json<Value>> {
    let user_id = principal_user(&envelope)?;
    let call = OutboundCall::get("/data/chat/conversations")
        .with_query(vec![("user_id".to_string(), user_id.to_string())]);
    Ok(Json(state.data().call(call, &envelope).await?.into_result()?))
}

/// `GET /chat/conversations/{id}/messages`
async fn messages(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Path(conversation_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let user_id = principal_user(&envelope)?;
    let path = format!("/data/chat/conversations/{conversation_id}/messages");
    let call = OutboundCall::get(&path)
        .with_query(vec![("user_id".to_string(), user_id.to_string())]);
    Ok(Json(state.data().call(call, &envelope).await?.into_result()?))
}

/// Persist one message through the data collaborator and publish
/// `message.sent` only for new inserts.
async fn persist_message(
    state: &ServiceState,
    envelope: &RequestEnvelope,
    conversation_id: i64,
    sender_id: i64,
    content: &str,
    content_type: &str,
) -> ApiResult<Value> {
    let mut result = state
        .data()
        .post(
            &format!("/data/chat/conversations/{conversation_id}/messages"),
            json!({
                "sender_id": sender_id,
                "content": content,
                "content_type": content_type,
                "idempotency_key": envelope.idempotency_key,
            }),
            envelope,
        )
        .await?
        .into_result()?;

    // The duplicate marker is the data collaborator's signal to this
    // handler; replayed requests must return byte-identical responses, so
    // it never reaches the client.
    let duplicate = result
        .as_object_mut()
        .and_then(|obj| obj.remove("duplicate"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if duplicate {
        // Idempotent replay: same response, no second event.
        info!(
            conversation_id,
            idempotency_key = envelope.idempotency_key.as_deref(),
            "duplicate message suppressed"
        );
        return Ok(result);
    }

    MESSAGES_SENT.with_label_values(&[SERVICE_NAME]).inc();
    let event = MessageSent {
        conversation_id,
        sender_id,
        content: content.to_string(),
        content_type: content_type.to_string(),
        message_id: result.get("message_id").and_then(Value::as_i64),
        sent_at: result
            .get("created_at")
            .and_then(Value::as_str)
            .map(str::to_string),
    };
    state
        .publish(MESSAGE_SENT, &event, Some(&envelope.correlation_id))
        .await;
    Ok(result)
}

/// `POST /chat/conversations/{id}/messages` (accepts `Idempotency-Key`)
async fn send_message(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Path(conversation_id): Path<i64>,
    Json(body): Json<Value>,
) -> ApiResult<Response> {
    let sender_id = principal_user(&envelope)?;
    let content = required_str(&body, "content")?;
    let content_type = body
        .get("content_type")
        .and_then(Value::as_str)
        .unwrap_or("text");

    let result = persist_message(
        &state,
        &envelope,
        conversation_id,
        sender_id,
        &content,
        content_type,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(result)).into_response())
}

/// `PUT /chat/conversations/{id}/read-state`
async fn update_read_state(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Path(conversation_id): Path<i64>,
    Json(body): Json<Value>,
) -> ApiResult<StatusCode> {
    let user_id = principal_user(&envelope)?;
    let up_to_message_id = required_i64(&body, "up_to_message_id")?;

    let path = format!("/data/chat/conversations/{conversation_id}/read-state");
    let call = OutboundCall {
        method: Method::PUT,
        path: &path,
        query: Vec::new(),
        body: Some(json!({ "user_id": user_id, "up_to_message_id": up_to_message_id })),
        bearer: None,
    };
    state.data().call(call, &envelope).await?.into_result()?;

    let event = MessageRead {
        conversation_id,
        user_id,
        up_to_message_id,
    };
    state
        .publish(MESSAGE_READ, &event, Some(&envelope.correlation_id))
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /chat/blocks`
async fn block_user(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Json(body): Json<Value>,
) -> ApiResult<Response> {
    let blocker_id = principal_user(&envelope)?;
    let blocked_id = required_i64(&body, "target_user_id")?;

    let result = state
        .data()
        .post(
            "/data/chat/blocks",
            json!({ "blocker_id": blocker_id, "blocked_id": blocked_id }),
            &envelope,
        )
        .await?
        .into_result()?;

    let event = UserBlocked {
        blocker_id,
        blocked_id,
    };
    state
        .publish(USER_BLOCKED, &event, Some(&envelope.correlation_id))
        .await;
    Ok((StatusCode::CREATED, Json(result)).into_response())
}

/// `DELETE /chat/blocks/{target_user_id}`
async fn unblock_user(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Path(target_user_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let blocker_id = principal_user(&envelope)?;
    let path = format!("/data/chat/blocks/{target_user_id}");
    let call = OutboundCall {
        method: Method::DELETE,
        path: &path,
        query: Vec::new(),
        body: Some(json!({ "blocker_id": blocker_id })),
        bearer: None,
    };
    state.data().call(call, &envelope).await?.into_result()?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /chat/reports` - accepted for asynchronous moderation.
async fn create_report(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Json(body): Json<Value>,
) -> ApiResult<Response> {
    let reporter_id = principal_user(&envelope)?;
    let conversation_id = required_i64(&body, "conversation_id")?;
    let message_id = body.get("message_id").and_then(Value::as_i64);
    let reason = required_str(&body, "reason")?;

    let result = state
        .data()
        .post(
            "/data/chat/reports",
            json!({
                "reporter_id": reporter_id,
                "conversation_id": conversation_id,
                "message_id": message_id,
                "reason": reason,
            }),
            &envelope,
        )
        .await?
        .into_result()?;

    let event = ReportCreated {
        report_id: result.get("report_id").and_then(Value::as_i64).unwrap_or(0),
        reporter_id,
        conversation_id,
        message_id,
        reason,
    };
    state
        .publish(REPORT_CREATED, &event, Some(&envelope.correlation_id))
        .await;
    Ok((StatusCode::ACCEPTED, Json(result)).into_response())
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket surface
// ─────────────────────────────────────────────────────────────────────────────

/// `GET /chat/ws?conversation_id=…`
///
/// Closes with code 1008 when the bearer credential is missing. Events are
/// echoed to the sender's own socket only; server-initiated pushes for the
/// other participant travel through the notification fan-out, not this
/// connection.
async fn websocket(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
    axum::extract::Query(params): axum::extract::Query<std::collections::HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let conversation_id = params
        .get("conversation_id")
        .and_then(|v| v.parse::<i64>().ok());
    ws.on_upgrade(move |socket| handle_socket(socket, state, envelope, conversation_id))
}

async fn handle_socket(
    mut socket: WebSocket,
    state: ServiceState,
    envelope: RequestEnvelope,
    conversation_id: Option<i64>,
) {
    let Some(user_id) = envelope.principal.user_id() else {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: 1008,
                reason: "Authentication required".into(),
            })))
            .await;
        return;
    };

    info!(user_id, conversation_id, "WebSocket connection established");

    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let data: Value = match serde_json::from_str(&message) {
            Ok(data) => data,
            Err(_) => {
                let _ = send_json(
                    &mut socket,
                    &json!({ "type": "error", "message": "Invalid message format" }),
                )
                .await;
                continue;
            }
        };

        let reply = match data.get("type").and_then(Value::as_str) {
            Some("message") => {
                ws_message_event(&state, &envelope, user_id, conversation_id, &data).await
            }
            Some("typing") => json!({ "type": "typing", "user_id": user_id }),
            Some("read") => json!({ "type": "read", "user_id": user_id }),
            _ => json!({ "type": "error", "message": "Unknown event type" }),
        };
        if send_json(&mut socket, &reply).await.is_err() {
            break;
        }
    }

    info!(user_id, "WebSocket connection closed");
}

async fn ws_message_event(
    state: &ServiceState,
    envelope: &RequestEnvelope,
    user_id: i64,
    conversation_id: Option<i64>,
    data: &Value,
) -> Value {
    let Some(conversation_id) = conversation_id else {
        return json!({ "type": "error", "message": "conversation_id is required" });
    };
    let Some(content) = data.get("content").and_then(Value::as_str) else {
        return json!({ "type": "error", "message": "content is required" });
    };
    let content_type = data
        .get("content_type")
        .and_then(Value::as_str)
        .unwrap_or("text");

    match persist_message(state, envelope, conversation_id, user_id, content, content_type).await {
        Ok(result) => json!({
            "type": "message_sent",
            "message_id": result.get("message_id"),
            "created_at": result.get("created_at"),
        }),
        Err(e) => {
            error!(error = %e, conversation_id, "WebSocket message persistence failed");
            json!({ "type": "error", "message": "Failed to send message" })
        }
    }
}

async fn send_json(socket: &mut WebSocket, value: &Value) -> Result<(), axum::Error> {
    socket.send(Message::Text(value.to_string().into())).await
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": SERVICE_NAME }))
}

pub fn app(state: ServiceState, fabric: FabricState) -> Router {
    let router = Router::new()
        .route("/chat/ws", get(websocket))
        .route("/chat/conversations", get(conversations))
        .route(
            "/chat/conversations/{conversation_id}/messages",
            get(messages).post(send_message),
        )
        .route(
            "/chat/conversations/{conversation_id}/read-state",
            put(update_read_state),
        )
        .route("/chat/blocks", post(block_user))
        .route("/chat/blocks/{target_user_id}", delete(unblock_user))
        .route("/chat/reports", post(create_report))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    standard_stack(router, fabric, AuthMode::User, true)
}
