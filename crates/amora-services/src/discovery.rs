//! Discovery service - candidates, likes, passes, matches.
//!
//! The like path owns two fabric obligations: the match pair is
//! order-normalized to `(min_id, max_id)` so concurrent mutual likes land
//! on one match row, and `match.created` is published exactly once - after
//! the data collaborator reports the newly created match, never on the
//! duplicate branch.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;

use amora_core::envelope::RequestEnvelope;
use amora_core::error::{ApiError, ApiResult};
use amora_core::metrics::{INTERACTIONS, metrics_handler};
use amora_core::middleware::{AuthMode, FabricState, audit, standard_stack};
use amora_events::keys::{MATCH_CREATED, MatchCreated};

use crate::state::ServiceState;

pub const SERVICE_NAME: &str = "discovery-service";

/// Query filters forwarded opaquely to the data collaborator.
const FILTER_PARAMS: &[&str] = &[
    "age_min",
    "age_max",
    "max_distance_km",
    "goal",
    "height_min",
    "height_max",
    "has_children",
    "smoking",
    "drinking",
    "education",
    "verified_only",
];

fn principal_user(envelope: &RequestEnvelope) -> ApiResult<i64> {
    envelope
        .principal
        .user_id()
        .ok_or(ApiError::AuthenticationRequired)
}

/// `GET /discovery/candidates` - candidate profiles for matching.
///
/// Degrades to an empty page when the data collaborator is unavailable;
/// discovery browsing is not worth a 503.
async fn candidates(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let user_id = match envelope.principal.user_id() {
        Some(id) => id,
        None => params
            .get("user_id")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| ApiError::MissingField("user_id".into()))?,
    };

    let mut query = vec![("user_id".to_string(), user_id.to_string())];
    query.push((
        "limit".to_string(),
        params.get("limit").cloned().unwrap_or_else(|| "10".into()),
    ));
    if let Some(cursor) = params.get("cursor") {
        query.push(("cursor".to_string(), cursor.clone()));
    }
    for filter in FILTER_PARAMS {
        if let Some(value) = params.get(*filter) {
            query.push((filter.to_string(), value.clone()));
        }
    }

    let call = amora_core::client::OutboundCall::get("/data/candidates").with_query(query);
    match state.data().call(call, &envelope).await {
        Ok(response) => Ok(Json(response.into_result()?)),
        Err(ApiError::ServiceUnavailable { .. }) => {
            Ok(Json(json!({ "candidates": [], "cursor": null })))
        }
        Err(e) => Err(e),
    }
}

/// `POST /discovery/like` - record a like; publish `match.created` when the
/// data collaborator reports a new match.
async fn like(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    interact(state, envelope, body, "like").await
}

/// `POST /discovery/pass` - record a pass; never produces a match.
async fn pass(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    interact(state, envelope, body, "pass").await
}

async fn interact(
    state: ServiceState,
    envelope: RequestEnvelope,
    body: Value,
    default_interaction: &str,
) -> ApiResult<Json<Value>> {
    let user_id = principal_user(&envelope)?;
    let target_id = body
        .get("target_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| ApiError::MissingField("target_id".into()))?;
    let interaction_type = body
        .get("interaction_type")
        .and_then(Value::as_str)
        .unwrap_or(default_interaction)
        .to_string();

    let result = state
        .data()
        .post(
            "/data/interactions",
            json!({
                "user_id": user_id,
                "target_id": target_id,
                "interaction_type": interaction_type,
            }),
            &envelope,
        )
        .await?;

    INTERACTIONS
        .with_label_values(&[SERVICE_NAME, &interaction_type])
        .inc();

    // Two concurrent mutual likes race on the unique (min, max) pair; the
    // loser gets a conflict from the data collaborator and must report
    // "already exists" without re-publishing the event.
    if result.status == 409 {
        return Ok(Json(json!({ "is_match": true, "status": "already_matched" })));
    }

    let payload = result.into_result()?;
    let is_match = payload.get("is_match").and_then(Value::as_bool).unwrap_or(false);
    let newly_created = payload
        .get("already_existed")
        .and_then(Value::as_bool)
        .map(|existed| !existed)
        .unwrap_or(true);

    if is_match && newly_created {
        let event = MatchCreated::normalized(
            user_id,
            target_id,
            payload
                .get("created_at")
                .and_then(Value::as_str)
                .map(str::to_string),
            &interaction_type,
        );
        state
            .publish(MATCH_CREATED, &event, Some(&envelope.correlation_id))
            .await;
        INTERACTIONS.with_label_values(&[SERVICE_NAME, "match"]).inc();
        audit::audit_log("match_created", Some(user_id), SERVICE_NAME, None);
    }

    Ok(Json(payload))
}

/// `GET /discovery/matches` - the caller's current matches.
async fn matches(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
) -> ApiResult<Json<Value>> {
    let user_id = principal_user(&envelope)?;
    let call = amora_core::client::OutboundCall::get("/data/matches")
        .with_query(vec![("user_id".to_string(), user_id.to_string())]);
    let result = state.data().call(call, &envelope).await?;
    Ok(Json(result.into_result()?))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": SERVICE_NAME }))
}

pub fn app(state: ServiceState, fabric: FabricState) -> Router {
    let router = Router::new()
        .route("/discovery/candidates", get(candidates))
        .route("/discovery/discover", get(candidates))
        .route("/discovery/like", post(like))
        .route("/discovery/pass", post(pass))
        .route("/discovery/matches", get(matches))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    standard_stack(router, fabric, AuthMode::User, true)
}
