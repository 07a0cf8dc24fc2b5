//! Profile service - thin adaptors over the data collaborator.
//!
//! The fabric-facing surface only: input validation, resilient data calls,
//! standard envelopes. Profile content itself is opaque to this service.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;

use amora_core::client::{Method, OutboundCall};
use amora_core::envelope::RequestEnvelope;
use amora_core::error::{ApiError, ApiResult};
use amora_core::metrics::metrics_handler;
use amora_core::middleware::{AuthMode, FabricState, standard_stack};

use crate::state::ServiceState;

pub const SERVICE_NAME: &str = "profile-service";

fn principal_user(envelope: &RequestEnvelope) -> ApiResult<i64> {
    envelope
        .principal
        .user_id()
        .ok_or(ApiError::AuthenticationRequired)
}

/// `GET /profiles/{user_id}`
async fn get_profile(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let path = format!("/data/profiles/{user_id}");
    let result = state.data().get(&path, &envelope).await?;
    Ok(Json(result.into_result()?))
}

/// `GET /profiles/check?user_id=…` - existence probe used by the WebApp.
async fn check_profile(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let user_id = params
        .get("user_id")
        .and_then(|v| v.parse::<i64>().ok())
        .or_else(|| envelope.principal.user_id())
        .ok_or_else(|| ApiError::MissingField("user_id".into()))?;

    let call = OutboundCall::get("/data/profiles/check")
        .with_query(vec![("user_id".to_string(), user_id.to_string())]);
    Ok(Json(state.data().call(call, &envelope).await?.into_result()?))
}

/// `POST /profiles` - create; the body is forwarded opaquely.
async fn create_profile(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Json(mut body): Json<Value>,
) -> ApiResult<Response> {
    let user_id = principal_user(&envelope)?;
    let obj = body
        .as_object_mut()
        .ok_or_else(|| ApiError::Validation("profile body must be an object".into()))?;
    obj.entry("user_id").or_insert_with(|| json!(user_id));
    let result = state
        .data()
        .post("/data/profiles", body, &envelope)
        .await?
        .into_result()?;
    Ok((StatusCode::CREATED, Json(result)).into_response())
}

/// `GET /profile` - the caller's own profile.
async fn current_profile(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
) -> ApiResult<Json<Value>> {
    let user_id = principal_user(&envelope)?;
    let path = format!("/data/profiles/{user_id}");
    Ok(Json(state.data().get(&path, &envelope).await?.into_result()?))
}

/// `PUT /profile` - update the caller's own profile.
async fn update_profile(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let user_id = principal_user(&envelope)?;
    let path = format!("/data/profiles/{user_id}");
    let call = OutboundCall {
        method: Method::PUT,
        path: &path,
        query: Vec::new(),
        body: Some(body),
        bearer: None,
    };
    Ok(Json(state.data().call(call, &envelope).await?.into_result()?))
}

/// `DELETE /profile` - delete the caller's own profile.
async fn delete_profile(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
) -> ApiResult<StatusCode> {
    let user_id = principal_user(&envelope)?;
    let path = format!("/data/profiles/{user_id}");
    let call = OutboundCall {
        method: Method::DELETE,
        path: &path,
        query: Vec::new(),
        body: None,
        bearer: None,
    };
    state.data().call(call, &envelope).await?.into_result()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": SERVICE_NAME }))
}

pub fn app(state: ServiceState, fabric: FabricState) -> Router {
    let router = Router::new()
        .route("/profiles/check", get(check_profile))
        .route("/profiles/{user_id}", get(get_profile))
        .route("/profiles", axum::routing::post(create_profile))
        .route(
            "/profile",
            get(current_profile).put(update_profile).delete(delete_profile),
        )
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    standard_stack(router, fabric, AuthMode::User, true)
}
