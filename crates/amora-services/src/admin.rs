//! Admin service - operator login and moderation endpoints behind the
//! admin-token middleware variant.

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

use amora_core::client::{Method, OutboundCall};
use amora_core::config::{ConfigError, require_env};
use amora_core::envelope::RequestEnvelope;
use amora_core::error::{ApiError, ApiResult};
use amora_core::metrics::metrics_handler;
use amora_core::middleware::{AuthMode, FabricState, audit, standard_stack};
use amora_core::security::{ACCESS_TOKEN_TTL_SECS, generate_admin_token};

use crate::state::ServiceState;

pub const SERVICE_NAME: &str = "admin-service";

#[derive(Clone)]
pub struct AdminState {
    pub service: ServiceState,
    credentials: Arc<AdminCredentials>,
}

struct AdminCredentials {
    jwt_secret: String,
    admin_password: String,
}

impl AdminState {
    /// `ADMIN_PASSWORD` is mandatory; startup fails without it.
    pub fn new(service: ServiceState) -> Result<Self, ConfigError> {
        let jwt_secret = service.settings().jwt_secret.clone();
        let admin_password = require_env("ADMIN_PASSWORD")?;
        Ok(Self {
            service,
            credentials: Arc::new(AdminCredentials {
                jwt_secret,
                admin_password,
            }),
        })
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

/// `POST /admin/login` - password exchange for an admin bearer token.
async fn login(
    State(state): State<AdminState>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let password = body
        .get("password")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::MissingField("password".into()))?;

    if !constant_time_eq(password, &state.credentials.admin_password) {
        warn!("admin login rejected: bad credentials");
        audit::audit_log("unauthorized_access", None, SERVICE_NAME, None);
        return Err(ApiError::InvalidToken("invalid credentials".into()));
    }

    let token = generate_admin_token(1, &state.credentials.jwt_secret)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    audit::audit_log("admin_login", None, SERVICE_NAME, None);

    Ok(Json(json!({
        "access_token": token,
        "token_type": "bearer",
        "expires_in": ACCESS_TOKEN_TTL_SECS,
    })))
}

/// `GET /admin/stats`
async fn stats(
    State(state): State<AdminState>,
    Extension(envelope): Extension<RequestEnvelope>,
) -> ApiResult<Json<Value>> {
    let result = state.service.data().get("/data/admin/stats", &envelope).await?;
    Ok(Json(result.into_result()?))
}

/// `GET /admin/users`
async fn list_users(
    State(state): State<AdminState>,
    Extension(envelope): Extension<RequestEnvelope>,
) -> ApiResult<Json<Value>> {
    let result = state.service.data().get("/data/admin/users", &envelope).await?;
    Ok(Json(result.into_result()?))
}

/// `POST /admin/users/{user_id}/ban`
async fn ban_user(
    State(state): State<AdminState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let path = format!("/data/admin/users/{user_id}/ban");
    let result = state
        .service
        .data()
        .post(&path, json!({}), &envelope)
        .await?
        .into_result()?;
    audit::audit_log(
        "admin_user_ban",
        envelope.principal.admin_id(),
        SERVICE_NAME,
        Some(json!({ "banned_user_id": user_id })),
    );
    Ok(Json(result))
}

/// `POST /admin/users/{user_id}/unban`
async fn unban_user(
    State(state): State<AdminState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let path = format!("/data/admin/users/{user_id}/unban");
    let result = state
        .service
        .data()
        .post(&path, json!({}), &envelope)
        .await?
        .into_result()?;
    audit::audit_log(
        "admin_user_unban",
        envelope.principal.admin_id(),
        SERVICE_NAME,
        Some(json!({ "unbanned_user_id": user_id })),
    );
    Ok(Json(result))
}

/// `PUT /admin/photos/{photo_id}` - moderation verdict passthrough.
async fn moderate_photo(
    State(state): State<AdminState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Path(photo_id): Path<i64>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let path = format!("/data/admin/photos/{photo_id}");
    let call = OutboundCall {
        method: Method::PUT,
        path: &path,
        query: Vec::new(),
        body: Some(body),
        bearer: None,
    };
    let result = state.service.data().call(call, &envelope).await?;
    Ok(Json(result.into_result()?))
}

/// `POST /admin/moderation` - bulk moderation actions.
async fn moderation(
    State(state): State<AdminState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let result = state
        .service
        .data()
        .post("/data/admin/moderation", body, &envelope)
        .await?;
    Ok(Json(result.into_result()?))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": SERVICE_NAME }))
}

pub fn app(state: AdminState, fabric: FabricState) -> Router {
    let router = Router::new()
        .route("/admin/login", post(login))
        .route("/admin/stats", get(stats))
        .route("/admin/users", get(list_users))
        .route("/admin/users/{user_id}/ban", post(ban_user))
        .route("/admin/users/{user_id}/unban", post(unban_user))
        .route("/admin/photos/{photo_id}", put(moderate_photo))
        .route("/admin/moderation", post(moderation))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    standard_stack(router, fabric, AuthMode::Admin, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_comparison_is_exact() {
        assert!(constant_time_eq("hunter2", "hunter2"));
        assert!(!constant_time_eq("hunter2", "hunter3"));
        assert!(!constant_time_eq("hunter2", "hunter22"));
    }
}
