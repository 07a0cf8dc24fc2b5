//! Auth service - exchanges a platform-signed login blob for a token pair
//! and validates/refreshes tokens.
//!
//! Uses the auth-variant middleware stack (no bearer enforcement: this
//! service issues the tokens), plus the brute-force auth limiter and, when
//! configured, Telegram origin validation on `/auth/*`.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::warn;

use amora_core::error::{ApiError, ApiResult};
use amora_core::metrics::{AUTH_ATTEMPTS, JWT_TOKENS_CREATED, metrics_handler};
use amora_core::middleware::{AuthMode, FabricState, audit, rate_limit, standard_stack};
use amora_core::security::{
    ACCESS_TOKEN_TTL_SECS, TOKEN_TYPE_ACCESS, TOKEN_TYPE_REFRESH, generate_token_pair,
    validate_init_data, validate_typed_token,
};

pub const SERVICE_NAME: &str = "auth-service";

struct AuthInner {
    jwt_secret: String,
    /// When set, `/auth/*` requests must prove Telegram WebApp origin.
    telegram_secret: Option<String>,
}

#[derive(Clone)]
pub struct AuthState {
    inner: Arc<AuthInner>,
}

impl AuthState {
    pub fn new(jwt_secret: String, telegram_secret: Option<String>) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                jwt_secret,
                telegram_secret,
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Telegram origin validation (supplemental /auth/* guard)
// ─────────────────────────────────────────────────────────────────────────────

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

fn header_str<'r>(req: &'r Request, name: &str) -> &'r str {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn telegram_origin_ok(req: &Request, expected_secret: &str) -> bool {
    let origin = header_str(req, "origin");
    if !origin.starts_with("https://web.telegram.org") {
        warn!(origin, "invalid Origin header");
        return false;
    }
    let referer = header_str(req, "referer");
    if !referer.is_empty() && !referer.starts_with("https://web.telegram.org") {
        warn!(referer, "invalid Referer header");
        return false;
    }
    if !header_str(req, "user-agent").contains("TelegramBot") {
        warn!("invalid User-Agent");
        return false;
    }
    let secret = header_str(req, "x-telegram-bot-api-secret-token");
    if !constant_time_eq(secret, expected_secret) {
        warn!("invalid X-Telegram-Bot-Api-Secret-Token");
        return false;
    }
    true
}

async fn telegram_security_layer(
    State(state): State<AuthState>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path();
    let applies = path.starts_with("/auth/") && !path.starts_with("/auth/health");
    if let Some(secret) = &state.inner.telegram_secret
        && applies
        && !telegram_origin_ok(&req, secret)
    {
        audit::audit_log("suspicious_activity", None, SERVICE_NAME, None);
        return ApiError::Forbidden.into_response();
    }
    next.run(req).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

fn required_str(body: &Value, field: &str) -> ApiResult<String> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::MissingField(field.to_string()))
}

/// `POST /auth/validate` - verify a Telegram WebApp login blob and issue an
/// access + refresh pair.
async fn validate(
    State(state): State<AuthState>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let init_data = required_str(&body, "init_data")?;
    let bot_token = required_str(&body, "bot_token")?;

    let user = validate_init_data(&init_data, &bot_token).map_err(|e| {
        AUTH_ATTEMPTS
            .with_label_values(&[SERVICE_NAME, "failure", "telegram_webapp"])
            .inc();
        warn!(error = %e, "initData validation failed");
        ApiError::from(e)
    })?;

    let tokens = generate_token_pair(user.id, &state.inner.jwt_secret)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    AUTH_ATTEMPTS
        .with_label_values(&[SERVICE_NAME, "success", "telegram_webapp"])
        .inc();
    for token_type in [TOKEN_TYPE_ACCESS, TOKEN_TYPE_REFRESH] {
        JWT_TOKENS_CREATED
            .with_label_values(&[SERVICE_NAME, token_type])
            .inc();
    }
    audit::audit_log(
        "user_login",
        Some(user.id),
        SERVICE_NAME,
        Some(json!({ "method": "telegram_webapp", "username": user.username })),
    );

    Ok(Json(json!({
        "access_token": tokens.access_token,
        "refresh_token": tokens.refresh_token,
        "user_id": user.id,
        "username": user.username,
        "expires_in": ACCESS_TOKEN_TTL_SECS,
    })))
}

/// `POST /auth/refresh` - exchange a refresh token for a new access token.
async fn refresh(
    State(state): State<AuthState>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let refresh_token = required_str(&body, "refresh_token")?;

    let claims = validate_typed_token(&refresh_token, &state.inner.jwt_secret, TOKEN_TYPE_REFRESH)?;
    let user_id = claims
        .user_id
        .ok_or_else(|| ApiError::InvalidToken("missing user_id".into()))?;

    let tokens = generate_token_pair(user_id, &state.inner.jwt_secret)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    JWT_TOKENS_CREATED
        .with_label_values(&[SERVICE_NAME, TOKEN_TYPE_ACCESS])
        .inc();
    audit::audit_log("token_refresh", Some(user_id), SERVICE_NAME, None);

    Ok(Json(json!({
        "access_token": tokens.access_token,
        "user_id": user_id,
        "expires_in": ACCESS_TOKEN_TTL_SECS,
    })))
}

/// `GET /auth/verify` - bearer-protected echo confirming token validity.
async fn verify(
    State(state): State<AuthState>,
    req: Request,
) -> ApiResult<Json<Value>> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::AuthenticationRequired)?;

    let claims = validate_typed_token(token, &state.inner.jwt_secret, TOKEN_TYPE_ACCESS)?;
    Ok(Json(json!({ "valid": true, "user_id": claims.user_id })))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": SERVICE_NAME }))
}

/// Assemble the auth service router with its variant middleware stack.
pub fn app(state: AuthState, fabric: FabricState) -> Router {
    let router = Router::new()
        .route("/auth/validate", post(validate))
        .route("/auth/refresh", post(refresh))
        .route("/auth/verify", get(verify))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        // Brute-force guard runs inside the standard chain, right before
        // the handlers.
        .layer(from_fn_with_state(fabric.clone(), rate_limit::auth_layer))
        .layer(from_fn_with_state(state.clone(), telegram_security_layer))
        .with_state(state);

    standard_stack(router, fabric, AuthMode::Disabled, true)
}
