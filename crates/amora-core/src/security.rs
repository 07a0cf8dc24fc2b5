//! Token issuing and verification.
//!
//! Access and refresh tokens are signed with a symmetric HS256 secret that
//! is process-global configuration; startup fails when it is absent. Refresh
//! tokens are distinguishable from access tokens by the `token_type` claim.
//!
//! The Telegram WebApp `initData` check lives here as the collaborator
//! primitive the auth service delegates to; the rest of the fabric never
//! touches it.

use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

/// Access token lifetime surfaced to clients as `expires_in`.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 3600;
/// Refresh token lifetime.
pub const REFRESH_TOKEN_TTL_SECS: i64 = 30 * 24 * 3600;
/// Telegram `auth_date` freshness window.
const INIT_DATA_MAX_AGE_SECS: i64 = 24 * 3600;

pub const TOKEN_TYPE_ACCESS: &str = "access";
pub const TOKEN_TYPE_REFRESH: &str = "refresh";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("wrong token type: expected {expected}")]
    WrongType { expected: &'static str },
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => ApiError::TokenExpired,
            TokenError::Invalid(msg) => ApiError::InvalidToken(msg),
            TokenError::WrongType { expected } => {
                ApiError::InvalidToken(format!("expected {expected} token"))
            }
        }
    }
}

/// JWT claims carried by both token types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<i64>,
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

fn sign(claims: &Claims, secret: &str) -> Result<String, TokenError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| TokenError::Invalid(e.to_string()))
}

fn user_claims(user_id: i64, token_type: &str, ttl_secs: i64) -> Claims {
    let now = Utc::now();
    Claims {
        user_id: Some(user_id),
        admin_id: None,
        token_type: token_type.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::seconds(ttl_secs)).timestamp(),
    }
}

/// Issue an access + refresh pair for a user.
pub fn generate_token_pair(user_id: i64, secret: &str) -> Result<TokenPair, TokenError> {
    Ok(TokenPair {
        access_token: sign(&user_claims(user_id, TOKEN_TYPE_ACCESS, ACCESS_TOKEN_TTL_SECS), secret)?,
        refresh_token: sign(
            &user_claims(user_id, TOKEN_TYPE_REFRESH, REFRESH_TOKEN_TTL_SECS),
            secret,
        )?,
    })
}

/// Issue an admin access token.
pub fn generate_admin_token(admin_id: i64, secret: &str) -> Result<String, TokenError> {
    let now = Utc::now();
    sign(
        &Claims {
            user_id: None,
            admin_id: Some(admin_id),
            token_type: TOKEN_TYPE_ACCESS.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ACCESS_TOKEN_TTL_SECS)).timestamp(),
        },
        secret,
    )
}

/// Verify signature and expiry, returning the claims.
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.required_spec_claims.clear();
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid(e.to_string()),
        })
}

/// Verify an access token and require the given type.
pub fn validate_typed_token(
    token: &str,
    secret: &str,
    expected_type: &'static str,
) -> Result<Claims, TokenError> {
    let claims = validate_token(token, secret)?;
    if claims.token_type != expected_type {
        return Err(TokenError::WrongType { expected: expected_type });
    }
    Ok(claims)
}

// ─────────────────────────────────────────────────────────────────────────────
// Telegram WebApp initData verification
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InitDataError {
    #[error("invalid_init_data: missing hash")]
    MissingHash,

    #[error("invalid_init_data: signature mismatch")]
    SignatureMismatch,

    #[error("invalid_init_data: stale auth_date")]
    Stale,

    #[error("invalid_init_data: {0}")]
    Malformed(String),
}

impl From<InitDataError> for ApiError {
    fn from(err: InitDataError) -> Self {
        ApiError::InvalidToken(err.to_string())
    }
}

/// User identity embedded in validated initData.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Verify a Telegram WebApp `initData` blob against the bot token.
///
/// The check string is every key=value pair except `hash`, sorted by key and
/// joined with newlines; the signing key is `HMAC-SHA256("WebAppData",
/// bot_token)`. `auth_date` must be within the freshness window.
pub fn validate_init_data(init_data: &str, bot_token: &str) -> Result<TelegramUser, InitDataError> {
    let pairs: Vec<(String, String)> = form_urlencoded::parse(init_data.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let hash = pairs
        .iter()
        .find(|(k, _)| k == "hash")
        .map(|(_, v)| v.clone())
        .ok_or(InitDataError::MissingHash)?;

    let mut check_pairs: Vec<&(String, String)> =
        pairs.iter().filter(|(k, _)| k != "hash").collect();
    check_pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let check_string = check_pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n");

    let mut secret = HmacSha256::new_from_slice(b"WebAppData")
        .map_err(|e| InitDataError::Malformed(e.to_string()))?;
    secret.update(bot_token.as_bytes());
    let secret_key = secret.finalize().into_bytes();

    let mut mac = HmacSha256::new_from_slice(&secret_key)
        .map_err(|e| InitDataError::Malformed(e.to_string()))?;
    mac.update(check_string.as_bytes());
    let provided =
        hex::decode(hash.as_bytes()).map_err(|_| InitDataError::SignatureMismatch)?;
    // verify_slice is constant-time
    mac.verify_slice(&provided)
        .map_err(|_| InitDataError::SignatureMismatch)?;

    let auth_date: i64 = pairs
        .iter()
        .find(|(k, _)| k == "auth_date")
        .and_then(|(_, v)| v.parse().ok())
        .ok_or_else(|| InitDataError::Malformed("missing auth_date".into()))?;
    if Utc::now().timestamp() - auth_date > INIT_DATA_MAX_AGE_SECS {
        return Err(InitDataError::Stale);
    }

    let user_json = pairs
        .iter()
        .find(|(k, _)| k == "user")
        .map(|(_, v)| v.clone())
        .ok_or_else(|| InitDataError::Malformed("missing user".into()))?;
    serde_json::from_str(&user_json).map_err(|e| InitDataError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-jwt-secret";

    #[test]
    fn token_pair_round_trips() {
        let pair = generate_token_pair(42, SECRET).unwrap();
        let access = validate_typed_token(&pair.access_token, SECRET, TOKEN_TYPE_ACCESS).unwrap();
        assert_eq!(access.user_id, Some(42));
        let refresh =
            validate_typed_token(&pair.refresh_token, SECRET, TOKEN_TYPE_REFRESH).unwrap();
        assert_eq!(refresh.token_type, TOKEN_TYPE_REFRESH);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let pair = generate_token_pair(42, SECRET).unwrap();
        let err =
            validate_typed_token(&pair.refresh_token, SECRET, TOKEN_TYPE_ACCESS).unwrap_err();
        assert!(matches!(err, TokenError::WrongType { expected: "access" }));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let pair = generate_token_pair(42, SECRET).unwrap();
        assert!(matches!(
            validate_token(&pair.access_token, "other-secret"),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn admin_token_has_admin_claim_only() {
        let token = generate_admin_token(7, SECRET).unwrap();
        let claims = validate_token(&token, SECRET).unwrap();
        assert_eq!(claims.admin_id, Some(7));
        assert_eq!(claims.user_id, None);
    }

    fn signed_init_data(bot_token: &str, auth_date: i64) -> String {
        let user = r#"{"id":99,"username":"amora_fan","first_name":"A"}"#;
        let mut pairs = vec![
            ("auth_date".to_string(), auth_date.to_string()),
            ("query_id".to_string(), "AAF9".to_string()),
            ("user".to_string(), user.to_string()),
        ];
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let check_string = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\n");

        let mut secret = HmacSha256::new_from_slice(b"WebAppData").unwrap();
        secret.update(bot_token.as_bytes());
        let secret_key = secret.finalize().into_bytes();
        let mut mac = HmacSha256::new_from_slice(&secret_key).unwrap();
        mac.update(check_string.as_bytes());
        let hash = hex::encode(mac.finalize().into_bytes());

        let mut encoded = form_urlencoded::Serializer::new(String::new());
        for (k, v) in &pairs {
            encoded.append_pair(k, v);
        }
        encoded.append_pair("hash", &hash);
        encoded.finish()
    }

    #[test]
    fn valid_init_data_yields_user() {
        let blob = signed_init_data("12345:bot-token", Utc::now().timestamp());
        let user = validate_init_data(&blob, "12345:bot-token").unwrap();
        assert_eq!(user.id, 99);
        assert_eq!(user.username.as_deref(), Some("amora_fan"));
    }

    #[test]
    fn tampered_init_data_is_rejected() {
        let blob = signed_init_data("12345:bot-token", Utc::now().timestamp());
        let tampered = blob.replace("99", "11");
        assert_eq!(
            validate_init_data(&tampered, "12345:bot-token").unwrap_err(),
            InitDataError::SignatureMismatch
        );
    }

    #[test]
    fn wrong_bot_token_is_rejected() {
        let blob = signed_init_data("12345:bot-token", Utc::now().timestamp());
        assert_eq!(
            validate_init_data(&blob, "other-token").unwrap_err(),
            InitDataError::SignatureMismatch
        );
    }

    #[test]
    fn stale_auth_date_is_rejected() {
        let blob =
            signed_init_data("12345:bot-token", Utc::now().timestamp() - 2 * 24 * 3600);
        assert_eq!(
            validate_init_data(&blob, "12345:bot-token").unwrap_err(),
            InitDataError::Stale
        );
    }

    #[test]
    fn missing_hash_is_rejected() {
        assert_eq!(
            validate_init_data("auth_date=1&user=%7B%7D", "t").unwrap_err(),
            InitDataError::MissingHash
        );
    }
}
