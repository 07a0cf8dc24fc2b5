//! Uniform error envelope shared by every service.
//!
//! Every HTTP status >= 400 on the wire parses as
//! `{"error":{"code":…,"message":…,"details":…,"retry_after":…}}` where the
//! code belongs to the catalog below. HTTP status is set separately from the
//! code; clients may parse `error.code` but must treat unknown codes as the
//! categorical status family.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;

/// Standardized error codes for the matchmaking platform.
///
/// Grouped by prefix: `AUTH` (authentication/authorization), `VAL`
/// (validation), `BIZ` (business rule), `EXT` (external dependency),
/// `RATE` (rate limit), `SYS` (internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Authentication & authorization
    AuthenticationRequired,
    InvalidToken,
    TokenExpired,
    InsufficientPermissions,
    InvalidCredentials,
    AccountLocked,
    AccountSuspended,
    // Validation
    ValidationError,
    RequiredFieldMissing,
    InvalidFormat,
    ValueTooLong,
    ValueTooShort,
    InvalidRange,
    DuplicateValue,
    InvalidEmail,
    InvalidPhone,
    InvalidDate,
    InvalidAge,
    InvalidLocation,
    // Business logic
    ResourceNotFound,
    ResourceAlreadyExists,
    OperationNotAllowed,
    QuotaExceeded,
    FeatureNotAvailable,
    UserNotEligible,
    MatchNotFound,
    ConversationNotFound,
    MessageNotFound,
    ProfileIncomplete,
    VerificationRequired,
    // External services
    ExternalServiceError,
    DatabaseError,
    StorageError,
    EmailServiceError,
    SmsServiceError,
    PaymentServiceError,
    TelegramApiError,
    GeocodingError,
    ImageProcessingError,
    // Rate limiting
    RateLimitExceeded,
    TooManyRequests,
    DailyLimitExceeded,
    HourlyLimitExceeded,
    // System
    InternalServerError,
    ServiceUnavailable,
    TimeoutError,
    ConfigurationError,
    MaintenanceMode,
    UpgradeRequired,
}

impl ErrorCode {
    /// Wire value for the `error.code` field.
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::AuthenticationRequired => "AUTH_001",
            ErrorCode::InvalidToken => "AUTH_002",
            ErrorCode::TokenExpired => "AUTH_003",
            ErrorCode::InsufficientPermissions => "AUTH_004",
            ErrorCode::InvalidCredentials => "AUTH_005",
            ErrorCode::AccountLocked => "AUTH_006",
            ErrorCode::AccountSuspended => "AUTH_007",
            ErrorCode::ValidationError => "VAL_001",
            ErrorCode::RequiredFieldMissing => "VAL_002",
            ErrorCode::InvalidFormat => "VAL_003",
            ErrorCode::ValueTooLong => "VAL_004",
            ErrorCode::ValueTooShort => "VAL_005",
            ErrorCode::InvalidRange => "VAL_006",
            ErrorCode::DuplicateValue => "VAL_007",
            ErrorCode::InvalidEmail => "VAL_008",
            ErrorCode::InvalidPhone => "VAL_009",
            ErrorCode::InvalidDate => "VAL_010",
            ErrorCode::InvalidAge => "VAL_011",
            ErrorCode::InvalidLocation => "VAL_012",
            ErrorCode::ResourceNotFound => "BIZ_001",
            ErrorCode::ResourceAlreadyExists => "BIZ_002",
            ErrorCode::OperationNotAllowed => "BIZ_003",
            ErrorCode::QuotaExceeded => "BIZ_004",
            ErrorCode::FeatureNotAvailable => "BIZ_005",
            ErrorCode::UserNotEligible => "BIZ_006",
            ErrorCode::MatchNotFound => "BIZ_007",
            ErrorCode::ConversationNotFound => "BIZ_008",
            ErrorCode::MessageNotFound => "BIZ_009",
            ErrorCode::ProfileIncomplete => "BIZ_010",
            ErrorCode::VerificationRequired => "BIZ_011",
            ErrorCode::ExternalServiceError => "EXT_001",
            ErrorCode::DatabaseError => "EXT_002",
            ErrorCode::StorageError => "EXT_003",
            ErrorCode::EmailServiceError => "EXT_004",
            ErrorCode::SmsServiceError => "EXT_005",
            ErrorCode::PaymentServiceError => "EXT_006",
            ErrorCode::TelegramApiError => "EXT_007",
            ErrorCode::GeocodingError => "EXT_008",
            ErrorCode::ImageProcessingError => "EXT_009",
            ErrorCode::RateLimitExceeded => "RATE_001",
            ErrorCode::TooManyRequests => "RATE_002",
            ErrorCode::DailyLimitExceeded => "RATE_003",
            ErrorCode::HourlyLimitExceeded => "RATE_004",
            ErrorCode::InternalServerError => "SYS_001",
            ErrorCode::ServiceUnavailable => "SYS_002",
            ErrorCode::TimeoutError => "SYS_003",
            ErrorCode::ConfigurationError => "SYS_004",
            ErrorCode::MaintenanceMode => "SYS_005",
            ErrorCode::UpgradeRequired => "SYS_006",
        }
    }

    /// Whether a wire value belongs to the catalog.
    pub fn is_known(code: &str) -> bool {
        let Some((prefix, num)) = code.rsplit_once('_') else {
            return false;
        };
        let Ok(n) = num.parse::<u32>() else {
            return false;
        };
        match prefix {
            "AUTH" => (1..=7).contains(&n),
            "VAL" => (1..=12).contains(&n),
            "BIZ" => (1..=11).contains(&n),
            "EXT" => (1..=9).contains(&n),
            "RATE" => (1..=4).contains(&n),
            "SYS" => (1..=6).contains(&n),
            _ => false,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain errors raised inside handlers.
///
/// Errors propagate upward through the middleware chain until the
/// error-handler layer serializes them; intermediate layers never swallow.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("authentication required")]
    AuthenticationRequired,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    TokenExpired,

    #[error("insufficient permissions")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("rate limit exceeded for {scope}")]
    RateLimited { scope: String, retry_after: u64 },

    #[error("{service} temporarily unavailable")]
    ServiceUnavailable { service: String },

    #[error("{service} error: {message}")]
    ExternalService {
        service: String,
        message: String,
        details: Option<Value>,
    },

    /// A 4xx envelope received from an upstream service, surfaced verbatim.
    #[error("upstream returned {status}")]
    Upstream { status: u16, body: Value },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::Validation(_) => ErrorCode::ValidationError,
            ApiError::MissingField(_) => ErrorCode::RequiredFieldMissing,
            ApiError::AuthenticationRequired => ErrorCode::AuthenticationRequired,
            ApiError::InvalidToken(_) => ErrorCode::InvalidToken,
            ApiError::TokenExpired => ErrorCode::TokenExpired,
            ApiError::Forbidden => ErrorCode::InsufficientPermissions,
            ApiError::NotFound(_) => ErrorCode::ResourceNotFound,
            ApiError::AlreadyExists(_) => ErrorCode::ResourceAlreadyExists,
            ApiError::RateLimited { .. } => ErrorCode::RateLimitExceeded,
            ApiError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            ApiError::ExternalService { .. } => ErrorCode::ExternalServiceError,
            ApiError::Upstream { .. } => ErrorCode::ExternalServiceError,
            ApiError::Internal(_) => ErrorCode::InternalServerError,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::MissingField(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::AuthenticationRequired
            | ApiError::InvalidToken(_)
            | ApiError::TokenExpired => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::AlreadyExists(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ApiError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            ApiError::MissingField(field) => Some(json!({ "field": field })),
            ApiError::ExternalService { details, .. } => details.clone(),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Upstream 4xx envelopes are mirrored verbatim so the caller sees the
        // originating service's error, not a re-wrapped one.
        if let ApiError::Upstream { status, body } = &self {
            let status =
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY);
            return (status, Json(body.clone())).into_response();
        }

        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = %self.code(), error = %self, "server error");
        }

        let mut error = json!({
            "code": self.code().as_str(),
            "message": self.to_string(),
        });
        if let Some(details) = self.details() {
            error["details"] = details;
        }
        if let Some(secs) = self.retry_after() {
            error["retry_after"] = json!(secs);
        }

        let mut response = (status, Json(json!({ "error": error }))).into_response();
        if let Some(secs) = self.retry_after()
            && let Ok(value) = HeaderValue::from_str(&secs.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn envelope_shape_is_uniform() {
        let response = ApiError::NotFound("Profile".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "BIZ_001");
        assert_eq!(body["error"]["message"], "Profile not found");
    }

    #[tokio::test]
    async fn rate_limited_carries_retry_after_header_and_field() {
        let response = ApiError::RateLimited {
            scope: "/auth/validate".into(),
            retry_after: 60,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "60");
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "RATE_001");
        assert_eq!(body["error"]["retry_after"], 60);
    }

    #[tokio::test]
    async fn upstream_envelope_is_mirrored_verbatim() {
        let upstream = json!({ "error": { "code": "VAL_007", "message": "duplicate" } });
        let response = ApiError::Upstream {
            status: 409,
            body: upstream.clone(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await, upstream);
    }

    #[test]
    fn catalog_membership() {
        assert!(ErrorCode::is_known("AUTH_001"));
        assert!(ErrorCode::is_known("SYS_006"));
        assert!(ErrorCode::is_known("VAL_012"));
        assert!(!ErrorCode::is_known("VAL_013"));
        assert!(!ErrorCode::is_known("FOO_001"));
        assert!(!ErrorCode::is_known("AUTH_"));
    }

    #[test]
    fn status_mapping_matches_catalog() {
        assert_eq!(
            ApiError::Validation("bad".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::ServiceUnavailable { service: "data-service".into() }.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::ExternalService {
                service: "data-service".into(),
                message: "boom".into(),
                details: None,
            }
            .status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
