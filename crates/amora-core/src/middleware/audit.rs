//! Layer 8: audit logging for critical operations.
//!
//! A closed catalog maps operations to severity and category. Handlers (and
//! other layers) call [`audit_log`] directly; the middleware layer derives
//! the operation from the route for the write endpoints it recognizes.

use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use serde_json::Value;
use tracing::{error, info, warn};

use super::FabricState;
use crate::envelope::RequestEnvelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
}

/// Catalog of operations that require an audit trail.
pub const CRITICAL_OPERATIONS: &[(&str, AuditSeverity, &str)] = &[
    // Authentication
    ("user_login", AuditSeverity::Info, "authentication"),
    ("user_logout", AuditSeverity::Info, "authentication"),
    ("token_refresh", AuditSeverity::Info, "authentication"),
    ("password_change", AuditSeverity::Warning, "authentication"),
    // Profile
    ("profile_create", AuditSeverity::Info, "profile"),
    ("profile_update", AuditSeverity::Info, "profile"),
    ("profile_delete", AuditSeverity::Warning, "profile"),
    // Media
    ("file_upload", AuditSeverity::Info, "media"),
    ("file_delete", AuditSeverity::Warning, "media"),
    ("nsfw_detection", AuditSeverity::Warning, "media"),
    // Discovery
    ("profile_like", AuditSeverity::Info, "discovery"),
    ("profile_dislike", AuditSeverity::Info, "discovery"),
    ("match_created", AuditSeverity::Info, "discovery"),
    // Chat
    ("message_sent", AuditSeverity::Info, "chat"),
    ("conversation_started", AuditSeverity::Info, "chat"),
    // Admin
    ("admin_login", AuditSeverity::Warning, "admin"),
    ("admin_user_ban", AuditSeverity::Critical, "admin"),
    ("admin_user_unban", AuditSeverity::Warning, "admin"),
    ("admin_data_export", AuditSeverity::Warning, "admin"),
    // Security
    ("rate_limit_exceeded", AuditSeverity::Warning, "security"),
    ("suspicious_activity", AuditSeverity::Warning, "security"),
    ("unauthorized_access", AuditSeverity::Warning, "security"),
];

fn catalog_entry(operation: &str) -> Option<(AuditSeverity, &'static str)> {
    CRITICAL_OPERATIONS
        .iter()
        .find(|(name, _, _)| *name == operation)
        .map(|(_, severity, category)| (*severity, *category))
}

/// Emit a structured audit record for a cataloged operation.
///
/// Operations outside the catalog are silently ignored, so call sites do
/// not need to guard.
pub fn audit_log(operation: &str, user_id: Option<i64>, service: &str, details: Option<Value>) {
    let Some((severity, category)) = catalog_entry(operation) else {
        return;
    };
    let details = details.unwrap_or(Value::Null);
    match severity {
        AuditSeverity::Info => info!(
            event_type = "audit_log",
            operation,
            category,
            service,
            user_id,
            details = %details,
            "audit"
        ),
        AuditSeverity::Warning => warn!(
            event_type = "audit_log",
            operation,
            category,
            service,
            user_id,
            details = %details,
            "audit"
        ),
        AuditSeverity::Critical => error!(
            event_type = "audit_log",
            operation,
            category,
            service,
            user_id,
            details = %details,
            "audit"
        ),
    }
}

/// Route-derived operation for writes the middleware can recognize without
/// handler cooperation.
fn operation_for(method: &Method, path: &str) -> Option<&'static str> {
    match method.as_str() {
        "POST" => match path {
            "/auth/validate" => Some("user_login"),
            "/auth/refresh" => Some("token_refresh"),
            "/admin/login" => Some("admin_login"),
            "/profiles" => Some("profile_create"),
            "/discovery/like" => Some("profile_like"),
            "/discovery/pass" => Some("profile_dislike"),
            p if p.starts_with("/media/upload") => Some("file_upload"),
            p if p.starts_with("/chat/conversations/") && p.ends_with("/messages") => {
                Some("message_sent")
            }
            p if p.starts_with("/admin/users/") && p.ends_with("/ban") => {
                Some("admin_user_ban")
            }
            p if p.starts_with("/admin/users/") && p.ends_with("/unban") => {
                Some("admin_user_unban")
            }
            _ => None,
        },
        "PUT" | "PATCH" => match path {
            p if p.starts_with("/profiles") || p.starts_with("/profile") => {
                Some("profile_update")
            }
            _ => None,
        },
        "DELETE" => match path {
            p if p.starts_with("/profiles") || p.starts_with("/profile") => {
                Some("profile_delete")
            }
            p if p.starts_with("/media/") => Some("file_delete"),
            _ => None,
        },
        _ => None,
    }
}

pub async fn layer(State(fabric): State<FabricState>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let user_id = req
        .extensions()
        .get::<RequestEnvelope>()
        .and_then(|e| e.principal.user_id());

    let response = next.run(req).await;

    if response.status().is_success()
        && let Some(operation) = operation_for(&method, &path)
    {
        audit_log(operation, user_id, fabric.service_name(), None);
    }
    response
}
