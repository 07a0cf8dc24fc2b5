//! Environment-driven configuration shared by every service binary.
//!
//! Configuration keys are read in canonical UPPERCASE form only. Mandatory
//! keys fail startup; optional keys fall back to the in-cluster defaults
//! used by the deployment manifests.

use std::env;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingKey(&'static str),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Read a mandatory key; startup fails when it is absent or empty.
pub fn require_env(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingKey(key)),
    }
}

/// Read an optional key with a fallback.
pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

/// Read an optional key, `None` when absent or empty.
pub fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

pub fn env_port(key: &'static str, default: u16) -> Result<u16, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value.parse().map_err(|_| ConfigError::InvalidValue {
            key,
            value,
        }),
        _ => Ok(default),
    }
}

/// Base URLs of every downstream service, resolvable from any process.
#[derive(Debug, Clone)]
pub struct ServiceUrls {
    pub auth: String,
    pub profile: String,
    pub discovery: String,
    pub media: String,
    pub chat: String,
    pub admin: String,
    pub notification: String,
    pub data: String,
    pub bot: String,
}

impl ServiceUrls {
    pub fn from_env() -> Self {
        Self {
            auth: env_or("AUTH_SERVICE_URL", "http://auth-service:8081"),
            profile: env_or("PROFILE_SERVICE_URL", "http://profile-service:8082"),
            discovery: env_or("DISCOVERY_SERVICE_URL", "http://discovery-service:8083"),
            media: env_or("MEDIA_SERVICE_URL", "http://media-service:8084"),
            chat: env_or("CHAT_SERVICE_URL", "http://chat-service:8085"),
            admin: env_or("ADMIN_SERVICE_URL", "http://admin-service:8086"),
            notification: env_or("NOTIFICATION_SERVICE_URL", "http://notification-service:8087"),
            data: env_or("DATA_SERVICE_URL", "http://data-service:8088"),
            bot: env_or("BOT_URL", "http://telegram-bot:8080"),
        }
    }
}

/// Common per-service settings: bind address, signing secret, broker URL.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub host: String,
    pub port: u16,
    /// Symmetric JWT signing secret. Required for every service that
    /// verifies tokens; the auth service also signs with it.
    pub jwt_secret: String,
    pub rabbitmq_url: Option<String>,
    pub urls: ServiceUrls,
}

impl ServiceSettings {
    /// Load settings for a token-verifying service. Fails when `JWT_SECRET`
    /// is absent.
    pub fn from_env(host_key: &str, port_key: &'static str, default_port: u16) -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_or(host_key, "0.0.0.0"),
            port: env_port(port_key, default_port)?,
            jwt_secret: require_env("JWT_SECRET")?,
            rabbitmq_url: env_opt("RABBITMQ_URL"),
            urls: ServiceUrls::from_env(),
        })
    }
}
