//! Gateway configuration from the environment.

use amora_core::config::{ConfigError, ServiceUrls, env_opt, env_or, env_port};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub urls: ServiceUrls,
    /// Single allowed CORS origin. `"*"` enables the wildcard (without
    /// credentials); absence falls back to a restrictive development
    /// default.
    pub webapp_domain: Option<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_or("GATEWAY_HOST", "0.0.0.0"),
            port: env_port("GATEWAY_PORT", 8080)?,
            urls: ServiceUrls::from_env(),
            webapp_domain: env_opt("WEBAPP_DOMAIN"),
        })
    }
}
