//! Gateway server assembly: middleware, CORS, and the bound listener.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use amora_core::config::env_opt;
use amora_core::metrics::metrics_handler;
use amora_core::middleware::{
    FabricState, correlation, metrics as metrics_mw, request_logging, user_context, versioning,
};

use crate::config::GatewayConfig;
use crate::routes::{api_routes, internal_routes};

/// Total and connect timeouts for every proxied request.
const PROXY_TIMEOUT: Duration = Duration::from_secs(30);
const PROXY_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state injected into every gateway handler.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    pub http: reqwest::Client,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(PROXY_TIMEOUT)
            .connect_timeout(PROXY_CONNECT_TIMEOUT)
            .build()
            .expect("reqwest client construction");
        Self {
            config: Arc::new(config),
            http,
        }
    }
}

pub struct GatewayServer {
    config: GatewayConfig,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    /// CORS against exactly one origin from configuration. Wildcard is
    /// honored only when explicitly requested, and then without
    /// credentials.
    fn cors_layer(webapp_domain: Option<&str>) -> CorsLayer {
        let methods = [
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ];
        let allow_headers = [
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-requested-with"),
        ];

        let origin = match webapp_domain {
            Some(domain) => domain.to_string(),
            None => {
                warn!("WEBAPP_DOMAIN not configured - using restrictive development default");
                "https://localhost:3000".to_string()
            }
        };

        if origin == "*" {
            return CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(methods)
                .allow_headers(allow_headers);
        }

        let origin_value = origin
            .parse::<HeaderValue>()
            .unwrap_or_else(|_| HeaderValue::from_static("https://localhost:3000"));
        info!(origin = %origin, "CORS configured");
        CorsLayer::new()
            .allow_origin(origin_value)
            .allow_credentials(true)
            .allow_methods(methods)
            .allow_headers(allow_headers.clone())
            .expose_headers(allow_headers)
    }

    /// Build the gateway router: internal `/v1` routes, CORS-wrapped
    /// `/api` routes, health, metrics, and the reduced middleware stack
    /// (correlation, versioning, user context, request logging, metrics).
    pub fn build_app(&self) -> Router {
        let state = GatewayState::new(self.config.clone());
        let fabric = FabricState::new("api-gateway", env_opt("JWT_SECRET"));

        let cors = Self::cors_layer(self.config.webapp_domain.as_deref());

        Router::new()
            .merge(internal_routes())
            .merge(api_routes().layer(cors))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(from_fn_with_state(fabric.clone(), metrics_mw::layer))
            .layer(from_fn_with_state(fabric.clone(), request_logging::layer))
            .layer(from_fn_with_state(fabric.clone(), user_context::layer))
            .layer(from_fn(versioning::layer))
            .layer(from_fn(correlation::layer))
    }

    /// Bind and serve until the process exits.
    pub async fn start(self) -> std::io::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let app = self.build_app();
        info!(addr = %addr, "api-gateway starting");
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await
    }
}
