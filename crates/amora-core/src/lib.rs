//! Amora request fabric - the shared envelope every service request traverses.
//!
//! This crate provides the cross-cutting concerns that sit underneath all
//! Amora edge services: the uniform error envelope, the request envelope
//! (trace, correlation, principal), the normative middleware chain, two-tier
//! rate limiting, the circuit-breaker and retry primitives, and the
//! resilience-wrapped outbound client used for every inter-service call.
//!
//! # Middleware chain
//!
//! Services wrap their handler stack in this exact sequence (see
//! [`middleware::standard_stack`]); the order is observable behavior:
//!
//! 1. error handler
//! 2. distributed tracing
//! 3. correlation ID
//! 4. user context
//! 5. request logging
//! 6. rate limiting
//! 7. metrics
//! 8. audit logging
//! 9. authentication
//!
//! # Example
//!
//! ```rust,no_run
//! use amora_core::middleware::{standard_stack, AuthMode, FabricState};
//! use axum::{routing::get, Router};
//!
//! let fabric = FabricState::new("profile-service", Some("secret".into()));
//! let app: Router = standard_stack(
//!     Router::new().route("/profiles/check", get(|| async { "ok" })),
//!     fabric,
//!     AuthMode::User,
//!     true,
//! );
//! ```

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod resilience;
pub mod security;

pub use client::{OutboundCall, ServiceClient, ServiceResponse};
pub use config::ConfigError;
pub use envelope::{Principal, RequestEnvelope};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::{AuthMode, FabricState};
pub use resilience::{BreakerConfig, BreakerError, CircuitBreaker, CircuitState, RetryPolicy};
