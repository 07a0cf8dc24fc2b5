//! Amora API gateway - the single ingress for the platform.
//!
//! Routes versioned paths to downstream services, strips version prefixes,
//! redirects legacy (unversioned) paths with `301`, enforces CORS against
//! exactly one configured origin, and propagates correlation IDs. The
//! gateway performs **no retries**: resilience is the caller-side
//! responsibility of business services, and any downstream failure maps to
//! `503 {"error":"Service unavailable"}`.
//!
//! # Route table
//!
//! | Prefix | Rewrite | Target |
//! |--------|---------|--------|
//! | `/v1/auth/*` | strip `/v1/auth` | auth |
//! | `/v1/{profiles,profile,discovery,media,chat,admin,notifications}/*` | strip `/v1` | same-name service |
//! | `/api/v1/auth/*` | `/auth/…` | auth |
//! | `/api/v1/profile[s]/*` | `/profiles/…` | profile |
//! | `/api/v1/{discover,like,pass,matches,favorites}/*` | `/discovery/…` | discovery |
//! | `/api/v1/photos/*` | `/media/…` | media |
//! | `/api/v1/notifications/*` | `/notifications/…` | notification |
//! | `/api/v1/admin/*` | `/admin-panel/…` | admin |
//! | unversioned legacy | `301` to `/v1/…` or `/api/v1/…` | - |

pub mod config;
pub mod proxy;
pub mod routes;
pub mod server;

pub use config::GatewayConfig;
pub use server::{GatewayServer, GatewayState};
