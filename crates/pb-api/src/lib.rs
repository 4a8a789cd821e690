//! PostBus HTTP surface
//!
//! Thin axum layer over the platform services:
//! - admission middleware (global and sensitive windows, `429` + `Retry-After`)
//! - caller identity from the gateway's `x-user-id` header
//! - post, search and media routes
//! - `/health` and Prometheus `/metrics`

pub mod admission;
pub mod error;
pub mod identity;
pub mod routes;
pub mod server;

pub use admission::{with_admission, TOO_MANY_REQUESTS};
pub use error::{ApiError, ApiResult, Envelope};
pub use identity::{caller_identity, AuthenticatedUser, USER_ID_HEADER};
pub use routes::{health_router, media_router, posts_router, search_router};
pub use server::{build_app, install_metrics_recorder, serve, shutdown_signal};
