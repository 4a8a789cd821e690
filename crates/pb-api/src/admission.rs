//! Admission middleware
//!
//! Runs before any handler. Every attempt is counted; a denied request never
//! reaches business logic and gets `429` with `Retry-After`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use pb_admission::{AdmissionLimiter, Decision};
use pb_common::PostBusError;
use tracing::warn;

use crate::error::ApiError;
use crate::identity::caller_identity;

pub const TOO_MANY_REQUESTS: &str = "Too many requests";

const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

pub async fn admission(State(limiter): State<Arc<AdmissionLimiter>>, request: Request, next: Next) -> Response {
    let identity = caller_identity(request.headers(), request.extensions().get::<ConnectInfo<SocketAddr>>());
    let path = request.uri().path().to_string();

    match limiter.consume(&identity, &path).await {
        Decision::Allowed(allowance) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(allowance.limit));
            if let Some(remaining) = allowance.remaining {
                headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
            }
            if let Some(reset) = allowance.reset_after {
                headers.insert(RATE_LIMIT_RESET, HeaderValue::from(reset.as_secs_f64().ceil() as u64));
            }
            response
        }
        denied @ Decision::Denied { .. } => {
            let retry_after = denied.retry_after_secs().unwrap_or(1);
            warn!(identity = %identity, path = %path, retry_after_secs = retry_after, "Rate limit exceeded");

            let denial = PostBusError::RateLimitExceeded {
                identity,
                retry_after_secs: retry_after,
            };
            let mut response = ApiError::from(denial).into_response();
            let headers = response.headers_mut();
            headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(0u64));
            headers.insert(RATE_LIMIT_RESET, HeaderValue::from(retry_after));
            response
        }
    }
}

/// Gate every route of `router` behind `limiter`
pub fn with_admission(router: Router, limiter: Arc<AdmissionLimiter>) -> Router {
    router.layer(middleware::from_fn_with_state(limiter, admission))
}
