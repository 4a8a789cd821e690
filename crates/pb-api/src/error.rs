//! JSON rejection envelope: `{"success": false, "message": "..."}`

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use pb_common::PostBusError;
use pb_platform::PlatformError;
use serde::Serialize;
use tracing::error;

use crate::admission::TOO_MANY_REQUESTS;

#[derive(Debug, Serialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
}

impl Envelope {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    /// Seconds for the `Retry-After` header
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }
}

impl From<PlatformError> for ApiError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::NotFound { entity_type, .. } => {
                Self::new(StatusCode::NOT_FOUND, format!("{} not found", entity_type))
            }
            PlatformError::Validation { message } => Self::new(StatusCode::BAD_REQUEST, message),
            PlatformError::Unauthorized { message } => Self::unauthorized(message),
            other => {
                error!(error = %other, "Request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

impl From<PostBusError> for ApiError {
    fn from(err: PostBusError) -> Self {
        match err {
            PostBusError::RateLimitExceeded { retry_after_secs, .. } => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                message: TOO_MANY_REQUESTS.to_string(),
                retry_after: Some(retry_after_secs),
            },
            other if other.is_retryable() => {
                error!(error = %other, "Dependency unavailable");
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable")
            }
            other => {
                error!(error = %other, "Request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(Envelope::failure(self.message))).into_response();
        if let Some(secs) = self.retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_error_renders_429_with_retry_after() {
        let err = PostBusError::RateLimitExceeded {
            identity: "user:u1".to_string(),
            retry_after_secs: 7,
        };
        let response = ApiError::from(err).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "7");
    }

    #[test]
    fn test_transient_infrastructure_error_is_503() {
        let api = ApiError::from(PostBusError::CacheUnavailable("down".to_string()));
        assert_eq!(api.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(api.retry_after.is_none());

        let api = ApiError::from(PostBusError::ShutdownInProgress);
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
