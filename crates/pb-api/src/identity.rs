//! Caller identity
//!
//! Token introspection happens upstream; the gateway forwards the
//! authenticated user id in `x-user-id`.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
    response::{IntoResponse, Response},
};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Extractor for requests that carry an authenticated user
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header(&parts.headers, USER_ID_HEADER)
            .map(|id| AuthenticatedUser(id.to_string()))
            .ok_or_else(|| ApiError::unauthorized("Authentication required! Please login to continue").into_response())
    }
}

/// Admission key: the authenticated user when known, otherwise the client
/// address (first `x-forwarded-for` hop, then the socket peer).
pub fn caller_identity(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
    if let Some(user) = header(headers, USER_ID_HEADER) {
        return format!("user:{}", user);
    }

    let forwarded = header(headers, FORWARDED_FOR_HEADER)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return format!("ip:{}", ip);
    }

    match peer {
        Some(ConnectInfo(addr)) => format!("ip:{}", addr.ip()),
        None => "anonymous".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_identity_precedence() {
        let peer = ConnectInfo(SocketAddr::from(([10, 0, 0, 9], 4000)));
        let mut headers = HeaderMap::new();
        assert_eq!(caller_identity(&headers, None), "anonymous");
        assert_eq!(caller_identity(&headers, Some(&peer)), "ip:10.0.0.9");

        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(caller_identity(&headers, Some(&peer)), "ip:203.0.113.7");

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("u1"));
        assert_eq!(caller_identity(&headers, Some(&peer)), "user:u1");
    }

    #[test]
    fn test_blank_user_header_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("  "));
        assert_eq!(caller_identity(&headers, None), "anonymous");
    }
}
