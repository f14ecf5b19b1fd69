//! API middleware: request ids, access logging, and user authentication.

use axum::{
    body::Body,
    extract::Request,
    http::{header::HeaderName, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::execution::tokens_match;
use crate::storage::{SqliteStorage, User};

/// Header name for request ID.
pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Request ID extension for handlers.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Ensure every request carries a request id, propagated to the response.
///
/// Incoming `X-Request-ID` headers are only trusted when
/// `PARAPET_TRUST_REQUEST_ID=true`.
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let trust_incoming = std::env::var("PARAPET_TRUST_REQUEST_ID")
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(false);

    let request_id = if trust_incoming {
        request
            .headers()
            .get(&REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    } else {
        Uuid::new_v4().to_string()
    };

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER.clone(), header_value);
    }

    response
}

/// Structured access logging. Disable with `PARAPET_ACCESS_LOG=false`.
pub async fn access_log_middleware(request: Request<Body>, next: Next) -> Response {
    let enabled = std::env::var("PARAPET_ACCESS_LOG")
        .map(|v| v.to_lowercase() != "false")
        .unwrap_or(true);

    if !enabled {
        return next.run(request).await;
    }

    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request.extensions().get::<RequestId>().map(|r| r.0.clone());

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status().as_u16();
    crate::metrics::record_http_request(method.as_str(), status);
    crate::metrics::record_http_duration(duration, method.as_str());

    info!(
        target: "parapet::access",
        method = %method,
        path = %path,
        status = status,
        duration_ms = duration.as_millis() as u64,
        request_id = ?request_id,
        "request completed"
    );

    response
}

/// Extract the bearer token from an Authorization header, accepting both
/// `Bearer <key>` and `ApiKey <key>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|header| {
            header
                .strip_prefix("Bearer ")
                .or_else(|| header.strip_prefix("ApiKey "))
        })
}

/// Resolve the calling user from their api key.
///
/// The lookup is by key, but the final accept runs a constant-time compare
/// against the stored value.
pub async fn authenticate_user(storage: &SqliteStorage, headers: &HeaderMap) -> Result<User> {
    let token =
        bearer_token(headers).ok_or_else(|| Error::Unauthorized("No api key supplied".to_string()))?;

    let user = storage
        .get_user_by_api_key(token)
        .await?
        .filter(|user| tokens_match(&user.api_key, token))
        .ok_or_else(|| Error::Unauthorized("Invalid api key".to_string()))?;

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Org;

    fn headers_with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(value).unwrap(),
        );
        headers
    }

    #[test]
    fn test_bearer_token_formats() {
        assert_eq!(
            bearer_token(&headers_with_auth("Bearer abc")),
            Some("abc")
        );
        assert_eq!(
            bearer_token(&headers_with_auth("ApiKey xyz")),
            Some("xyz")
        );
        assert_eq!(bearer_token(&headers_with_auth("Basic abc")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_authenticate_user() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .set_user(&User {
                id: "user-1".to_string(),
                username: "alice".to_string(),
                role: "admin".to_string(),
                api_key: "valid-key".to_string(),
                active_org: Org {
                    id: "org-1".to_string(),
                    ..Org::default()
                },
            })
            .await
            .unwrap();

        let user = authenticate_user(&storage, &headers_with_auth("Bearer valid-key"))
            .await
            .unwrap();
        assert_eq!(user.username, "alice");

        assert!(
            authenticate_user(&storage, &headers_with_auth("Bearer wrong"))
                .await
                .is_err()
        );
        assert!(authenticate_user(&storage, &HeaderMap::new()).await.is_err());
    }
}
