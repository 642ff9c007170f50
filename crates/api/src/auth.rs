use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::response::ApiResponse;

pub const BEARER_PREFIX: &str = "Bearer ";

/// Bearer token authentication state shared with the middleware.
#[derive(Debug, Clone)]
pub struct AuthState {
    pub enabled: bool,
    pub tokens: Arc<HashSet<String>>,
}

impl AuthState {
    pub fn new(enabled: bool, tokens: Vec<String>) -> Self {
        Self {
            enabled,
            tokens: Arc::new(tokens.into_iter().collect()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication token")]
    MissingToken,
    #[error("Invalid authentication token")]
    InvalidToken,
    #[error("Malformed authorization header")]
    MalformedHeader,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingToken | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::MalformedHeader => StatusCode::BAD_REQUEST,
        }
    }
}

fn extract_bearer(request: &Request) -> Result<String, AuthError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?;
    let value = header.to_str().map_err(|_| AuthError::MalformedHeader)?;
    let token = value
        .strip_prefix(BEARER_PREFIX)
        .ok_or(AuthError::MalformedHeader)?;
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token.to_string())
}

/// Bearer token middleware applied to every `/api/v2` route.
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    if !auth.enabled {
        return next.run(request).await;
    }

    match extract_bearer(&request) {
        Ok(token) if auth.tokens.contains(&token) => next.run(request).await,
        Ok(_) => {
            warn!("rejected request with invalid bearer token");
            let error = AuthError::InvalidToken;
            let status = error.status();
            (status, ApiResponse::error(status, error.to_string())).into_response()
        }
        Err(error) => {
            let status = error.status();
            (status, ApiResponse::error(status, error.to_string())).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    fn request_with_auth(value: Option<&str>) -> Request {
        let mut builder = HttpRequest::builder().uri("/api/v2/gpus");
        if let Some(value) = value {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_extract_bearer_success() {
        let request = request_with_auth(Some("Bearer secret-token"));
        assert_eq!(extract_bearer(&request).unwrap(), "secret-token");
    }

    #[test]
    fn test_extract_bearer_missing_header() {
        let request = request_with_auth(None);
        assert!(matches!(
            extract_bearer(&request).unwrap_err(),
            AuthError::MissingToken
        ));
    }

    #[test]
    fn test_extract_bearer_malformed_scheme() {
        let request = request_with_auth(Some("Basic dXNlcjpwYXNz"));
        assert!(matches!(
            extract_bearer(&request).unwrap_err(),
            AuthError::MalformedHeader
        ));
    }

    #[test]
    fn test_extract_bearer_empty_token() {
        let request = request_with_auth(Some("Bearer "));
        assert!(matches!(
            extract_bearer(&request).unwrap_err(),
            AuthError::MissingToken
        ));
    }

    #[test]
    fn test_auth_error_status_codes() {
        assert_eq!(AuthError::MissingToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InvalidToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::MalformedHeader.status(),
            StatusCode::BAD_REQUEST
        );
    }
}
