use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::auth::error::AuthError;

/// Unified HTTP error type for the JSON surface.
///
/// The `Display` text is for logs. Clients only ever see [`AppError::public_message`].
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Authentication required: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Rate limited: {message}")]
    RateLimited { message: String, retry_after_secs: u64 },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body: `{"error": "..."}`.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message placed in the response body. Server-side failures are
    /// reduced to a fixed string.
    pub fn public_message(&self) -> String {
        match self {
            Self::BadRequest(msg)
            | Self::Unauthorized(msg)
            | Self::Conflict(msg)
            | Self::NotFound(msg)
            | Self::Unavailable(msg) => msg.clone(),
            Self::RateLimited { message, .. } => message.clone(),
            Self::PayloadTooLarge => "request body too large".to_string(),
            Self::Internal(_) => "internal server error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            error: self.public_message(),
        };
        let mut response = (status, axum::Json(body)).into_response();
        if let Self::RateLimited {
            retry_after_secs, ..
        } = self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidInput(msg) => Self::BadRequest(msg),
            // Reuse is reported exactly like any other bad refresh token.
            AuthError::Unauthorized(_) | AuthError::TokenReuse { .. } => {
                Self::Unauthorized("unauthorized".to_string())
            }
            AuthError::EmailConflict | AuthError::IdentityConflict => Self::Conflict(
                "account email is already used by another provider".to_string(),
            ),
            AuthError::NotFound(msg) => Self::NotFound(msg),
            AuthError::RateLimited { retry_after } => Self::RateLimited {
                message: "rate limit exceeded".to_string(),
                retry_after_secs: retry_after_secs(retry_after),
            },
            AuthError::NotConfigured(msg) => Self::Unavailable(msg),
            AuthError::Internal(msg) => Self::Internal(msg),
        }
    }
}

/// Whole seconds for a `Retry-After` header, rounded up, never zero.
pub fn retry_after_secs(wait: std::time::Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let response = AppError::Internal("disk on fire at /var/db".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "internal server error");
    }

    #[tokio::test]
    async fn test_rate_limited_sets_retry_after() {
        let response = AppError::RateLimited {
            message: "rate limit exceeded".into(),
            retry_after_secs: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[tokio::test]
    async fn test_token_reuse_is_plain_unauthorized() {
        let err: AppError = AuthError::TokenReuse {
            family_id: "fam".into(),
        }
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "unauthorized");
        assert!(!body.to_string().contains("fam"));
    }

    #[test]
    fn test_auth_error_status_mapping() {
        let cases: Vec<(AuthError, StatusCode)> = vec![
            (AuthError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (AuthError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (AuthError::EmailConflict, StatusCode::CONFLICT),
            (AuthError::IdentityConflict, StatusCode::CONFLICT),
            (AuthError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                AuthError::RateLimited {
                    retry_after: Duration::from_secs(3),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                AuthError::NotConfigured("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                AuthError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status_code(), expected);
        }
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(59)), 59);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }
}
