//! Error types for the authentication core.

use std::time::Duration;

/// Errors produced by the authentication core.
///
/// HTTP handlers convert these into [`crate::error::AppError`], which decides
/// how much of the detail reaches the client (usually none).
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed or missing input (blank code, unknown provider, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Bad, expired or rejected credential, or failed provider verification.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The verified email already belongs to a different account.
    #[error("Email already belongs to another account")]
    EmailConflict,

    /// The (provider, provider user id) pair is already linked.
    #[error("Identity already linked")]
    IdentityConflict,

    /// No such flow, session, user or token.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A refresh token that was already rotated, revoked or expired was
    /// presented again. The whole family has been revoked.
    #[error("Refresh token reuse detected")]
    TokenReuse { family_id: String },

    /// Too many attempts for this key in the current window.
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// A required secret or provider credential is not configured.
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// Storage, codec or entropy failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::EmailConflict | Self::IdentityConflict)
    }
}

impl From<rusqlite::Error> for AuthError {
    fn from(err: rusqlite::Error) -> Self {
        tracing::error!(error = %err, "Auth storage error");
        Self::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        // Provider calls sit in the login path and are never retried; any
        // transport failure (including the client timeout) is a failed login.
        tracing::warn!(error = %err, timeout = err.is_timeout(), "Identity provider request failed");
        Self::Unauthorized("identity provider request failed".to_string())
    }
}
