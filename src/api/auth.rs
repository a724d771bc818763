use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::body_rejection;
use crate::AppState;
use crate::auth::api_tokens::{ApiPrincipal, TokenPair};
use crate::auth::cookies::{REFRESH_COOKIE_PATH, clear_cookie, is_secure, refresh_cookie};
use crate::auth::error::AuthError;
use crate::auth::social::Provider;
use crate::auth::users::{self, User};
use crate::clock::Clock;
use crate::error::AppError;

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub code_verifier: String,
    #[serde(default)]
    pub redirect_uri: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub email: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub avatar_url: String,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub token_type: &'static str,
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

impl TokenResponse {
    fn new(pair: TokenPair, user: &User) -> Self {
        Self {
            token_type: "bearer",
            access_token: pair.access_token,
            access_token_expires_at: pair.access_token_expires_at,
            refresh_token: pair.refresh_token,
            refresh_token_expires_at: pair.refresh_token_expires_at,
            user: UserResponse::from(user),
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/auth/login/{provider}
///
/// Exchanges a provider authorization code obtained by a native or SPA client
/// for an access/refresh token pair.
pub async fn login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Result<Bytes, BytesRejection>,
) -> Result<(CookieJar, Json<TokenResponse>), AppError> {
    let manager = state.api_tokens()?;
    let oauth = &state.config.auth.oauth;
    let provider = provider
        .parse::<Provider>()
        .ok()
        .filter(|p| oauth.is_enabled(*p))
        .ok_or_else(|| AppError::BadRequest("provider is not configured".to_string()))?;

    let body = body.map_err(body_rejection)?;
    let request: LoginRequest = serde_json::from_slice(&body)
        .map_err(|_| AppError::BadRequest("invalid json".to_string()))?;
    let code = request.code.trim();
    let code_verifier = request.code_verifier.trim();
    let redirect_uri = request.redirect_uri.trim();
    if code.is_empty() || code_verifier.is_empty() || redirect_uri.is_empty() {
        return Err(AppError::BadRequest(
            "code, code_verifier, and redirect_uri are required".to_string(),
        ));
    }

    let credentials = oauth.credentials(provider);
    let profile = state
        .verifier
        .exchange_and_verify(provider, code, code_verifier, redirect_uri, &credentials)
        .await
        .map_err(|err| {
            tracing::warn!(provider = %provider, error = %err, "API social login failed");
            AppError::Unauthorized("oauth login failed".to_string())
        })?;

    let user = users::find_or_create_social_user(&state.db, &profile, state.clock.now())
        .map_err(|err| match err {
            AuthError::EmailConflict | AuthError::IdentityConflict => AppError::from(err),
            other => {
                tracing::error!(provider = %provider, error = %other, "Failed to resolve social user");
                AppError::Internal("failed to sign in user".to_string())
            }
        })?;
    let pair = manager.issue_token_pair(user.id)?;

    tracing::info!(user_id = user.id, provider = %provider, family_id = %pair.family_id, "API login");

    let jar = jar.add(refresh_cookie(
        &state.config.auth.api.refresh_cookie_name,
        &pair.refresh_token,
        pair.refresh_token_expires_at,
        state.clock.now(),
        is_secure(&state.config, &headers),
    ));
    Ok((jar, Json(TokenResponse::new(pair, &user))))
}

/// POST /api/auth/refresh
///
/// Rotates the presented refresh token. Reuse of an already-rotated token
/// revokes its whole family and is reported like any other invalid token.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, AppError> {
    let manager = state.api_tokens()?;
    let cookie_name = &state.config.auth.api.refresh_cookie_name;
    let secure = is_secure(&state.config, &headers);

    let raw = presented_refresh_token(&jar, cookie_name, body)?
        .ok_or_else(|| AppError::BadRequest("refresh_token is required".to_string()))?;

    let rotated = manager.rotate(&raw).and_then(|pair| {
        let user = users::find_by_id(&state.db, pair.user_id)?;
        Ok((pair, user))
    });
    let (pair, user) = match rotated {
        Ok(rotated) => rotated,
        Err(err) => {
            match &err {
                AuthError::TokenReuse { family_id } => {
                    tracing::warn!(family_id = %family_id, "Refresh token reuse detected, family revoked");
                }
                AuthError::Unauthorized(_) | AuthError::NotFound(_) => {
                    tracing::debug!(error = %err, "Refresh rejected");
                }
                // The rotation rolled back, so the presented token is still good.
                _ => {
                    tracing::error!(error = %err, "Refresh token rotation failed");
                    return Err(err.into());
                }
            }
            let jar = jar.add(clear_cookie(cookie_name, REFRESH_COOKIE_PATH, secure));
            let error = AppError::Unauthorized("invalid refresh token".to_string());
            return Ok((jar, error).into_response());
        }
    };

    tracing::debug!(user_id = user.id, family_id = %pair.family_id, "Refresh token rotated");

    let jar = jar.add(refresh_cookie(
        cookie_name,
        &pair.refresh_token,
        pair.refresh_token_expires_at,
        state.clock.now(),
        secure,
    ));
    Ok((jar, Json(TokenResponse::new(pair, &user))).into_response())
}

/// POST /api/auth/logout
///
/// Revokes only the presented refresh token. Always answers 204.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, CookieJar), AppError> {
    let cookie_name = &state.config.auth.api.refresh_cookie_name;
    let raw = presented_refresh_token(&jar, cookie_name, body)?;

    if let (Some(raw), Some(manager)) = (raw, state.api_tokens.as_deref()) {
        if let Err(err) = manager.revoke_token(&raw) {
            tracing::warn!(error = %err, "Failed to revoke refresh token on logout");
        }
    }

    let jar = jar.add(clear_cookie(
        cookie_name,
        REFRESH_COOKIE_PATH,
        is_secure(&state.config, &headers),
    ));
    Ok((StatusCode::NO_CONTENT, jar))
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    Extension(principal): Extension<ApiPrincipal>,
) -> Result<Json<UserResponse>, AppError> {
    let user = users::find_by_id(&state.db, principal.user_id).map_err(|err| match err {
        AuthError::NotFound(_) => AppError::Unauthorized("user not found".to_string()),
        other => other.into(),
    })?;
    Ok(Json(UserResponse::from(&user)))
}

/// The refresh token from the cookie, else from a `{"refresh_token"}` body.
///
/// An empty body is not an error.
fn presented_refresh_token(
    jar: &CookieJar,
    cookie_name: &str,
    body: Result<Bytes, BytesRejection>,
) -> Result<Option<String>, AppError> {
    if let Some(token) = jar
        .get(cookie_name)
        .map(|c| c.value().trim())
        .filter(|v| !v.is_empty())
    {
        return Ok(Some(token.to_string()));
    }

    let body = body.map_err(body_rejection)?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let request: RefreshRequest = serde_json::from_slice(&body)
        .map_err(|_| AppError::BadRequest("invalid json".to_string()))?;
    let token = request.refresh_token.trim();
    Ok((!token.is_empty()).then(|| token.to_string()))
}
