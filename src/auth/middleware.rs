use std::convert::Infallible;
use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::Cookie;

use crate::auth::cookies::{CSRF_COOKIE, clear_cookie, csrf_cookie, is_secure};
use crate::auth::error::AuthError;
use crate::auth::sessions::{RequestMeta, SessionState};
use crate::auth::token::{random_token, tokens_equal};
use crate::auth::{CsrfToken, CurrentUser};
use crate::error::{AppError, retry_after_secs};
use crate::{AppState, MAX_BODY_BYTES};

pub const LOGIN_PATH: &str = "/auth/login";
pub const ACCOUNT_PATH: &str = "/account";
pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_FORM_FIELD: &str = "csrf_token";

const CSRF_TOKEN_BYTES: usize = 32;
const MAX_USER_AGENT_LEN: usize = 512;

// ---------------------------------------------------------------------------
// Browser sessions
// ---------------------------------------------------------------------------

/// Resolve the session cookie and attach [`CurrentUser`] when it is valid.
///
/// Invalid cookies are expired on the response. Storage failures degrade to
/// an anonymous request.
pub async fn load_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let session_config = &state.config.auth.session;
    if session_config.skips(request.uri().path()) {
        return next.run(request).await;
    }

    let jar = CookieJar::from_headers(request.headers());
    let Some(raw) = jar.get(&session_config.cookie_name).map(|c| c.value().to_string()) else {
        return next.run(request).await;
    };

    let mut expire_cookie = false;
    match state.sessions.validate(&raw) {
        Ok(SessionState::Authenticated { user, session }) => {
            state.sessions.touch_in_background(&session);
            request.extensions_mut().insert(CurrentUser(user));
        }
        Ok(SessionState::Anonymous { clear_cookie }) => expire_cookie = clear_cookie,
        Err(err) => {
            tracing::warn!(error = %err, "Session lookup failed, continuing anonymously");
        }
    }

    let secure = is_secure(&state.config, request.headers());
    let mut response = next.run(request).await;
    if expire_cookie {
        append_cookie(
            &mut response,
            &clear_cookie(&session_config.cookie_name, "/", secure),
        );
    }
    response
}

/// Only signed-in users pass. htmx requests get a 401 with `HX-Redirect`,
/// everything else a 303 to the login page.
pub async fn require_authenticated(request: Request, next: Next) -> Response {
    if request.extensions().get::<CurrentUser>().is_some() {
        return next.run(request).await;
    }
    if is_htmx(request.headers()) {
        return (StatusCode::UNAUTHORIZED, [("hx-redirect", LOGIN_PATH)]).into_response();
    }
    Redirect::to(LOGIN_PATH).into_response()
}

/// Only anonymous visitors pass. Signed-in users go to their account page.
pub async fn require_anonymous(request: Request, next: Next) -> Response {
    if request.extensions().get::<CurrentUser>().is_some() {
        return Redirect::to(ACCOUNT_PATH).into_response();
    }
    next.run(request).await
}

pub fn is_htmx(headers: &HeaderMap) -> bool {
    headers
        .get("hx-request")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

// ---------------------------------------------------------------------------
// API bearer tokens
// ---------------------------------------------------------------------------

/// Axum middleware that validates a Bearer access token and injects the
/// [`ApiPrincipal`](crate::auth::api_tokens::ApiPrincipal) into request
/// extensions.
pub async fn require_api_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let manager = state.api_tokens()?;
    let token = extract_bearer_token(&request)?;
    let principal = manager.validate_access(&token).map_err(|err| {
        tracing::debug!(error = %err, "Rejected access token");
        AppError::Unauthorized("unauthorized".to_string())
    })?;

    tracing::debug!(
        user_id = principal.user_id,
        family_id = %principal.family_id,
        "Authenticated API request"
    );

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Extract the Bearer token from the Authorization header.
fn extract_bearer_token(request: &Request) -> Result<String, AppError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

    let value = header
        .to_str()
        .map_err(|_| AppError::Unauthorized("invalid authorization header".to_string()))?;

    let (scheme, token) = value
        .trim()
        .split_once(' ')
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::Unauthorized(
            "authorization header must use bearer scheme".to_string(),
        ));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::Unauthorized("missing bearer token".to_string()));
    }

    Ok(token.to_string())
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// `POST /auth/login/{provider}`
pub async fn limit_oauth_start(State(state): State<AppState>, request: Request, next: Next) -> Response {
    rate_limited(&state, "web_oauth_start", request, next).await
}

/// `POST /api/auth/login/{provider}`
pub async fn limit_api_login(State(state): State<AppState>, request: Request, next: Next) -> Response {
    rate_limited(&state, "api_auth_login", request, next).await
}

/// `POST /api/auth/refresh`
pub async fn limit_api_refresh(State(state): State<AppState>, request: Request, next: Next) -> Response {
    rate_limited(&state, "api_auth_refresh", request, next).await
}

async fn rate_limited(state: &AppState, scope: &str, request: Request, next: Next) -> Response {
    let ip = client_ip(
        request.headers(),
        request.extensions(),
        state.config.server.trust_proxy_headers,
    );
    match state.rate_limiter.allow(&format!("{scope}:{ip}")) {
        Ok(()) => next.run(request).await,
        Err(wait) => {
            tracing::warn!(scope, ip = %ip, "Rate limit exceeded");
            if request.uri().path().starts_with("/api/") {
                AppError::from(AuthError::RateLimited { retry_after: wait }).into_response()
            } else {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_after_secs(wait).to_string())],
                    "rate limit exceeded",
                )
                    .into_response()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CSRF
// ---------------------------------------------------------------------------

/// Double-submit CSRF check for the web surface.
///
/// Every non-API request gets a `csrf_token` cookie. Unsafe methods must echo
/// it in the `X-CSRF-Token` header or the `csrf_token` form field.
pub async fn csrf_protection(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.uri().path().starts_with("/api/") {
        return next.run(request).await;
    }

    let secure = is_secure(&state.config, request.headers());
    let existing = CookieJar::from_headers(request.headers())
        .get(CSRF_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty());
    let (token, issued) = match existing {
        Some(token) => (token, false),
        None => match random_token(CSRF_TOKEN_BYTES) {
            Ok(token) => (token, true),
            Err(err) => return AppError::from(err).into_response(),
        },
    };

    if !is_safe_method(request.method()) {
        let (parts, body) = request.into_parts();
        let header_token = parts
            .headers
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let (submitted, body) = match header_token {
            Some(submitted) => (Some(submitted), body),
            None if is_form(&parts.headers) => {
                let Ok(bytes) = axum::body::to_bytes(body, MAX_BODY_BYTES).await else {
                    return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
                };
                (form_field(&bytes, CSRF_FORM_FIELD), Body::from(bytes))
            }
            None => (None, body),
        };

        let valid = !issued && submitted.is_some_and(|s| tokens_equal(s.trim(), &token));
        if !valid {
            tracing::warn!(path = %parts.uri.path(), method = %parts.method, "CSRF check failed");
            let mut response = (StatusCode::FORBIDDEN, "invalid csrf token").into_response();
            if issued {
                append_cookie(&mut response, &csrf_cookie(&token, secure));
            }
            return response;
        }
        request = Request::from_parts(parts, body);
    }

    request.extensions_mut().insert(CsrfToken(token.clone()));
    let mut response = next.run(request).await;
    if issued {
        append_cookie(&mut response, &csrf_cookie(&token, secure));
    }
    response
}

fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"))
}

fn form_field(body: &[u8], name: &str) -> Option<String> {
    url::form_urlencoded::parse(body)
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

// ---------------------------------------------------------------------------
// Client metadata
// ---------------------------------------------------------------------------

/// Best-effort client IP. Proxy headers are only honoured when trusted.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        let header_value = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        if let Some(ip) = header_value("x-real-ip") {
            return ip;
        }
        if let Some(ip) = header_value("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|first| first.trim().to_string()))
            .filter(|v| !v.is_empty())
        {
            return ip;
        }
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn request_meta(headers: &HeaderMap, extensions: &Extensions, trust_proxy_headers: bool) -> RequestMeta {
    let user_agent: String = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default()
        .chars()
        .take(MAX_USER_AGENT_LEN)
        .collect();
    RequestMeta {
        ip: client_ip(headers, extensions, trust_proxy_headers),
        user_agent,
    }
}

/// Extractor for the [`RequestMeta`] recorded on new sessions.
pub struct ClientMeta(pub RequestMeta);

impl FromRequestParts<AppState> for ClientMeta {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Self(request_meta(
            &parts.headers,
            &parts.extensions,
            state.config.server.trust_proxy_headers,
        )))
    }
}

pub(crate) fn append_cookie(response: &mut Response, cookie: &Cookie<'_>) {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(err) => tracing::error!(cookie = cookie.name(), error = %err, "Unencodable cookie"),
    }
}
