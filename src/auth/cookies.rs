//! Cookie builders for the session, API refresh and CSRF cookies.
//!
//! All cookies are `SameSite=Lax`. `Secure` is decided per request by
//! [`is_secure`].

use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{DateTime, Utc};
use time::OffsetDateTime;

use crate::config::Config;

/// Double-submit CSRF cookie. Readable by page scripts.
pub const CSRF_COOKIE: &str = "csrf_token";
/// The refresh cookie is only sent to the token endpoints.
pub const REFRESH_COOKIE_PATH: &str = "/api/auth";

/// `Secure` when forced by config, in production, or behind a TLS-terminating
/// proxy that reports `X-Forwarded-Proto: https`.
pub fn is_secure(config: &Config, headers: &HeaderMap) -> bool {
    if config.auth.session.cookie_secure || config.server.is_production() {
        return true;
    }
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
}

/// Browser session cookie, valid for the whole site until `expires_at`.
pub fn session_cookie(
    name: &str,
    token: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    secure: bool,
) -> Cookie<'static> {
    persistent(name, token, "/", expires_at, now, secure)
}

/// API refresh cookie, scoped to [`REFRESH_COOKIE_PATH`].
pub fn refresh_cookie(
    name: &str,
    token: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    secure: bool,
) -> Cookie<'static> {
    persistent(name, token, REFRESH_COOKIE_PATH, expires_at, now, secure)
}

/// CSRF cookie. Not `HttpOnly` so forms and htmx can echo it back.
pub fn csrf_cookie(token: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE, token.to_string()))
        .path("/")
        .http_only(false)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

/// An immediately-expiring cookie that overwrites `name` at `path`.
pub fn clear_cookie(name: &str, path: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((name.to_string(), String::new()))
        .path(path.to_string())
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::ZERO)
        .expires(OffsetDateTime::UNIX_EPOCH)
        .build()
}

fn persistent(
    name: &str,
    value: &str,
    path: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    secure: bool,
) -> Cookie<'static> {
    let max_age = (expires_at - now).num_seconds().max(0);
    let mut builder = Cookie::build((name.to_string(), value.to_string()))
        .path(path.to_string())
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::seconds(max_age));
    if let Ok(expires) = OffsetDateTime::from_unix_timestamp(expires_at.timestamp()) {
        builder = builder.expires(expires);
    }
    builder.build()
}
