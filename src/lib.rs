//! Gatehouse: authentication core for a server-rendered web app.
//!
//! Social login (Google, GitHub) with PKCE, cookie-backed browser sessions,
//! and short-lived API access tokens with rotating refresh tokens.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod web;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::middleware;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::auth::api_tokens::{AccessTokenCodec, ApiTokenManager};
use crate::auth::error::AuthError;
use crate::auth::flow::OAuthFlowStore;
use crate::auth::middleware::{CSRF_HEADER, csrf_protection, load_session};
use crate::auth::rate_limit::RateLimiter;
use crate::auth::sessions::SessionManager;
use crate::auth::social::SocialVerifier;
use crate::clock::Clock;
use crate::config::{Config, seconds};
use crate::db::Database;
use crate::error::AppError;

/// Request bodies above this size are rejected with 413.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub clock: Arc<dyn Clock>,
    pub flows: Arc<OAuthFlowStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub verifier: Arc<dyn SocialVerifier>,
    pub sessions: SessionManager,
    /// `None` while no access-token secret is configured.
    pub api_tokens: Option<Arc<ApiTokenManager>>,
}

impl AppState {
    pub fn new(
        config: Config,
        db: Database,
        clock: Arc<dyn Clock>,
        verifier: Arc<dyn SocialVerifier>,
    ) -> Result<Self, AuthError> {
        let auth = &config.auth;
        let flows = Arc::new(OAuthFlowStore::new(
            seconds(auth.oauth.flow_ttl_secs),
            clock.clone(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            auth.rate_limit.requests,
            seconds(auth.rate_limit.window_secs),
            clock.clone(),
        ));
        let sessions = SessionManager::new(
            db.clone(),
            clock.clone(),
            seconds(auth.session.ttl_secs),
            seconds(auth.session.touch_after_secs),
        );

        let api_tokens = match auth.api.secret() {
            Some(secret) => {
                let codec = AccessTokenCodec::new(
                    secret,
                    &auth.api.issuer,
                    &auth.api.audience,
                    seconds(auth.api.access_token_ttl_secs),
                )?;
                Some(Arc::new(ApiTokenManager::new(
                    db.clone(),
                    clock.clone(),
                    codec,
                    seconds(auth.api.refresh_token_ttl_secs),
                )))
            }
            None => {
                tracing::warn!("auth.api.access_token_secret is not set, API token endpoints are disabled");
                None
            }
        };

        Ok(Self {
            config: Arc::new(config),
            db,
            clock,
            flows,
            rate_limiter,
            verifier,
            sessions,
            api_tokens,
        })
    }

    /// The API token manager, or 503 when API auth is not configured.
    pub fn api_tokens(&self) -> Result<&ApiTokenManager, AppError> {
        self.api_tokens
            .as_deref()
            .ok_or_else(|| AppError::Unavailable("api auth is not configured".to_string()))
    }

    /// Drop expired in-memory entries and purge dead rows.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport {
            flows: self.flows.sweep(),
            rate_limit_buckets: self.rate_limiter.sweep(),
            ..SweepReport::default()
        };

        match self.sessions.purge_expired() {
            Ok(n) => report.sessions = n,
            Err(e) => tracing::warn!(error = %e, "Session purge failed"),
        }
        if let Some(manager) = &self.api_tokens {
            report.revoked_families = manager.revoked_families().sweep();
            match manager.purge_expired() {
                Ok(n) => report.refresh_tokens = n,
                Err(e) => tracing::warn!(error = %e, "Refresh token purge failed"),
            }
        }
        report
    }
}

/// Counts of entries removed by one [`AppState::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub flows: usize,
    pub rate_limit_buckets: usize,
    pub revoked_families: usize,
    pub sessions: usize,
    pub refresh_tokens: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.flows + self.rate_limit_buckets + self.revoked_families + self.sessions + self.refresh_tokens
    }
}

// ---------------------------------------------------------------------------
// Router assembly
// ---------------------------------------------------------------------------

/// Build the combined application router with all middleware layers.
pub fn build_app(state: AppState) -> Router {
    let config = &state.config;

    let cors = build_cors_layer(config);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let trace = TraceLayer::new_for_http();

    let timeout = TimeoutLayer::new(Duration::from_secs(config.server.request_timeout_secs.max(1)));

    Router::new()
        .merge(web::build_web_router(state.clone()))
        .merge(api::build_api_router(state.clone()))
        .layer(middleware::from_fn_with_state(state.clone(), csrf_protection))
        .layer(middleware::from_fn_with_state(state.clone(), load_session))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("permissions-policy"),
            HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
        ))
        .layer(timeout)
        .layer(propagate_id)
        .layer(request_id)
        .layer(trace)
        .layer(cors)
        .with_state(state)
}

/// CORS for the app's own origin only, with credentials.
fn build_cors_layer(config: &Config) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(CSRF_HEADER),
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(300));

    let origin = url::Url::parse(&config.server.app_url)
        .ok()
        .map(|url| url.origin().ascii_serialization())
        .and_then(|origin| HeaderValue::from_str(&origin).ok());
    match origin {
        Some(origin) => base.allow_origin([origin]),
        None => {
            tracing::warn!(app_url = %config.server.app_url, "No usable CORS origin");
            base
        }
    }
}
