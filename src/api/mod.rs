pub mod auth;
pub mod health;

use axum::Router;
use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};

use crate::AppState;
use crate::auth::middleware::{limit_api_login, limit_api_refresh, require_api_auth};
use crate::error::AppError;

/// Build the JSON API router.
///
/// Route layout:
/// ```text
/// /api/health                    GET    (no auth)
/// /api/auth/login/{provider}     POST   (rate limited)
/// /api/auth/refresh              POST   (rate limited)
/// /api/auth/logout               POST
/// /api/auth/me                   GET    (bearer access token)
/// ```
pub fn build_api_router(state: AppState) -> Router<AppState> {
    let login = Router::new()
        .route("/api/auth/login/{provider}", post(auth::login))
        .route_layer(middleware::from_fn_with_state(state.clone(), limit_api_login));

    let refresh = Router::new()
        .route("/api/auth/refresh", post(auth::refresh))
        .route_layer(middleware::from_fn_with_state(state.clone(), limit_api_refresh));

    let me = Router::new()
        .route("/api/auth/me", get(auth::me))
        .route_layer(middleware::from_fn_with_state(state, require_api_auth));

    Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/auth/logout", post(auth::logout))
        .merge(login)
        .merge(refresh)
        .merge(me)
}

/// Map a body read failure onto the API error shape.
fn body_rejection(rejection: BytesRejection) -> AppError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        AppError::BadRequest("invalid request body".to_string())
    }
}
