//! Server-rendered pages and the browser OAuth flow.
//!
//! Pages are rendered from embedded templates via minijinja. Sign-in uses
//! the authorization code flow with PKCE. On success the user gets a session
//! cookie and is sent back to where they started.

pub mod templates;

use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Extension, Form, Router, middleware};
use axum_extra::extract::CookieJar;
use minijinja::{Environment, Value, context};
use serde::Deserialize;

use crate::AppState;
use crate::api::health::health_check;
use crate::auth::cookies::{clear_cookie, is_secure, session_cookie};
use crate::auth::middleware::{
    ACCOUNT_PATH, ClientMeta, LOGIN_PATH, limit_oauth_start, require_anonymous,
    require_authenticated,
};
use crate::auth::social::{Provider, authorization_url, callback_url};
use crate::auth::token::code_challenge;
use crate::auth::users::{self, User};
use crate::auth::{CsrfToken, CurrentUser};
use crate::clock::Clock;

/// Error codes carried on `/auth/login?error=...`.
pub const ERROR_PROVIDER_NOT_CONFIGURED: &str = "provider_not_configured";
pub const ERROR_OAUTH_FAILED: &str = "oauth_failed";
pub const ERROR_ACCOUNT_CONFLICT: &str = "account_conflict";

// ---------------------------------------------------------------------------
// Template engine
// ---------------------------------------------------------------------------

const TEMPLATES: [(&str, &str); 5] = [
    ("layout.html", templates::LAYOUT),
    ("home.html", templates::HOME),
    ("login.html", templates::LOGIN),
    ("account.html", templates::ACCOUNT),
    ("not_found.html", templates::NOT_FOUND),
];

/// Build a minijinja environment with all embedded templates registered.
fn template_env() -> Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();
    for (name, source) in TEMPLATES {
        env.add_template(name, source)?;
    }
    Ok(env)
}

/// Render a template by name with the given minijinja context.
fn render(template_name: &str, ctx: Value) -> Response {
    let rendered = template_env().and_then(|env| {
        let tmpl = env.get_template(template_name)?;
        tmpl.render(ctx)
    });
    match rendered {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            tracing::error!(template = template_name, error = %err, "Template render error");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render page").into_response()
        }
    }
}

/// The signed-in user as the layout sees it.
fn user_value(user: Option<&User>) -> Value {
    match user {
        Some(user) => context! {
            display_name => &user.display_name,
            email => &user.email,
            avatar_url => &user.avatar_url,
        },
        None => Value::from(()),
    }
}

fn csrf_value(csrf: Option<&Extension<CsrfToken>>) -> String {
    csrf.map(|Extension(CsrfToken(token))| token.clone())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Public router builder
// ---------------------------------------------------------------------------

/// Build the web router.
///
/// ```text
/// /                          GET    (anyone)
/// /healthz                   GET    (anyone)
/// /auth/login                GET    (guests)
/// /auth/login/{provider}     POST   (guests, rate limited)
/// /auth/callback/{provider}  GET    (guests)
/// /auth/logout               POST   (signed in)
/// /account                   GET    (signed in)
/// ```
pub fn build_web_router(state: AppState) -> Router<AppState> {
    let guest = Router::new()
        .route(LOGIN_PATH, get(login_page))
        .route("/auth/callback/{provider}", get(oauth_callback))
        .route_layer(middleware::from_fn(require_anonymous));

    // The rate limit runs before the guest check.
    let start = Router::new()
        .route("/auth/login/{provider}", post(start_login))
        .route_layer(middleware::from_fn(require_anonymous))
        .route_layer(middleware::from_fn_with_state(state, limit_oauth_start));

    let signed_in = Router::new()
        .route(ACCOUNT_PATH, get(account_page))
        .route("/auth/logout", post(logout))
        .route_layer(middleware::from_fn(require_authenticated));

    Router::new()
        .route("/", get(home_page))
        .route("/healthz", get(health_check))
        .merge(guest)
        .merge(start)
        .merge(signed_in)
        .fallback(not_found_page)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Keep `next` only when it is a same-site absolute path.
pub fn sanitize_next(next: &str) -> &str {
    let next = next.trim();
    if !next.starts_with('/') || next.starts_with("//") || next.starts_with("/\\") {
        return ACCOUNT_PATH;
    }
    next
}

/// Human-readable text for a login error code. Unknown codes show nothing.
pub fn login_error_message(code: &str) -> Option<&'static str> {
    match code {
        ERROR_PROVIDER_NOT_CONFIGURED => Some("Provider is not configured yet."),
        ERROR_OAUTH_FAILED => Some("Sign in failed. Please try again."),
        ERROR_ACCOUNT_CONFLICT => Some(
            "An account with the same email already exists under another provider. \
             Linking is not supported in this starter yet.",
        ),
        _ => None,
    }
}

fn login_error(code: &str) -> Redirect {
    Redirect::to(&format!("{LOGIN_PATH}?error={code}"))
}

// ---------------------------------------------------------------------------
// Page handlers
// ---------------------------------------------------------------------------

async fn home_page(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
    csrf: Option<Extension<CsrfToken>>,
) -> Response {
    let user = user.map(|Extension(CurrentUser(user))| user);
    render(
        "home.html",
        context! {
            app_name => &state.config.server.app_name,
            user => user_value(user.as_ref()),
            csrf_token => csrf_value(csrf.as_ref()),
        },
    )
}

#[derive(Debug, Default, Deserialize)]
struct LoginQuery {
    #[serde(default)]
    error: String,
    #[serde(default)]
    next: String,
}

async fn login_page(
    State(state): State<AppState>,
    csrf: Option<Extension<CsrfToken>>,
    query: Result<Query<LoginQuery>, QueryRejection>,
) -> Response {
    let query = query.map(|Query(q)| q).unwrap_or_default();
    let providers: Vec<Value> = state
        .config
        .auth
        .oauth
        .enabled_providers()
        .into_iter()
        .map(|p| context! { id => p.as_str(), name => p.display_name() })
        .collect();

    render(
        "login.html",
        context! {
            app_name => &state.config.server.app_name,
            user => user_value(None),
            csrf_token => csrf_value(csrf.as_ref()),
            error => login_error_message(&query.error),
            providers => providers,
            next => sanitize_next(&query.next),
        },
    )
}

async fn account_page(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    csrf: Option<Extension<CsrfToken>>,
) -> Response {
    let identities = match users::list_identities(&state.db, user.id) {
        Ok(identities) => identities,
        Err(err) => {
            tracing::error!(user_id = user.id, error = %err, "Failed to load identities");
            return (StatusCode::INTERNAL_SERVER_ERROR, "failed to load account").into_response();
        }
    };

    let identities: Vec<Value> = identities
        .iter()
        .map(|identity| {
            let provider = identity
                .provider
                .parse::<Provider>()
                .map(|p| p.display_name().to_string())
                .unwrap_or_else(|_| identity.provider.clone());
            context! {
                provider => provider,
                provider_user_id => &identity.provider_user_id,
                handle => &identity.provider_handle,
                email => &identity.provider_email,
                linked => identity.created_at.format("%Y-%m-%d").to_string(),
            }
        })
        .collect();

    render(
        "account.html",
        context! {
            app_name => &state.config.server.app_name,
            user => user_value(Some(&user)),
            csrf_token => csrf_value(csrf.as_ref()),
            member_since => user.created_at.format("%B %-d, %Y").to_string(),
            identities => identities,
        },
    )
}

async fn not_found_page(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
    csrf: Option<Extension<CsrfToken>>,
) -> Response {
    let user = user.map(|Extension(CurrentUser(user))| user);
    let mut response = render(
        "not_found.html",
        context! {
            app_name => &state.config.server.app_name,
            user => user_value(user.as_ref()),
            csrf_token => csrf_value(csrf.as_ref()),
        },
    );
    if response.status().is_success() {
        *response.status_mut() = StatusCode::NOT_FOUND;
    }
    response
}

// ---------------------------------------------------------------------------
// OAuth flow
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct StartLoginForm {
    #[serde(default)]
    next: String,
}

/// POST /auth/login/{provider}
///
/// Opens a PKCE flow and sends the browser to the provider.
async fn start_login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    form: Result<Form<StartLoginForm>, FormRejection>,
) -> Redirect {
    let oauth = &state.config.auth.oauth;
    let provider = match provider.parse::<Provider>() {
        Ok(provider) if oauth.is_enabled(provider) => provider,
        _ => return login_error(ERROR_PROVIDER_NOT_CONFIGURED),
    };

    let next = form.map(|Form(form)| form.next).unwrap_or_default();
    let flow = match state.flows.create(provider, sanitize_next(&next)) {
        Ok(flow) => flow,
        Err(err) => {
            tracing::error!(provider = %provider, error = %err, "Failed to start OAuth flow");
            return login_error(ERROR_OAUTH_FAILED);
        }
    };

    let credentials = oauth.credentials(provider);
    let url = authorization_url(
        provider,
        oauth.auth_url(provider),
        &credentials.client_id,
        &callback_url(&state.config.server.app_url, provider),
        &flow.state,
        &code_challenge(&flow.code_verifier),
    );
    match url {
        Ok(url) => {
            tracing::debug!(provider = %provider, "Redirecting to provider");
            Redirect::to(&url)
        }
        Err(err) => {
            tracing::error!(provider = %provider, error = %err, "Failed to build authorization URL");
            login_error(ERROR_OAUTH_FAILED)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CallbackQuery {
    #[serde(default)]
    code: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    error: String,
}

/// GET /auth/callback/{provider}
///
/// Consumes the flow, verifies the code with the provider, resolves the
/// local user and starts a session.
async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    ClientMeta(meta): ClientMeta,
    headers: HeaderMap,
    jar: CookieJar,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> Response {
    let Ok(provider) = provider.parse::<Provider>() else {
        return login_error(ERROR_OAUTH_FAILED).into_response();
    };
    let query = query.map(|Query(q)| q).unwrap_or_default();

    if !query.error.is_empty() {
        tracing::warn!(provider = %provider, error = %query.error, "Provider returned an error");
        return login_error(ERROR_OAUTH_FAILED).into_response();
    }
    if query.code.is_empty() || query.state.is_empty() {
        return login_error(ERROR_OAUTH_FAILED).into_response();
    }

    let flow = match state.flows.consume(&query.state, provider) {
        Ok(flow) => flow,
        Err(err) => {
            tracing::warn!(provider = %provider, error = %err, "OAuth state rejected");
            return login_error(ERROR_OAUTH_FAILED).into_response();
        }
    };

    let oauth = &state.config.auth.oauth;
    let profile = match state
        .verifier
        .exchange_and_verify(
            provider,
            &query.code,
            &flow.code_verifier,
            &callback_url(&state.config.server.app_url, provider),
            &oauth.credentials(provider),
        )
        .await
    {
        Ok(profile) => profile,
        Err(err) => {
            tracing::warn!(provider = %provider, error = %err, "OAuth verification failed");
            return login_error(ERROR_OAUTH_FAILED).into_response();
        }
    };

    let user = match users::find_or_create_social_user(&state.db, &profile, state.clock.now()) {
        Ok(user) => user,
        Err(err) if err.is_conflict() => {
            return login_error(ERROR_ACCOUNT_CONFLICT).into_response();
        }
        Err(err) => {
            tracing::error!(provider = %provider, error = %err, "Failed to resolve user");
            return login_error(ERROR_OAUTH_FAILED).into_response();
        }
    };

    let issued = match state.sessions.create_session(&user, &meta) {
        Ok(issued) => issued,
        Err(err) => {
            tracing::error!(user_id = user.id, error = %err, "Failed to create session");
            return login_error(ERROR_OAUTH_FAILED).into_response();
        }
    };

    tracing::info!(user_id = user.id, provider = %provider, "User signed in");
    let cookie = session_cookie(
        &state.config.auth.session.cookie_name,
        &issued.token,
        issued.expires_at,
        state.clock.now(),
        is_secure(&state.config, &headers),
    );
    (jar.add(cookie), Redirect::to(&flow.redirect_to)).into_response()
}

/// POST /auth/logout
async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    let cookie_name = &state.config.auth.session.cookie_name;
    let raw = jar.get(cookie_name).map(|c| c.value().to_string());
    if let Err(err) = state.sessions.logout(raw.as_deref()) {
        tracing::warn!(error = %err, "Session delete failed during logout");
    }
    let cleared = clear_cookie(cookie_name, "/", is_secure(&state.config, &headers));
    (jar.add(cleared), Redirect::to(LOGIN_PATH))
}
