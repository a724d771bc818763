//! Browser sign-in journeys through the full router.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use gatehouse::auth::social::Provider;
use gatehouse::build_app;
use gatehouse::config::seconds;

use common::{Browser, FakeVerifier, body_text, build_state, location, profile, test_config};

const CSRF_COOKIE: &str = "csrf_token";

fn grace_verifier() -> FakeVerifier {
    FakeVerifier::default()
        .with_code(
            "grace-code",
            profile(Provider::Google, "g-100", "grace@example.com", "Grace Hopper"),
        )
        .with_code(
            "grace-github",
            profile(Provider::Github, "77", "grace@example.com", "Grace H."),
        )
}

fn state_param(authorize_url: &str) -> String {
    url::Url::parse(authorize_url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

/// Walk the login page, start the flow and return the provider redirect.
async fn start(browser: &mut Browser, provider: &str, next: &str) -> String {
    let resp = browser.get("/auth/login").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let csrf = browser.cookie(CSRF_COOKIE).unwrap().to_string();

    let resp = browser
        .post_form(
            &format!("/auth/login/{provider}"),
            &[("csrf_token", csrf.as_str()), ("next", next)],
        )
        .await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    location(&resp)
}

#[tokio::test]
async fn sign_in_browse_and_sign_out() {
    let (state, _clock) = build_state(test_config(), Arc::new(grace_verifier()));
    let session_cookie = state.config.auth.session.cookie_name.clone();
    let mut browser = Browser::new(build_app(state));

    let authorize = start(&mut browser, "google", "/account").await;
    assert!(authorize.starts_with("https://accounts.google.com/"));
    let flow_state = state_param(&authorize);

    let resp = browser
        .get(&format!("/auth/callback/google?code=grace-code&state={flow_state}"))
        .await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/account");
    assert!(browser.cookie(&session_cookie).is_some());

    let resp = browser.get("/account").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let html = body_text(resp).await;
    assert!(html.contains("Grace Hopper"));
    assert!(html.contains("Google"));

    let resp = browser.get("/").await;
    assert!(body_text(resp).await.contains("Signed in as Grace Hopper"));

    let csrf = browser.cookie(CSRF_COOKIE).unwrap().to_string();
    let resp = browser.post_form("/auth/logout", &[("csrf_token", csrf.as_str())]).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/auth/login");
    assert!(browser.cookie(&session_cookie).is_none());

    let resp = browser.get("/account").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/auth/login");
}

#[tokio::test]
async fn returning_user_keeps_the_same_account() {
    let (state, _clock) = build_state(test_config(), Arc::new(grace_verifier()));
    let db = state.db.clone();
    let app = build_app(state);

    for _ in 0..2 {
        let mut browser = Browser::new(app.clone());
        let flow_state = state_param(&start(&mut browser, "google", "").await);
        let resp = browser
            .get(&format!("/auth/callback/google?code=grace-code&state={flow_state}"))
            .await;
        assert_eq!(location(&resp), "/account");
    }

    let count: i64 = db
        .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0)))
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn same_email_on_second_provider_is_a_conflict() {
    let (state, _clock) = build_state(test_config(), Arc::new(grace_verifier()));
    let app = build_app(state);

    let mut first = Browser::new(app.clone());
    let flow_state = state_param(&start(&mut first, "google", "").await);
    first
        .get(&format!("/auth/callback/google?code=grace-code&state={flow_state}"))
        .await;

    let mut second = Browser::new(app);
    let flow_state = state_param(&start(&mut second, "github", "").await);
    let resp = second
        .get(&format!("/auth/callback/github?code=grace-github&state={flow_state}"))
        .await;
    assert_eq!(location(&resp), "/auth/login?error=account_conflict");

    let resp = second.get("/auth/login?error=account_conflict").await;
    assert!(body_text(resp).await.contains("Linking is not supported"));
}

#[tokio::test]
async fn session_expires_after_ttl() {
    let (state, clock) = build_state(test_config(), Arc::new(grace_verifier()));
    let ttl = seconds(state.config.auth.session.ttl_secs);
    let session_cookie = state.config.auth.session.cookie_name.clone();
    let sweeper = state.clone();
    let mut browser = Browser::new(build_app(state));

    let flow_state = state_param(&start(&mut browser, "google", "").await);
    browser
        .get(&format!("/auth/callback/google?code=grace-code&state={flow_state}"))
        .await;
    assert_eq!(browser.get("/account").await.status(), StatusCode::OK);

    clock.advance(ttl);
    assert_eq!(sweeper.sweep().sessions, 1);

    let resp = browser.get("/account").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert!(browser.cookie(&session_cookie).is_none());
}

#[tokio::test]
async fn open_redirects_are_rejected() {
    let (state, _clock) = build_state(test_config(), Arc::new(grace_verifier()));
    let mut browser = Browser::new(build_app(state));

    let flow_state = state_param(&start(&mut browser, "google", "//evil.example/phish").await);
    let resp = browser
        .get(&format!("/auth/callback/google?code=grace-code&state={flow_state}"))
        .await;
    assert_eq!(location(&resp), "/account");
}

#[tokio::test]
async fn logout_without_csrf_token_is_forbidden() {
    let (state, _clock) = build_state(test_config(), Arc::new(grace_verifier()));
    let mut browser = Browser::new(build_app(state));

    let flow_state = state_param(&start(&mut browser, "google", "").await);
    browser
        .get(&format!("/auth/callback/google?code=grace-code&state={flow_state}"))
        .await;

    let resp = browser.post_form("/auth/logout", &[]).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(browser.get("/account").await.status(), StatusCode::OK);
}
