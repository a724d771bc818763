#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, header};
use axum::response::Response;
use axum::Router;
use tower::ServiceExt;

use gatehouse::AppState;
use gatehouse::auth::error::AuthError;
use gatehouse::auth::social::{Provider, ProviderCredentials, SocialProfile, SocialVerifier};
use gatehouse::clock::ManualClock;
use gatehouse::config::Config;
use gatehouse::db::Database;

/// Verifier that knows a fixed set of authorization codes.
#[derive(Default)]
pub struct FakeVerifier {
    codes: HashMap<String, SocialProfile>,
}

impl FakeVerifier {
    pub fn with_code(mut self, code: &str, profile: SocialProfile) -> Self {
        self.codes.insert(code.to_string(), profile);
        self
    }
}

#[async_trait::async_trait]
impl SocialVerifier for FakeVerifier {
    async fn exchange_and_verify(
        &self,
        provider: Provider,
        code: &str,
        _code_verifier: &str,
        _redirect_uri: &str,
        _credentials: &ProviderCredentials,
    ) -> Result<SocialProfile, AuthError> {
        match self.codes.get(code) {
            Some(profile) if profile.provider == provider => Ok(profile.clone()),
            _ => Err(AuthError::Unauthorized("unknown code".to_string())),
        }
    }
}

pub fn profile(provider: Provider, id: &str, email: &str, name: &str) -> SocialProfile {
    SocialProfile {
        provider,
        provider_user_id: id.to_string(),
        email: email.to_string(),
        email_verified: true,
        name: name.to_string(),
        avatar_url: String::new(),
        username: None,
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.api.access_token_secret = Some("integration-secret".to_string());
    config.auth.oauth.google.client_id = "google-client".to_string();
    config.auth.oauth.google.client_secret = "google-secret".to_string();
    config.auth.oauth.github.client_id = "github-client".to_string();
    config.auth.oauth.github.client_secret = "github-secret".to_string();
    config
}

pub fn build_state(config: Config, verifier: Arc<dyn SocialVerifier>) -> (AppState, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let db = Database::open_in_memory().unwrap();
    let state = AppState::new(config, db, clock.clone(), verifier).unwrap();
    (state, clock)
}

/// Value of the `name` cookie set on `resp`, if any.
pub fn set_cookie(resp: &Response, name: &str) -> Option<String> {
    resp.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.to_string())
}

pub fn location(resp: &Response) -> String {
    resp.headers()[header::LOCATION].to_str().unwrap().to_string()
}

pub async fn body_text(resp: Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(resp: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.clone().oneshot(req).await.unwrap()
}

pub async fn get_with_bearer(app: &Router, uri: &str, token: &str) -> Response {
    let req = Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(req).await.unwrap()
}

/// A minimal cookie-keeping client for driving the HTML surface.
pub struct Browser {
    app: Router,
    cookies: HashMap<String, String>,
}

impl Browser {
    pub fn new(app: Router) -> Self {
        Self {
            app,
            cookies: HashMap::new(),
        }
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub async fn get(&mut self, uri: &str) -> Response {
        let req = self.request("GET", uri).body(Body::empty()).unwrap();
        self.send(req).await
    }

    pub async fn post_form(&mut self, uri: &str, fields: &[(&str, &str)]) -> Response {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        let req = self
            .request("POST", uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        self.send(req).await
    }

    fn request(&self, method: &str, uri: &str) -> axum::http::request::Builder {
        let mut builder = Request::builder().method(method).uri(uri);
        if !self.cookies.is_empty() {
            let header_value = self
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(header::COOKIE, header_value);
        }
        builder
    }

    async fn send(&mut self, req: Request<Body>) -> Response {
        let resp = self.app.clone().oneshot(req).await.unwrap();
        for value in resp.headers().get_all(header::SET_COOKIE) {
            let Some((name, value)) = value
                .to_str()
                .ok()
                .and_then(|v| v.split(';').next())
                .and_then(|pair| pair.split_once('='))
            else {
                continue;
            };
            if value.is_empty() {
                self.cookies.remove(name.trim());
            } else {
                self.cookies.insert(name.trim().to_string(), value.to_string());
            }
        }
        resp
    }
}
