//! Google: authorization code exchange followed by a tokeninfo lookup.

use serde::Deserialize;

use super::{CodeExchange, Provider, SocialProfile, ensure_success, parse_truthy};
use crate::auth::error::AuthError;

/// Issuers Google stamps on its ID tokens.
const ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    id_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    #[serde(default)]
    sub: String,
    #[serde(default)]
    aud: String,
    #[serde(default)]
    iss: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    email_verified: serde_json::Value,
    #[serde(default)]
    name: String,
    #[serde(default)]
    picture: String,
}

pub(super) async fn verify(
    client: &reqwest::Client,
    token_url: &str,
    tokeninfo_url: &str,
    exchange: &CodeExchange<'_>,
) -> Result<SocialProfile, AuthError> {
    let response = client
        .post(token_url)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", exchange.code),
            ("client_id", exchange.credentials.client_id.as_str()),
            ("client_secret", exchange.credentials.client_secret.as_str()),
            ("redirect_uri", exchange.redirect_uri),
            ("code_verifier", exchange.code_verifier),
        ])
        .send()
        .await?;
    ensure_success(&response, "google token exchange")?;
    let tokens: TokenResponse = response.json().await?;

    // Prefer the ID token; fall back to the access token.
    let id_token = tokens.id_token.trim();
    let access_token = tokens.access_token.trim();
    let query = if !id_token.is_empty() {
        ("id_token", id_token)
    } else if !access_token.is_empty() {
        ("access_token", access_token)
    } else {
        return Err(AuthError::Unauthorized(
            "google token response carried no token".to_string(),
        ));
    };

    let response = client.get(tokeninfo_url).query(&[query]).send().await?;
    if response.status() != reqwest::StatusCode::OK {
        return Err(AuthError::Unauthorized(format!(
            "google tokeninfo returned HTTP {}",
            response.status()
        )));
    }
    let info: TokenInfo = response.json().await?;
    profile_from_token_info(info, &exchange.credentials.client_id)
}

fn profile_from_token_info(info: TokenInfo, client_id: &str) -> Result<SocialProfile, AuthError> {
    let sub = info.sub.trim();
    if sub.is_empty() {
        return Err(AuthError::Unauthorized("google subject missing".to_string()));
    }
    if info.aud.trim() != client_id.trim() {
        return Err(AuthError::Unauthorized("google audience mismatch".to_string()));
    }
    if !ISSUERS.contains(&info.iss.as_str()) {
        return Err(AuthError::Unauthorized("google issuer mismatch".to_string()));
    }

    Ok(SocialProfile {
        provider: Provider::Google,
        provider_user_id: sub.to_string(),
        email: info.email.trim().to_lowercase(),
        email_verified: parse_truthy(&info.email_verified),
        name: info.name.trim().to_string(),
        avatar_url: info.picture.trim().to_string(),
        username: None,
    })
}
