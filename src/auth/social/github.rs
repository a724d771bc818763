//! GitHub: code exchange, then `/user` and `/user/emails`.

use serde::Deserialize;

use super::{CodeExchange, Provider, SocialProfile, ensure_success};
use crate::auth::error::AuthError;

const GITHUB_ACCEPT: &str = "application/vnd.github+json";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    login: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    avatar_url: String,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    verified: bool,
}

pub(super) async fn verify(
    client: &reqwest::Client,
    token_url: &str,
    api_url: &str,
    exchange: &CodeExchange<'_>,
) -> Result<SocialProfile, AuthError> {
    let response = client
        .post(token_url)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&[
            ("client_id", exchange.credentials.client_id.as_str()),
            ("client_secret", exchange.credentials.client_secret.as_str()),
            ("code", exchange.code),
            ("redirect_uri", exchange.redirect_uri),
            ("code_verifier", exchange.code_verifier),
        ])
        .send()
        .await?;
    ensure_success(&response, "github token exchange")?;
    let tokens: TokenResponse = response.json().await?;
    let access_token = tokens.access_token.trim();
    if access_token.is_empty() {
        // GitHub reports bad codes as 200 with an `error` field and no token.
        return Err(AuthError::Unauthorized(
            "github token response carried no token".to_string(),
        ));
    }

    let response = client
        .get(format!("{api_url}/user"))
        .bearer_auth(access_token)
        .header(reqwest::header::ACCEPT, GITHUB_ACCEPT)
        .send()
        .await?;
    if response.status() != reqwest::StatusCode::OK {
        return Err(AuthError::Unauthorized(format!(
            "github user lookup returned HTTP {}",
            response.status()
        )));
    }
    let user: GithubUser = response.json().await?;
    if user.id <= 0 {
        return Err(AuthError::Unauthorized("github user id missing".to_string()));
    }

    // The email list is best effort: a failure leaves the public profile email.
    let emails = match client
        .get(format!("{api_url}/user/emails"))
        .bearer_auth(access_token)
        .header(reqwest::header::ACCEPT, GITHUB_ACCEPT)
        .send()
        .await
    {
        Ok(response) if response.status() == reqwest::StatusCode::OK => {
            response.json::<Vec<GithubEmail>>().await.unwrap_or_else(|e| {
                tracing::debug!(error = %e, "Ignoring undecodable github email list");
                Vec::new()
            })
        }
        Ok(response) => {
            tracing::debug!(status = %response.status(), "github email list unavailable");
            Vec::new()
        }
        Err(e) => {
            tracing::debug!(error = %e, "github email list request failed");
            Vec::new()
        }
    };

    Ok(build_profile(user, &emails))
}

fn build_profile(user: GithubUser, emails: &[GithubEmail]) -> SocialProfile {
    // GitHub only publishes a verified address as the public profile email.
    let mut email = user
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .unwrap_or_default();
    let mut email_verified = !email.is_empty();

    let chosen = emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| if email_verified { None } else { emails.iter().find(|e| e.verified) });
    if let Some(item) = chosen {
        email = item.email.trim().to_lowercase();
        email_verified = true;
    }

    let login = user.login.trim().to_string();
    let name = match user.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => login.clone(),
    };

    SocialProfile {
        provider: Provider::Github,
        provider_user_id: user.id.to_string(),
        email,
        email_verified,
        name,
        avatar_url: user.avatar_url.trim().to_string(),
        username: (!login.is_empty()).then_some(login),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(email: Option<&str>, name: Option<&str>) -> GithubUser {
        GithubUser {
            id: 583231,
            login: "octocat".to_string(),
            name: name.map(str::to_string),
            email: email.map(str::to_string),
            avatar_url: "https://avatars.githubusercontent.com/u/583231".to_string(),
        }
    }

    fn email(address: &str, primary: bool, verified: bool) -> GithubEmail {
        GithubEmail {
            email: address.to_string(),
            primary,
            verified,
        }
    }

    #[test]
    fn test_primary_verified_email_wins() {
        let emails = vec![
            email("other@example.com", false, true),
            email("Primary@Example.com", true, true),
        ];
        let profile = build_profile(user(Some("public@example.com"), None), &emails);
        assert_eq!(profile.email, "primary@example.com");
        assert!(profile.email_verified);
    }

    #[test]
    fn test_any_verified_email_when_no_primary() {
        let emails = vec![
            email("unverified@example.com", true, false),
            email("verified@example.com", false, true),
        ];
        let profile = build_profile(user(None, None), &emails);
        assert_eq!(profile.email, "verified@example.com");
        assert!(profile.email_verified);
    }

    #[test]
    fn test_no_verified_email() {
        let emails = vec![email("unverified@example.com", true, false)];
        let profile = build_profile(user(None, None), &emails);
        assert_eq!(profile.email, "");
        assert!(!profile.email_verified);
    }

    #[test]
    fn test_public_email_kept_when_list_empty() {
        let profile = build_profile(user(Some("Public@Example.com"), None), &[]);
        assert_eq!(profile.email, "public@example.com");
        assert!(profile.email_verified);
    }

    #[test]
    fn test_name_falls_back_to_login() {
        let profile = build_profile(user(None, Some("  ")), &[]);
        assert_eq!(profile.name, "octocat");
        assert_eq!(profile.username.as_deref(), Some("octocat"));
        assert_eq!(profile.provider_user_id, "583231");

        let profile = build_profile(user(None, Some("The Octocat")), &[]);
        assert_eq!(profile.name, "The Octocat");
    }
}
