//! Social identity verification.
//!
//! Exchanges an authorization code (plus PKCE verifier) with the identity
//! provider and turns the provider's claims into a normalized
//! [`SocialProfile`]. Provider dispatch is a closed enum; adding a provider
//! means adding a [`Provider`] variant and a submodule.
//!
//! Nothing here retries. Authorization codes are single-use, so a failed
//! exchange is surfaced immediately and the user restarts the flow.

mod github;
mod google;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::error::AuthError;
use crate::auth::token::PKCE_METHOD;
use crate::config::OAuthConfig;

/// User agent sent to identity providers (GitHub rejects requests without one).
const USER_AGENT: &str = concat!("gatehouse/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Provider
// =============================================================================

/// Supported identity providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Github,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Google, Provider::Github];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Github => "github",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Google => "Google",
            Self::Github => "GitHub",
        }
    }

    fn scope(&self) -> &'static str {
        match self {
            Self::Google => "openid email profile",
            Self::Github => "read:user user:email",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "github" => Ok(Self::Github),
            other => Err(AuthError::InvalidInput(format!("unknown provider: {other}"))),
        }
    }
}

// =============================================================================
// Profile + credentials
// =============================================================================

/// Provider-agnostic identity claims produced by a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocialProfile {
    pub provider: Provider,
    pub provider_user_id: String,
    /// Lower-cased; empty when the provider did not disclose one.
    pub email: String,
    pub email_verified: bool,
    pub name: String,
    pub avatar_url: String,
    pub username: Option<String>,
}

impl SocialProfile {
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.provider_user_id.trim().is_empty() {
            return Err(AuthError::InvalidInput(
                "provider user id is required".to_string(),
            ));
        }
        Ok(())
    }

    /// The email to trust for account matching: verified and non-empty.
    pub fn verified_email(&self) -> Option<&str> {
        let email = self.email.trim();
        (self.email_verified && !email.is_empty()).then_some(email)
    }
}

/// OAuth client registration for one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ProviderCredentials {
    pub fn is_complete(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

// =============================================================================
// Verifier
// =============================================================================

/// Exchange an authorization code and return the verified profile.
#[async_trait::async_trait]
pub trait SocialVerifier: Send + Sync {
    async fn exchange_and_verify(
        &self,
        provider: Provider,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
        credentials: &ProviderCredentials,
    ) -> Result<SocialProfile, AuthError>;
}

/// Server-to-server endpoints used during verification.
#[derive(Debug, Clone)]
struct Endpoints {
    google_token_url: String,
    google_tokeninfo_url: String,
    github_token_url: String,
    github_api_url: String,
}

/// [`SocialVerifier`] backed by the real provider HTTP APIs.
pub struct HttpSocialVerifier {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl HttpSocialVerifier {
    pub fn new(config: &OAuthConfig) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.provider_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AuthError::Internal(format!("build http client: {e}")))?;

        Ok(Self {
            client,
            endpoints: Endpoints {
                google_token_url: config.google.token_url.clone(),
                google_tokeninfo_url: config.google.tokeninfo_url.clone(),
                github_token_url: config.github.token_url.clone(),
                github_api_url: config.github.api_url.trim_end_matches('/').to_string(),
            },
        })
    }
}

#[async_trait::async_trait]
impl SocialVerifier for HttpSocialVerifier {
    async fn exchange_and_verify(
        &self,
        provider: Provider,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
        credentials: &ProviderCredentials,
    ) -> Result<SocialProfile, AuthError> {
        if code.trim().is_empty() || code_verifier.trim().is_empty() {
            return Err(AuthError::InvalidInput(
                "code and code_verifier are required".to_string(),
            ));
        }
        if !credentials.is_complete() {
            return Err(AuthError::InvalidInput(format!(
                "{provider} client credentials are missing"
            )));
        }

        let exchange = CodeExchange {
            code: code.trim(),
            code_verifier: code_verifier.trim(),
            redirect_uri: redirect_uri.trim(),
            credentials,
        };
        let profile = match provider {
            Provider::Google => {
                google::verify(
                    &self.client,
                    &self.endpoints.google_token_url,
                    &self.endpoints.google_tokeninfo_url,
                    &exchange,
                )
                .await
            }
            Provider::Github => {
                github::verify(
                    &self.client,
                    &self.endpoints.github_token_url,
                    &self.endpoints.github_api_url,
                    &exchange,
                )
                .await
            }
        };

        match &profile {
            Ok(p) => tracing::debug!(provider = %provider, provider_user_id = %p.provider_user_id, "Social profile verified"),
            Err(e) => tracing::warn!(provider = %provider, error = %e, "Social verification failed"),
        }
        profile
    }
}

/// Inputs shared by every provider's code exchange.
struct CodeExchange<'a> {
    code: &'a str,
    code_verifier: &'a str,
    redirect_uri: &'a str,
    credentials: &'a ProviderCredentials,
}

// =============================================================================
// Authorization redirect helpers
// =============================================================================

/// Where the provider sends the browser back to.
pub fn callback_url(app_url: &str, provider: Provider) -> String {
    format!(
        "{}/auth/callback/{}",
        app_url.trim().trim_end_matches('/'),
        provider.as_str()
    )
}

/// Build the provider authorization URL for a pending flow.
pub fn authorization_url(
    provider: Provider,
    auth_url: &str,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
    code_challenge: &str,
) -> Result<String, AuthError> {
    let mut params = vec![
        ("client_id", client_id),
        ("redirect_uri", redirect_uri),
        ("scope", provider.scope()),
        ("state", state),
        ("code_challenge", code_challenge),
        ("code_challenge_method", PKCE_METHOD),
    ];
    if provider == Provider::Google {
        params.push(("response_type", "code"));
    }
    let url = url::Url::parse_with_params(auth_url, &params)
        .map_err(|e| AuthError::Internal(format!("invalid {provider} auth url: {e}")))?;
    Ok(url.into())
}

/// Interpret a JSON value that providers send as either a bool or a string.
fn parse_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "1"),
        _ => false,
    }
}

/// Reject non-2xx responses as a failed verification.
fn ensure_success(response: &reqwest::Response, step: &str) -> Result<(), AuthError> {
    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::Unauthorized(format!(
            "{step} returned HTTP {status}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!("google".parse::<Provider>().unwrap(), Provider::Google);
        assert_eq!(" GitHub ".parse::<Provider>().unwrap(), Provider::Github);
        assert!(matches!(
            "gitlab".parse::<Provider>(),
            Err(AuthError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_provider_display() {
        assert_eq!(Provider::Google.to_string(), "google");
        assert_eq!(Provider::Github.to_string(), "github");
    }

    #[test]
    fn test_verified_email() {
        let mut profile = SocialProfile {
            provider: Provider::Google,
            provider_user_id: "1".into(),
            email: "a@example.com".into(),
            email_verified: true,
            name: String::new(),
            avatar_url: String::new(),
            username: None,
        };
        assert_eq!(profile.verified_email(), Some("a@example.com"));
        profile.email_verified = false;
        assert_eq!(profile.verified_email(), None);
        profile.email_verified = true;
        profile.email = "  ".into();
        assert_eq!(profile.verified_email(), None);
    }

    #[test]
    fn test_profile_validate_requires_id() {
        let profile = SocialProfile {
            provider: Provider::Github,
            provider_user_id: " ".into(),
            email: String::new(),
            email_verified: false,
            name: String::new(),
            avatar_url: String::new(),
            username: None,
        };
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_callback_url() {
        assert_eq!(
            callback_url("https://example.com/", Provider::Github),
            "https://example.com/auth/callback/github"
        );
    }

    #[test]
    fn test_google_authorization_url() {
        let url = authorization_url(
            Provider::Google,
            "https://accounts.google.com/o/oauth2/v2/auth",
            "client-1",
            "https://example.com/auth/callback/google",
            "state-xyz",
            "challenge-abc",
        )
        .unwrap();
        let parsed = url::Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["state"], "state-xyz");
        assert_eq!(params["code_challenge"], "challenge-abc");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["scope"], "openid email profile");
        assert_eq!(params["redirect_uri"], "https://example.com/auth/callback/google");
    }

    #[test]
    fn test_github_authorization_url_has_no_response_type() {
        let url = authorization_url(
            Provider::Github,
            "https://github.com/login/oauth/authorize",
            "client-2",
            "https://example.com/auth/callback/github",
            "s",
            "c",
        )
        .unwrap();
        assert!(url.starts_with("https://github.com/login/oauth/authorize?"));
        assert!(!url.contains("response_type"));
        assert!(url.contains("scope=read%3Auser+user%3Aemail"));
    }

    #[test]
    fn test_parse_truthy() {
        assert!(parse_truthy(&serde_json::json!(true)));
        assert!(parse_truthy(&serde_json::json!("true")));
        assert!(parse_truthy(&serde_json::json!(" TRUE ")));
        assert!(parse_truthy(&serde_json::json!("1")));
        assert!(!parse_truthy(&serde_json::json!("false")));
        assert!(!parse_truthy(&serde_json::json!(1)));
        assert!(!parse_truthy(&serde_json::Value::Null));
    }

    #[test]
    fn test_credentials_complete() {
        assert!(!ProviderCredentials::default().is_complete());
        assert!(
            ProviderCredentials {
                client_id: "id".into(),
                client_secret: "secret".into()
            }
            .is_complete()
        );
    }
}
