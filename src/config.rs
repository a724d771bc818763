use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::auth::social::{Provider, ProviderCredentials};

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings were overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: BTreeMap<String, String>,
}

impl EnvOverrides {
    /// `(setting key, env var)` pairs, ordered by setting key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.overrides.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// "production" forces secure cookies and an https `app_url`.
    #[serde(default = "default_app_env")]
    pub app_env: String,
    /// Public base URL. OAuth callbacks and the CORS origin derive from it.
    #[serde(default = "default_app_url")]
    pub app_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Take the client IP from `X-Real-IP` / `X-Forwarded-For`.
    #[serde(default)]
    pub trust_proxy_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            app_name: default_app_name(),
            app_env: default_app_env(),
            app_url: default_app_url(),
            request_timeout_secs: default_request_timeout_secs(),
            trust_proxy_headers: false,
        }
    }
}

impl ServerConfig {
    pub fn is_production(&self) -> bool {
        self.app_env.trim().eq_ignore_ascii_case("production")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub api: ApiAuthConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_cookie")]
    pub cookie_name: String,
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    /// Minimum idle time before `last_seen_at` is rewritten.
    #[serde(default = "default_touch_after_secs")]
    pub touch_after_secs: u64,
    /// Always mark cookies `Secure`. When false it is decided per request.
    #[serde(default)]
    pub cookie_secure: bool,
    /// Path prefixes that never load a browser session.
    #[serde(default = "default_skip_prefixes")]
    pub skip_prefixes: Vec<String>,
    /// Exact paths that never load a browser session.
    #[serde(default = "default_skip_paths")]
    pub skip_paths: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_session_cookie(),
            ttl_secs: default_session_ttl_secs(),
            touch_after_secs: default_touch_after_secs(),
            cookie_secure: false,
            skip_prefixes: default_skip_prefixes(),
            skip_paths: default_skip_paths(),
        }
    }
}

impl SessionConfig {
    /// Whether session loading is skipped for `path`.
    pub fn skips(&self, path: &str) -> bool {
        let path = path.trim();
        if path.is_empty() {
            return false;
        }
        self.skip_paths.iter().any(|p| p == path)
            || self.skip_prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiAuthConfig {
    /// HMAC secret for access tokens. API auth is disabled while unset.
    #[serde(default)]
    pub access_token_secret: Option<String>,
    #[serde(default = "default_access_ttl_secs")]
    pub access_token_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl_secs")]
    pub refresh_token_ttl_secs: u64,
    #[serde(default = "default_refresh_cookie")]
    pub refresh_cookie_name: String,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_audience")]
    pub audience: String,
}

impl Default for ApiAuthConfig {
    fn default() -> Self {
        Self {
            access_token_secret: None,
            access_token_ttl_secs: default_access_ttl_secs(),
            refresh_token_ttl_secs: default_refresh_ttl_secs(),
            refresh_cookie_name: default_refresh_cookie(),
            issuer: default_issuer(),
            audience: default_audience(),
        }
    }
}

impl ApiAuthConfig {
    /// The secret, if one is set and non-blank.
    pub fn secret(&self) -> Option<&str> {
        self.access_token_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OAuthConfig {
    #[serde(default = "default_flow_ttl_secs")]
    pub flow_ttl_secs: u64,
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub github: GithubConfig,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            flow_ttl_secs: default_flow_ttl_secs(),
            provider_timeout_secs: default_provider_timeout_secs(),
            google: GoogleConfig::default(),
            github: GithubConfig::default(),
        }
    }
}

impl OAuthConfig {
    pub fn credentials(&self, provider: Provider) -> ProviderCredentials {
        let (client_id, client_secret) = match provider {
            Provider::Google => (&self.google.client_id, &self.google.client_secret),
            Provider::Github => (&self.github.client_id, &self.github.client_secret),
        };
        ProviderCredentials {
            client_id: client_id.trim().to_string(),
            client_secret: client_secret.trim().to_string(),
        }
    }

    /// A provider is enabled once both its client id and secret are set.
    pub fn is_enabled(&self, provider: Provider) -> bool {
        self.credentials(provider).is_complete()
    }

    pub fn enabled_providers(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.is_enabled(*p))
            .collect()
    }

    /// Browser-facing authorization endpoint.
    pub fn auth_url(&self, provider: Provider) -> &str {
        match provider {
            Provider::Google => &self.google.auth_url,
            Provider::Github => &self.github.auth_url,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GoogleConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_google_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_google_token_url")]
    pub token_url: String,
    #[serde(default = "default_google_tokeninfo_url")]
    pub tokeninfo_url: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_url: default_google_auth_url(),
            token_url: default_google_token_url(),
            tokeninfo_url: default_google_tokeninfo_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_github_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_github_token_url")]
    pub token_url: String,
    /// REST API base; `/user` and `/user/emails` hang off it.
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_url: default_github_auth_url(),
            token_url: default_github_token_url(),
            api_url: default_github_api_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_requests")]
    pub requests: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: default_rate_limit_requests(),
            window_secs: default_rate_limit_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}
const fn default_port() -> u16 {
    8080
}
fn default_app_name() -> String {
    "Gatehouse".to_string()
}
fn default_app_env() -> String {
    "development".to_string()
}
fn default_app_url() -> String {
    "http://127.0.0.1:8080".to_string()
}
const fn default_request_timeout_secs() -> u64 {
    30
}
fn default_db_path() -> PathBuf {
    PathBuf::from("gatehouse.db")
}
fn default_session_cookie() -> String {
    "gatehouse_session".to_string()
}
const fn default_session_ttl_secs() -> u64 {
    30 * 24 * 60 * 60
}
const fn default_touch_after_secs() -> u64 {
    10 * 60
}
fn default_skip_prefixes() -> Vec<String> {
    vec!["/static/".to_string(), "/api/".to_string()]
}
fn default_skip_paths() -> Vec<String> {
    vec!["/healthz".to_string(), "/api/health".to_string()]
}
const fn default_access_ttl_secs() -> u64 {
    10 * 60
}
const fn default_refresh_ttl_secs() -> u64 {
    30 * 24 * 60 * 60
}
fn default_refresh_cookie() -> String {
    "gatehouse_api_refresh".to_string()
}
fn default_issuer() -> String {
    "gatehouse".to_string()
}
fn default_audience() -> String {
    "gatehouse-api".to_string()
}
const fn default_flow_ttl_secs() -> u64 {
    6 * 60
}
const fn default_provider_timeout_secs() -> u64 {
    10
}
fn default_google_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}
fn default_google_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}
fn default_google_tokeninfo_url() -> String {
    "https://oauth2.googleapis.com/tokeninfo".to_string()
}
fn default_github_auth_url() -> String {
    "https://github.com/login/oauth/authorize".to_string()
}
fn default_github_token_url() -> String {
    "https://github.com/login/oauth/access_token".to_string()
}
fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}
const fn default_rate_limit_requests() -> u32 {
    10
}
const fn default_rate_limit_window_secs() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Upper bound for any configured duration (100 years).
const MAX_CONFIG_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// A configured number of seconds as a chrono duration.
pub fn seconds(value: u64) -> chrono::Duration {
    let secs = i64::try_from(value).unwrap_or(MAX_CONFIG_SECS).min(MAX_CONFIG_SECS);
    chrono::Duration::seconds(secs)
}

// ---------------------------------------------------------------------------
// Config loading, env overrides, and validation
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides and validate. Any setting prefixed with `GATEHOUSE_` takes
    /// precedence over the file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Reject settings the server cannot run with and normalize the rest.
    pub fn validate(&mut self) -> anyhow::Result<()> {
        let app_url = url::Url::parse(self.server.app_url.trim())
            .map_err(|e| anyhow::anyhow!("server.app_url must be a valid absolute URL: {e}"))?;
        if !matches!(app_url.scheme(), "http" | "https") || app_url.host_str().is_none() {
            anyhow::bail!("server.app_url must be an absolute http(s) URL");
        }
        if self.server.is_production() && app_url.scheme() != "https" {
            anyhow::bail!("server.app_url must use https in production");
        }
        self.server.app_url = app_url.as_str().trim_end_matches('/').to_string();

        let session = &mut self.auth.session;
        if session.cookie_name.trim().is_empty() {
            session.cookie_name = default_session_cookie();
        }
        if session.ttl_secs == 0 {
            session.ttl_secs = default_session_ttl_secs();
        }

        let api = &mut self.auth.api;
        if api.access_token_ttl_secs == 0 {
            api.access_token_ttl_secs = default_access_ttl_secs();
        }
        if api.refresh_token_ttl_secs == 0 {
            api.refresh_token_ttl_secs = default_refresh_ttl_secs();
        }
        if api.refresh_cookie_name.trim().is_empty() {
            api.refresh_cookie_name = default_refresh_cookie();
        }
        if api.refresh_cookie_name == self.auth.session.cookie_name {
            anyhow::bail!("auth.api.refresh_cookie_name must differ from the session cookie name");
        }

        if self.auth.oauth.flow_ttl_secs == 0 {
            self.auth.oauth.flow_ttl_secs = default_flow_ttl_secs();
        }
        if self.auth.oauth.provider_timeout_secs == 0 {
            self.auth.oauth.provider_timeout_secs = default_provider_timeout_secs();
        }
        if self.auth.rate_limit.requests == 0 {
            self.auth.rate_limit.requests = default_rate_limit_requests();
        }
        if self.auth.rate_limit.window_secs == 0 {
            self.auth.rate_limit.window_secs = default_rate_limit_window_secs();
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Every supported setting has a corresponding `GATEHOUSE_*` env var. When
    /// set, the env var value replaces the file/default value and the setting
    /// key is recorded in `env_overrides`.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        // -- Helpers (macros for concise per-field overrides) --

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val.trim().to_string();
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    match val.trim().parse() {
                        Ok(parsed) => {
                            $field = parsed;
                            ov.record($key, $env);
                        }
                        Err(_) => tracing::warn!(env = $env, value = %val, "Ignoring unparsable override"),
                    }
                }
            };
        }
        macro_rules! env_path {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = PathBuf::from(val);
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_opt_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    let val = val.trim().to_string();
                    $field = if val.is_empty() { None } else { Some(val) };
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_list {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                    ov.record($key, $env);
                }
            };
        }

        // -- Server --
        env_str!("server.host", "GATEHOUSE_SERVER_HOST", self.server.host);
        env_parse!("server.port", "GATEHOUSE_SERVER_PORT", self.server.port);
        env_str!("server.app_name", "GATEHOUSE_APP_NAME", self.server.app_name);
        env_str!("server.app_env", "GATEHOUSE_APP_ENV", self.server.app_env);
        env_str!("server.app_url", "GATEHOUSE_APP_URL", self.server.app_url);
        env_parse!(
            "server.request_timeout_secs",
            "GATEHOUSE_REQUEST_TIMEOUT_SECS",
            self.server.request_timeout_secs
        );
        env_bool!(
            "server.trust_proxy_headers",
            "GATEHOUSE_TRUST_PROXY_HEADERS",
            self.server.trust_proxy_headers
        );

        // -- Database --
        env_path!("database.path", "GATEHOUSE_DATABASE_PATH", self.database.path);

        // -- Sessions --
        env_str!(
            "auth.session.cookie_name",
            "GATEHOUSE_SESSION_COOKIE_NAME",
            self.auth.session.cookie_name
        );
        env_parse!(
            "auth.session.ttl_secs",
            "GATEHOUSE_SESSION_TTL_SECS",
            self.auth.session.ttl_secs
        );
        env_parse!(
            "auth.session.touch_after_secs",
            "GATEHOUSE_SESSION_TOUCH_AFTER_SECS",
            self.auth.session.touch_after_secs
        );
        env_bool!(
            "auth.session.cookie_secure",
            "GATEHOUSE_COOKIE_SECURE",
            self.auth.session.cookie_secure
        );
        env_list!(
            "auth.session.skip_prefixes",
            "GATEHOUSE_SESSION_SKIP_PREFIXES",
            self.auth.session.skip_prefixes
        );
        env_list!(
            "auth.session.skip_paths",
            "GATEHOUSE_SESSION_SKIP_PATHS",
            self.auth.session.skip_paths
        );

        // -- API tokens --
        env_opt_str!(
            "auth.api.access_token_secret",
            "GATEHOUSE_API_ACCESS_TOKEN_SECRET",
            self.auth.api.access_token_secret
        );
        env_parse!(
            "auth.api.access_token_ttl_secs",
            "GATEHOUSE_API_ACCESS_TOKEN_TTL_SECS",
            self.auth.api.access_token_ttl_secs
        );
        env_parse!(
            "auth.api.refresh_token_ttl_secs",
            "GATEHOUSE_API_REFRESH_TOKEN_TTL_SECS",
            self.auth.api.refresh_token_ttl_secs
        );
        env_str!(
            "auth.api.refresh_cookie_name",
            "GATEHOUSE_API_REFRESH_COOKIE_NAME",
            self.auth.api.refresh_cookie_name
        );
        env_str!("auth.api.issuer", "GATEHOUSE_API_ISSUER", self.auth.api.issuer);
        env_str!("auth.api.audience", "GATEHOUSE_API_AUDIENCE", self.auth.api.audience);

        // -- OAuth --
        env_parse!(
            "auth.oauth.flow_ttl_secs",
            "GATEHOUSE_OAUTH_FLOW_TTL_SECS",
            self.auth.oauth.flow_ttl_secs
        );
        env_parse!(
            "auth.oauth.provider_timeout_secs",
            "GATEHOUSE_OAUTH_PROVIDER_TIMEOUT_SECS",
            self.auth.oauth.provider_timeout_secs
        );
        env_str!(
            "auth.oauth.google.client_id",
            "GATEHOUSE_GOOGLE_CLIENT_ID",
            self.auth.oauth.google.client_id
        );
        env_str!(
            "auth.oauth.google.client_secret",
            "GATEHOUSE_GOOGLE_CLIENT_SECRET",
            self.auth.oauth.google.client_secret
        );
        env_str!(
            "auth.oauth.github.client_id",
            "GATEHOUSE_GITHUB_CLIENT_ID",
            self.auth.oauth.github.client_id
        );
        env_str!(
            "auth.oauth.github.client_secret",
            "GATEHOUSE_GITHUB_CLIENT_SECRET",
            self.auth.oauth.github.client_secret
        );

        // -- Rate limiting --
        env_parse!(
            "auth.rate_limit.requests",
            "GATEHOUSE_RATE_LIMIT_REQUESTS",
            self.auth.rate_limit.requests
        );
        env_parse!(
            "auth.rate_limit.window_secs",
            "GATEHOUSE_RATE_LIMIT_WINDOW_SECS",
            self.auth.rate_limit.window_secs
        );

        // -- Logging --
        env_str!("logging.level", "GATEHOUSE_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "GATEHOUSE_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.app_env, "development");
        assert!(!config.server.trust_proxy_headers);
        assert_eq!(config.auth.session.cookie_name, "gatehouse_session");
        assert_eq!(config.auth.session.ttl_secs, 2_592_000);
        assert_eq!(config.auth.session.touch_after_secs, 600);
        assert_eq!(config.auth.api.access_token_ttl_secs, 600);
        assert_eq!(config.auth.api.refresh_cookie_name, "gatehouse_api_refresh");
        assert!(config.auth.api.secret().is_none());
        assert_eq!(config.auth.oauth.flow_ttl_secs, 360);
        assert_eq!(config.auth.oauth.provider_timeout_secs, 10);
        assert_eq!(config.auth.rate_limit.requests, 10);
        assert_eq!(config.auth.rate_limit.window_secs, 60);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.database.path, PathBuf::from("gatehouse.db"));
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gatehouse.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 9000
app_url = "https://auth.example.com/"
app_env = "production"

[auth.api]
access_token_secret = "s3cret"

[auth.oauth.github]
client_id = "gh-id"
client_secret = "gh-secret"

[auth.rate_limit]
requests = 3
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.app_url, "https://auth.example.com");
        assert!(config.server.is_production());
        assert_eq!(config.auth.api.secret(), Some("s3cret"));
        assert_eq!(config.auth.rate_limit.requests, 3);
        assert_eq!(config.auth.rate_limit.window_secs, 60);
        assert_eq!(config.auth.oauth.enabled_providers(), vec![Provider::Github]);
        assert_eq!(config.auth.oauth.github.token_url, "https://github.com/login/oauth/access_token");
    }

    #[test]
    fn test_validate_rejects_relative_app_url() {
        let mut config = Config::default();
        config.server.app_url = "/just/a/path".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_https_in_production() {
        let mut config = Config::default();
        config.server.app_env = "Production".to_string();
        assert!(config.validate().is_err());

        config.server.app_url = "https://auth.example.com".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_fills_zero_values() {
        let mut config = Config::default();
        config.auth.session.ttl_secs = 0;
        config.auth.api.access_token_ttl_secs = 0;
        config.auth.rate_limit.requests = 0;
        config.auth.session.cookie_name = " ".to_string();
        config.validate().unwrap();
        assert_eq!(config.auth.session.ttl_secs, 2_592_000);
        assert_eq!(config.auth.api.access_token_ttl_secs, 600);
        assert_eq!(config.auth.rate_limit.requests, 10);
        assert_eq!(config.auth.session.cookie_name, "gatehouse_session");
    }

    #[test]
    fn test_validate_rejects_cookie_name_clash() {
        let mut config = Config::default();
        config.auth.api.refresh_cookie_name = config.auth.session.cookie_name.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_blank_secret_is_unset() {
        let mut api = ApiAuthConfig::default();
        api.access_token_secret = Some("   ".to_string());
        assert!(api.secret().is_none());
    }

    #[test]
    fn test_provider_enablement_needs_both_halves() {
        let mut oauth = OAuthConfig::default();
        assert!(oauth.enabled_providers().is_empty());
        oauth.google.client_id = "id".to_string();
        assert!(!oauth.is_enabled(Provider::Google));
        oauth.google.client_secret = "secret".to_string();
        assert!(oauth.is_enabled(Provider::Google));
        assert_eq!(
            oauth.auth_url(Provider::Google),
            "https://accounts.google.com/o/oauth2/v2/auth"
        );
    }

    #[test]
    fn test_session_skip_list() {
        let session = SessionConfig::default();
        assert!(session.skips("/healthz"));
        assert!(session.skips("/api/health"));
        assert!(session.skips("/api/auth/me"));
        assert!(session.skips("/static/app.css"));
        assert!(!session.skips("/account"));
        assert!(!session.skips("/healthz/extra"));
        assert!(!session.skips(""));
    }

    #[test]
    fn test_env_overrides_tracking() {
        let mut ov = EnvOverrides::default();
        assert!(ov.is_empty());

        ov.record("server.port", "GATEHOUSE_PORT");
        ov.record("server.host", "GATEHOUSE_SERVER_HOST");
        assert_eq!(ov.len(), 2);
        assert_eq!(
            ov.iter().collect::<Vec<_>>(),
            vec![
                ("server.host", "GATEHOUSE_SERVER_HOST"),
                ("server.port", "GATEHOUSE_PORT"),
            ]
        );
    }

    fn overridden(config: &Config, key: &str) -> bool {
        config.env_overrides.iter().any(|(k, _)| k == key)
    }

    #[test]
    fn test_env_override_applies() {
        // SAFETY: each env-mutating test uses its own variables.
        unsafe {
            std::env::set_var("GATEHOUSE_REQUEST_TIMEOUT_SECS", "45");
            std::env::set_var("GATEHOUSE_APP_NAME", " Example Auth ");
            std::env::set_var("GATEHOUSE_API_AUDIENCE", "example-api");
        }

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.server.request_timeout_secs, 45);
        assert_eq!(config.server.app_name, "Example Auth");
        assert_eq!(config.auth.api.audience, "example-api");
        assert!(overridden(&config, "server.request_timeout_secs"));
        assert!(overridden(&config, "auth.api.audience"));
        assert!(!overridden(&config, "server.host"));

        unsafe {
            std::env::remove_var("GATEHOUSE_REQUEST_TIMEOUT_SECS");
            std::env::remove_var("GATEHOUSE_APP_NAME");
            std::env::remove_var("GATEHOUSE_API_AUDIENCE");
        }
    }

    #[test]
    fn test_env_bool_variants() {
        for (val, expected) in [
            ("1", true),
            ("true", true),
            ("yes", true),
            ("on", true),
            ("0", false),
            ("false", false),
            ("no", false),
            ("off", false),
        ] {
            // SAFETY: each env-mutating test uses its own variables.
            unsafe { std::env::set_var("GATEHOUSE_LOG_JSON", val); }
            let mut config = Config::default();
            config.apply_env_overrides();
            assert_eq!(config.logging.json, expected, "GATEHOUSE_LOG_JSON={val}");
        }
        unsafe { std::env::remove_var("GATEHOUSE_LOG_JSON"); }
    }

    #[test]
    fn test_env_skip_prefixes_split() {
        // SAFETY: each env-mutating test uses its own variables.
        unsafe { std::env::set_var("GATEHOUSE_SESSION_SKIP_PREFIXES", "/assets/, /api/ ,"); }
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.auth.session.skip_prefixes, vec!["/assets/", "/api/"]);
        unsafe { std::env::remove_var("GATEHOUSE_SESSION_SKIP_PREFIXES"); }
    }

    #[test]
    fn test_env_unparsable_number_ignored() {
        // SAFETY: each env-mutating test uses its own variables.
        unsafe { std::env::set_var("GATEHOUSE_RATE_LIMIT_WINDOW_SECS", "soon"); }
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.auth.rate_limit.window_secs, 60);
        assert!(!overridden(&config, "auth.rate_limit.window_secs"));
        unsafe { std::env::remove_var("GATEHOUSE_RATE_LIMIT_WINDOW_SECS"); }
    }

    #[test]
    fn test_seconds_clamps_huge_values() {
        assert_eq!(seconds(90), chrono::Duration::seconds(90));
        assert_eq!(seconds(u64::MAX), chrono::Duration::seconds(MAX_CONFIG_SECS));
    }
}
