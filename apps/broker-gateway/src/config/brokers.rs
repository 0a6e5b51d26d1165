//! Per-backend broker configuration from environment variables.
//!
//! For a backend named `n`, every variable is prefixed with
//! `n.to_uppercase()`: a credential backend reads `{N}_USERNAME`,
//! `{N}_PASSWORD` and `{N}_BASE_URL`; an OAuth backend reads
//! `{N}_API_KEY`, `{N}_APP_SECRET` and `{N}_BASE_URL`. A missing
//! credential set yields an unconfigured broker, not an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::broker::rate_limit::RateBucketConfig;
use crate::broker::retry::RetryPolicy;

/// Default HTTP timeout for backend calls.
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a credential + device-verification backend.
#[derive(Clone)]
pub struct CredentialBrokerConfig {
    /// Broker name; also the environment-variable prefix.
    pub name: String,
    /// Login username.
    pub username: Option<String>,
    /// Login password.
    pub password: Option<String>,
    /// Backend API base URL.
    pub base_url: Option<String>,
    /// Path of the persisted session blob.
    pub session_file: PathBuf,
    /// Deadline for one full authenticate() call, device verification
    /// included.
    pub auth_deadline: Duration,
    /// Interval between device-verification polls.
    pub verification_poll_interval: Duration,
    /// Hard timeout for the device-verification poll loop.
    pub verification_timeout: Duration,
    /// HTTP request timeout.
    pub http_timeout: Duration,
    /// Rate budget for this backend.
    pub rate: RateBucketConfig,
    /// Retry policy for this backend's calls.
    pub retry: RetryPolicy,
}

impl CredentialBrokerConfig {
    /// Load from the environment for broker `name`.
    ///
    /// `state_dir` holds the default session-blob location.
    #[must_use]
    pub fn from_env(name: &str, state_dir: &Path, env: impl Fn(&str) -> Option<String>) -> Self {
        let prefix = name.to_uppercase();
        let session_file = env(&format!("{prefix}_SESSION_FILE")).map_or_else(
            || state_dir.join(format!("{name}_session.json")),
            PathBuf::from,
        );

        Self {
            name: name.to_string(),
            username: env(&format!("{prefix}_USERNAME")),
            password: env(&format!("{prefix}_PASSWORD")),
            base_url: env(&format!("{prefix}_BASE_URL")),
            session_file,
            auth_deadline: Duration::from_secs(180),
            verification_poll_interval: Duration::from_secs(5),
            verification_timeout: Duration::from_secs(120),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            rate: RateBucketConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Whether the full credential set is present.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.username.is_some() && self.password.is_some() && self.base_url.is_some()
    }

    /// Remediation hint naming the missing environment variables.
    #[must_use]
    pub fn setup_instructions(&self) -> String {
        let prefix = self.name.to_uppercase();
        format!(
            "Set {prefix}_USERNAME, {prefix}_PASSWORD and {prefix}_BASE_URL environment variables."
        )
    }
}

impl std::fmt::Debug for CredentialBrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBrokerConfig")
            .field("name", &self.name)
            .field("username", &self.username.as_ref().map(|_| "[REDACTED]"))
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("session_file", &self.session_file)
            .finish_non_exhaustive()
    }
}

/// Configuration for an OAuth token-refresh backend.
#[derive(Clone)]
pub struct OAuthBrokerConfig {
    /// Broker name; also the environment-variable prefix.
    pub name: String,
    /// OAuth application key.
    pub api_key: Option<String>,
    /// OAuth application secret.
    pub app_secret: Option<String>,
    /// Redirect URL registered with the backend.
    pub callback_url: String,
    /// Backend API base URL.
    pub base_url: Option<String>,
    /// Path of the persisted token record.
    pub token_file: PathBuf,
    /// Refresh the token when it expires within this leeway.
    pub refresh_leeway: Duration,
    /// Deadline for one full authenticate() call.
    pub auth_deadline: Duration,
    /// HTTP request timeout.
    pub http_timeout: Duration,
    /// Rate budget for this backend.
    pub rate: RateBucketConfig,
    /// Retry policy for this backend's calls.
    pub retry: RetryPolicy,
}

impl OAuthBrokerConfig {
    /// Load from the environment for broker `name`.
    #[must_use]
    pub fn from_env(name: &str, state_dir: &Path, env: impl Fn(&str) -> Option<String>) -> Self {
        let prefix = name.to_uppercase();
        let token_file = env(&format!("{prefix}_TOKEN_FILE")).map_or_else(
            || state_dir.join(format!("{name}_token.json")),
            PathBuf::from,
        );

        Self {
            name: name.to_string(),
            api_key: env(&format!("{prefix}_API_KEY")),
            app_secret: env(&format!("{prefix}_APP_SECRET")),
            callback_url: env(&format!("{prefix}_CALLBACK_URL"))
                .unwrap_or_else(|| "https://127.0.0.1:8182/".to_string()),
            base_url: env(&format!("{prefix}_BASE_URL")),
            token_file,
            refresh_leeway: Duration::from_secs(300),
            auth_deadline: Duration::from_secs(60),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            rate: RateBucketConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Whether the full credential set is present.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.app_secret.is_some() && self.base_url.is_some()
    }

    /// Remediation hint naming the missing environment variables and the
    /// out-of-band authorization step.
    #[must_use]
    pub fn setup_instructions(&self) -> String {
        let prefix = self.name.to_uppercase();
        format!(
            "Set {prefix}_API_KEY, {prefix}_APP_SECRET and {prefix}_BASE_URL environment \
             variables, then run the interactive authorization flow to create the token file."
        )
    }
}

impl std::fmt::Debug for OAuthBrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthBrokerConfig")
            .field("name", &self.name)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("app_secret", &self.app_secret.as_ref().map(|_| "[REDACTED]"))
            .field("callback_url", &self.callback_url)
            .field("base_url", &self.base_url)
            .field("token_file", &self.token_file)
            .finish_non_exhaustive()
    }
}
