//! Gateway configuration.
//!
//! All configuration is supplied through the process environment; there
//! is no config file. Missing backend credentials are a configuration
//! *state* (the broker reports `not_configured`), never an error. The
//! only process-fatal conditions live here too: an unusable state
//! directory or a malformed gateway-level variable, both detected before
//! any adapter is constructed.

mod brokers;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use brokers::{CredentialBrokerConfig, OAuthBrokerConfig};

/// Default state directory for persisted session artifacts.
const DEFAULT_STATE_DIR: &str = ".broker-gateway";

/// Default keep-alive interval between session checks.
const DEFAULT_KEEPALIVE_SECS: u64 = 300;

/// Configuration errors. All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The state directory cannot be created or is not a directory.
    #[error("unusable state directory '{path}': {reason}")]
    StateDir {
        /// Configured state directory path.
        path: String,
        /// Why it cannot be used.
        reason: String,
    },

    /// A gateway-level environment variable failed to parse.
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidEnvVar {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
        /// Why it failed to parse.
        reason: String,
    },
}

/// Root gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Directory for persisted session artifacts.
    pub state_dir: PathBuf,
    /// Interval between session keep-alive checks.
    pub keepalive_interval: Duration,
    /// Credential + device-verification backend.
    pub credential: CredentialBrokerConfig,
    /// OAuth token-refresh backend.
    pub oauth: OAuthBrokerConfig,
}

impl GatewayConfig {
    /// Load configuration from the process environment.
    ///
    /// Creates the state directory if needed; failure to do so is the
    /// one process-fatal configuration condition.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| {
            std::env::var(key)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let state_dir =
            PathBuf::from(env("GATEWAY_STATE_DIR").unwrap_or_else(|| DEFAULT_STATE_DIR.to_string()));

        std::fs::create_dir_all(&state_dir).map_err(|err| ConfigError::StateDir {
            path: state_dir.display().to_string(),
            reason: err.to_string(),
        })?;
        if !state_dir.is_dir() {
            return Err(ConfigError::StateDir {
                path: state_dir.display().to_string(),
                reason: "not a directory".to_string(),
            });
        }

        let keepalive_interval = parse_secs(
            "GATEWAY_KEEPALIVE_SECS",
            env("GATEWAY_KEEPALIVE_SECS"),
            DEFAULT_KEEPALIVE_SECS,
        )?;

        let credential_name =
            env("GATEWAY_CREDENTIAL_BROKER").unwrap_or_else(|| "credential".to_string());
        let oauth_name = env("GATEWAY_OAUTH_BROKER").unwrap_or_else(|| "oauth".to_string());

        Ok(Self {
            credential: CredentialBrokerConfig::from_env(&credential_name, &state_dir, &env),
            oauth: OAuthBrokerConfig::from_env(&oauth_name, &state_dir, &env),
            state_dir,
            keepalive_interval,
        })
    }
}

/// Parse a seconds value, falling back to `default` when unset.
fn parse_secs(key: &str, value: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|err| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                value: raw,
                reason: err.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn base_vars(state_dir: &std::path::Path) -> HashMap<String, String> {
        [(
            "GATEWAY_STATE_DIR".to_string(),
            state_dir.display().to_string(),
        )]
        .into()
    }

    #[test]
    fn defaults_with_empty_environment() {
        let dir = tempfile::tempdir().unwrap();
        let vars = base_vars(dir.path());

        let config = GatewayConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();

        assert_eq!(config.keepalive_interval, Duration::from_secs(300));
        assert_eq!(config.credential.name, "credential");
        assert_eq!(config.oauth.name, "oauth");
        assert!(!config.credential.is_configured());
        assert!(!config.oauth.is_configured());
        assert_eq!(
            config.credential.session_file,
            dir.path().join("credential_session.json")
        );
    }

    #[test]
    fn broker_names_are_overridable() {
        let dir = tempfile::tempdir().unwrap();
        let mut vars = base_vars(dir.path());
        vars.insert("GATEWAY_CREDENTIAL_BROKER".to_string(), "equity".to_string());
        vars.insert("GATEWAY_OAUTH_BROKER".to_string(), "retire".to_string());
        vars.insert("EQUITY_USERNAME".to_string(), "user".to_string());
        vars.insert("EQUITY_PASSWORD".to_string(), "pass".to_string());
        vars.insert(
            "EQUITY_BASE_URL".to_string(),
            "https://api.example.com".to_string(),
        );

        let config = GatewayConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();

        assert_eq!(config.credential.name, "equity");
        assert!(config.credential.is_configured());
        assert_eq!(config.oauth.name, "retire");
    }

    #[test]
    fn malformed_keepalive_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut vars = base_vars(dir.path());
        vars.insert("GATEWAY_KEEPALIVE_SECS".to_string(), "soon".to_string());

        let err = GatewayConfig::from_lookup(|key| vars.get(key).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { .. }));
    }

    #[test]
    fn unusable_state_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("occupied");
        std::fs::write(&file_path, b"not a directory").unwrap();

        let vars: HashMap<String, String> = [(
            "GATEWAY_STATE_DIR".to_string(),
            file_path.display().to_string(),
        )]
        .into();

        let err = GatewayConfig::from_lookup(|key| vars.get(key).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::StateDir { .. }));
    }
}
