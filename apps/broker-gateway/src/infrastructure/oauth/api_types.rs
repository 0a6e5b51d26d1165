//! Wire types for the OAuth backend API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// New access token.
    pub access_token: String,
    /// Rotated refresh token; absent when the backend keeps the old one.
    pub refresh_token: Option<String>,
    /// Access-token lifetime in seconds.
    pub expires_in: u64,
}

/// OAuth-style error body.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorResponse {
    /// Error code (e.g. `invalid_grant`).
    pub error: Option<String>,
    /// Human-readable description.
    pub error_description: Option<String>,
}

impl OAuthErrorResponse {
    /// Best human-readable rendering of this error body.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        match (&self.error, &self.error_description) {
            (Some(code), Some(description)) => Some(format!("{code}: {description}")),
            (Some(code), None) => Some(code.clone()),
            (None, Some(description)) => Some(description.clone()),
            (None, None) => None,
        }
    }
}

/// Persisted token record for an OAuth backend.
///
/// Written by the out-of-band authorization flow on first setup and
/// rotated by the adapter on every refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Bearer access token.
    pub access_token: String,
    /// Refresh token used to mint new access tokens.
    pub refresh_token: String,
    /// Access-token expiry.
    pub expires_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Whether the access token expires within `leeway` from now.
    #[must_use]
    pub fn expires_within(&self, leeway: std::time::Duration) -> bool {
        let threshold = Utc::now()
            + chrono::Duration::from_std(leeway).unwrap_or_else(|_| chrono::Duration::zero());
        self.expires_at <= threshold
    }

    /// Apply a token-endpoint response, keeping the old refresh token
    /// when the backend does not rotate it.
    #[must_use]
    pub fn rotated(&self, response: &TokenResponse) -> Self {
        Self {
            access_token: response.access_token.clone(),
            refresh_token: response
                .refresh_token
                .clone()
                .unwrap_or_else(|| self.refresh_token.clone()),
            expires_at: Utc::now() + chrono::Duration::seconds(response.expires_in as i64),
        }
    }
}
