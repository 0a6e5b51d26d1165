//! Wire types for the credential-session backend API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Login request body.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    /// Account username.
    pub username: String,
    /// Account password.
    pub password: String,
    /// Stable per-install device identifier.
    pub device_token: String,
    /// Requested session lifetime in seconds.
    pub expires_in: u64,
    /// Approved challenge being redeemed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<String>,
}

/// Login response: either a minted session or a verification challenge.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    /// Session token, present when login completed.
    pub access_token: Option<String>,
    /// Session lifetime in seconds.
    pub expires_in: Option<u64>,
    /// Device-verification challenge, present when approval is required.
    pub challenge: Option<ChallengeInfo>,
}

/// Device-verification challenge issued by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeInfo {
    /// Challenge identifier to poll.
    pub id: String,
}

/// State of a device-verification challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeState {
    /// Waiting for out-of-band approval.
    Pending,
    /// Approved; the login can be redeemed.
    Approved,
    /// Rejected by the account holder or the backend.
    Denied,
    /// Any state this gateway does not recognize.
    #[serde(other)]
    Unknown,
}

/// Challenge status poll response.
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeStatusResponse {
    /// Current challenge state.
    pub status: ChallengeState,
}

/// Error body returned by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Human-readable failure detail.
    pub detail: Option<String>,
}

/// Persisted session artifact for a credential backend.
///
/// One per adapter, written on successful login and reloaded on the next
/// startup if still valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBlob {
    /// Session token presented as a bearer credential.
    pub access_token: String,
    /// Device identifier the session was minted for; reused on the next
    /// login so the backend can skip re-verification.
    pub device_token: String,
    /// Session expiry.
    pub expires_at: DateTime<Utc>,
}

impl SessionBlob {
    /// Whether the session is past its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration as ChronoDuration;

    #[test]
    fn challenge_state_parses_known_and_unknown() {
        let state: ChallengeState = serde_json::from_str("\"pending\"").unwrap();
        assert_eq!(state, ChallengeState::Pending);

        let state: ChallengeState = serde_json::from_str("\"approved\"").unwrap();
        assert_eq!(state, ChallengeState::Approved);

        let state: ChallengeState = serde_json::from_str("\"escalated\"").unwrap();
        assert_eq!(state, ChallengeState::Unknown);
    }

    #[test]
    fn session_blob_expiry() {
        let fresh = SessionBlob {
            access_token: "token".to_string(),
            device_token: "device".to_string(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        };
        assert!(!fresh.is_expired());

        let stale = SessionBlob {
            expires_at: Utc::now() - ChronoDuration::minutes(1),
            ..fresh
        };
        assert!(stale.is_expired());
    }

    #[test]
    fn login_request_omits_absent_challenge() {
        let request = LoginRequest {
            username: "user".to_string(),
            password: "pass".to_string(),
            device_token: "device".to_string(),
            expires_in: 86_400,
            challenge_id: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("challenge_id").is_none());
    }
}
