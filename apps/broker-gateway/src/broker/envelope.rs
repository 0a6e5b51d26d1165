//! Uniform call-result envelope.
//!
//! Every operation invocation resolves to a single [`CallEnvelope`]:
//! either a success payload or a structured error. The envelope is
//! returned, never thrown; no error type crosses the registry boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::adapter::{AuthInfo, AuthStatus};
use super::error::CallError;

/// Failure category carried in an error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStatus {
    /// The broker could not serve the call at all (not configured, not
    /// authenticated, session expired, MFA pending).
    BrokerUnavailable,
    /// The broker was available but the call failed after classification
    /// and any permitted retries.
    CallFailed,
}

/// Structured error payload of a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFailure {
    /// Human-readable description with a remediation hint where one exists.
    pub message: String,
    /// Failure category.
    pub status: FailureStatus,
    /// Broker the call was routed to.
    pub broker: String,
    /// The broker's authentication status at failure time.
    pub auth_status: AuthStatus,
    /// Whether retrying the same call later may succeed.
    pub retryable: bool,
}

/// Result envelope for one operation invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallEnvelope {
    /// The call succeeded; `result` holds the reshaped backend payload.
    Success {
        /// Backend response payload.
        result: Value,
    },
    /// The call failed; `error` carries the structured failure.
    Failure {
        /// Structured failure detail.
        error: CallFailure,
    },
}

impl CallEnvelope {
    /// Wrap a success payload.
    #[must_use]
    pub const fn success(result: Value) -> Self {
        Self::Success { result }
    }

    /// Build a `broker_unavailable` envelope from an auth snapshot.
    ///
    /// The message names the broker, describes why it is unavailable, and
    /// carries the remediation hint for the current status.
    #[must_use]
    pub fn unavailable(info: &AuthInfo, operation: &str) -> Self {
        let broker = info.broker_name.as_str();
        let message = match info.status {
            AuthStatus::NotConfigured => {
                let hint = info.setup_instructions.as_deref().map_or_else(
                    || {
                        let prefix = broker.to_uppercase();
                        format!("Set {prefix}_* credential environment variables.")
                    },
                    ToString::to_string,
                );
                format!("Broker '{broker}' is not configured. {hint}")
            }
            AuthStatus::AuthFailed => {
                let detail = info.error_message.as_deref().unwrap_or("unknown error");
                format!("Broker '{broker}' authentication failed: {detail}")
            }
            AuthStatus::TokenExpired => format!(
                "Broker '{broker}' session expired. Re-run setup or restart the gateway to re-authenticate."
            ),
            AuthStatus::MfaRequired => format!(
                "Broker '{broker}' is waiting on device/MFA approval. Approve the login and retry."
            ),
            AuthStatus::Authenticating => {
                format!("Broker '{broker}' authentication is in progress. Try again shortly.")
            }
            AuthStatus::NotAuthenticated | AuthStatus::Authenticated => {
                format!("Broker '{broker}' is not available for {operation}.")
            }
        };

        Self::Failure {
            error: CallFailure {
                message,
                status: FailureStatus::BrokerUnavailable,
                broker: broker.to_string(),
                auth_status: info.status,
                retryable: matches!(
                    info.status,
                    AuthStatus::Authenticating | AuthStatus::MfaRequired
                ),
            },
        }
    }

    /// Build a `call_failed` envelope from a classified call error.
    #[must_use]
    pub fn call_failed(broker: &str, auth_status: AuthStatus, error: &CallError) -> Self {
        Self::Failure {
            error: CallFailure {
                message: error.to_string(),
                status: FailureStatus::CallFailed,
                broker: broker.to_string(),
                auth_status,
                retryable: error.class().is_retryable(),
            },
        }
    }

    /// Whether this envelope carries a success payload.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The failure payload, if any.
    #[must_use]
    pub const fn failure(&self) -> Option<&CallFailure> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error } => Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_round_trips_payload() {
        let envelope = CallEnvelope::success(serde_json::json!({"price": 187.12}));
        assert!(envelope.is_success());
        assert!(envelope.failure().is_none());

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["result"]["price"], 187.12);
    }

    #[test]
    fn unavailable_not_configured_uses_setup_instructions() {
        let info = AuthInfo::not_configured("demo", "Set DEMO_USERNAME and DEMO_PASSWORD.");
        let envelope = CallEnvelope::unavailable(&info, "quote");

        let failure = envelope.failure().unwrap();
        assert_eq!(failure.status, FailureStatus::BrokerUnavailable);
        assert_eq!(failure.auth_status, AuthStatus::NotConfigured);
        assert!(failure.message.contains("DEMO_USERNAME"));
        assert!(!failure.retryable);
    }

    #[test]
    fn unavailable_auth_failed_carries_error_detail() {
        let mut info = AuthInfo::not_authenticated("demo");
        info.status = AuthStatus::AuthFailed;
        info.error_message = Some("login rejected".to_string());

        let envelope = CallEnvelope::unavailable(&info, "positions");
        let failure = envelope.failure().unwrap();
        assert!(failure.message.contains("login rejected"));
        assert!(!failure.retryable);
    }

    #[test]
    fn unavailable_mfa_is_retryable() {
        let mut info = AuthInfo::not_authenticated("demo");
        info.status = AuthStatus::MfaRequired;

        let envelope = CallEnvelope::unavailable(&info, "quote");
        let failure = envelope.failure().unwrap();
        assert!(failure.retryable);
        assert!(failure.message.contains("approval"));
    }

    #[test]
    fn failure_serializes_wire_shape() {
        let mut info = AuthInfo::not_authenticated("demo");
        info.status = AuthStatus::TokenExpired;

        let envelope = CallEnvelope::unavailable(&info, "account_info");
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["error"]["status"], "broker_unavailable");
        assert_eq!(json["error"]["broker"], "demo");
        assert_eq!(json["error"]["auth_status"], "token_expired");
    }

    #[test]
    fn envelope_deserializes_both_variants() {
        let success: CallEnvelope = serde_json::from_str(r#"{"result": {"ok": true}}"#).unwrap();
        assert!(success.is_success());

        let failure: CallEnvelope = serde_json::from_str(
            r#"{"error": {"message": "m", "status": "call_failed", "broker": "demo",
                "auth_status": "authenticated", "retryable": true}}"#,
        )
        .unwrap();
        assert_eq!(failure.failure().unwrap().status, FailureStatus::CallFailed);
    }
}
