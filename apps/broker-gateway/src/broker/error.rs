//! Call error taxonomy and retry classification.
//!
//! Raw failures from backend calls are mapped into [`CallError`] variants,
//! and every variant classifies into exactly one [`ErrorClass`]:
//!
//! | Class | Examples | Executor behavior |
//! |-------|----------|-------------------|
//! | `Transient` | timeouts, connection resets, 5xx, 408 | retry with backoff |
//! | `RateLimited` | HTTP 429 | retry with backoff (honoring Retry-After) |
//! | `AuthExpired` | HTTP 401/403 | one silent re-auth, then one retry |
//! | `Fatal` | other 4xx, malformed payloads | return immediately |

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a call failure for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient network or server failure; safe to retry.
    Transient,
    /// The backend's rate budget rejected the call; safe to retry later.
    RateLimited,
    /// The session or token was rejected; re-authenticate before retrying.
    AuthExpired,
    /// Permanent rejection; retrying cannot help.
    Fatal,
}

impl ErrorClass {
    /// Whether this class is eligible for transparent retries.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

/// A failure from one backend call.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// Network-level failure (timeout, connect, DNS, reset).
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status outside the dedicated variants.
    #[error("backend returned HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },

    /// The backend rejected the call for exceeding its rate budget.
    #[error("rate limited by backend{}", .retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited {
        /// Suggested delay from a Retry-After header, if present.
        retry_after_secs: Option<u64>,
    },

    /// The backend no longer accepts the current session or token.
    #[error("session rejected by backend: {0}")]
    AuthExpired(String),

    /// Permanent rejection of the request itself.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The backend answered with a payload the gateway cannot parse.
    #[error("malformed backend response: {0}")]
    MalformedResponse(String),
}

impl CallError {
    /// Classify this error for the retry executor.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Network(_) => ErrorClass::Transient,
            Self::Status { status, .. } => classify_status(*status),
            Self::RateLimited { .. } => ErrorClass::RateLimited,
            Self::AuthExpired(_) => ErrorClass::AuthExpired,
            Self::Rejected(_) | Self::MalformedResponse(_) => ErrorClass::Fatal,
        }
    }

    /// Map an HTTP status and body into the right variant.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited {
                retry_after_secs: None,
            },
            401 | 403 => Self::AuthExpired(message),
            _ => Self::Status { status, message },
        }
    }

    /// Map a transport error from the HTTP client.
    #[must_use]
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Network(format!("request timed out: {err}"))
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Classify a bare HTTP status code.
const fn classify_status(status: u16) -> ErrorClass {
    match status {
        429 => ErrorClass::RateLimited,
        401 | 403 => ErrorClass::AuthExpired,
        408 | 500..=599 => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(500 => ErrorClass::Transient; "internal server error")]
    #[test_case(502 => ErrorClass::Transient; "bad gateway")]
    #[test_case(503 => ErrorClass::Transient; "service unavailable")]
    #[test_case(504 => ErrorClass::Transient; "gateway timeout")]
    #[test_case(408 => ErrorClass::Transient; "request timeout")]
    #[test_case(429 => ErrorClass::RateLimited; "too many requests")]
    #[test_case(401 => ErrorClass::AuthExpired; "unauthorized")]
    #[test_case(403 => ErrorClass::AuthExpired; "forbidden")]
    #[test_case(400 => ErrorClass::Fatal; "bad request")]
    #[test_case(404 => ErrorClass::Fatal; "not found")]
    #[test_case(422 => ErrorClass::Fatal; "unprocessable entity")]
    fn status_classification(status: u16) -> ErrorClass {
        classify_status(status)
    }

    #[test]
    fn from_status_picks_dedicated_variants() {
        assert!(matches!(
            CallError::from_status(429, "slow down"),
            CallError::RateLimited { .. }
        ));
        assert!(matches!(
            CallError::from_status(401, "expired"),
            CallError::AuthExpired(_)
        ));
        assert!(matches!(
            CallError::from_status(502, "upstream"),
            CallError::Status { status: 502, .. }
        ));
    }

    #[test]
    fn network_errors_are_transient() {
        let err = CallError::Network("connection reset".to_string());
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(err.class().is_retryable());
    }

    #[test]
    fn fatal_errors_are_not_retryable() {
        let err = CallError::Rejected("insufficient buying power".to_string());
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert!(!err.class().is_retryable());

        let err = CallError::MalformedResponse("unexpected EOF".to_string());
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn auth_expired_is_not_plainly_retryable() {
        let err = CallError::AuthExpired("token revoked".to_string());
        assert_eq!(err.class(), ErrorClass::AuthExpired);
        assert!(!err.class().is_retryable());
    }

    #[test]
    fn rate_limited_display_includes_retry_after() {
        let err = CallError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert!(err.to_string().contains("retry after 30s"));

        let err = CallError::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(err.to_string(), "rate limited by backend");
    }
}
