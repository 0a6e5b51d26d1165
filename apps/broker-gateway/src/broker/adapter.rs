//! Broker adapter contract and authentication state.
//!
//! Every backend integration implements [`BrokerAdapter`]: a uniform,
//! never-panicking surface for authentication, availability checks, call
//! execution, and logout. Authentication state lives in [`AuthState`],
//! which enforces the single-writer rule: only the owning adapter mutates
//! its [`AuthInfo`], and readers always receive a cloned snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::CallEnvelope;

/// Authentication status for a broker.
///
/// Exactly one value per adapter at any instant. Transitions are
/// one-directional except for re-authentication cycles
/// (`AuthFailed`/`TokenExpired` → `Authenticating` → `Authenticated` or
/// `AuthFailed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    /// No credentials provided. A configuration state, not an error.
    NotConfigured,
    /// Credentials present, no login attempted yet.
    NotAuthenticated,
    /// A login attempt is in flight.
    Authenticating,
    /// Logged in with a live session.
    Authenticated,
    /// Login was rejected or errored.
    AuthFailed,
    /// A previously valid session or token has expired.
    TokenExpired,
    /// Blocked on out-of-band device/MFA approval.
    MfaRequired,
}

impl AuthStatus {
    /// Wire-format name for status reports and envelopes.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::NotAuthenticated => "not_authenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::AuthFailed => "auth_failed",
            Self::TokenExpired => "token_expired",
            Self::MfaRequired => "mfa_required",
        }
    }
}

impl std::fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication information for a broker.
///
/// Owned exclusively by its adapter; the registry and status queries only
/// ever see cloned snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthInfo {
    /// Broker identifier (e.g. "credential", "oauth").
    pub broker_name: String,
    /// Current authentication status.
    pub status: AuthStatus,
    /// When the last authentication attempt started.
    pub last_auth_attempt: Option<DateTime<Utc>>,
    /// When authentication last succeeded.
    pub last_successful_auth: Option<DateTime<Utc>>,
    /// Human-readable failure detail, if the last attempt failed.
    pub error_message: Option<String>,
    /// True when the backend needs out-of-band setup (OAuth authorization,
    /// API key registration) before it can ever authenticate.
    pub requires_setup: bool,
    /// Remediation hint shown to callers when the broker is unavailable.
    pub setup_instructions: Option<String>,
}

impl AuthInfo {
    /// Auth info for a backend with no credentials configured.
    #[must_use]
    pub fn not_configured(broker_name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            broker_name: broker_name.into(),
            status: AuthStatus::NotConfigured,
            last_auth_attempt: None,
            last_successful_auth: None,
            error_message: None,
            requires_setup: false,
            setup_instructions: Some(instructions.into()),
        }
    }

    /// Auth info for a configured backend that has not logged in yet.
    #[must_use]
    pub fn not_authenticated(broker_name: impl Into<String>) -> Self {
        Self {
            broker_name: broker_name.into(),
            status: AuthStatus::NotAuthenticated,
            last_auth_attempt: None,
            last_successful_auth: None,
            error_message: None,
            requires_setup: false,
            setup_instructions: None,
        }
    }

    /// Mark this info as requiring out-of-band setup.
    #[must_use]
    pub fn with_requires_setup(mut self) -> Self {
        self.requires_setup = true;
        self
    }
}

/// Single-writer authentication state shared inside one adapter.
///
/// The `attempt` lock serializes login attempts: at most one is in flight,
/// and concurrent callers of `authenticate()` queue on it and adopt the
/// winning attempt's result instead of issuing duplicate logins.
#[derive(Debug)]
pub struct AuthState {
    info: std::sync::RwLock<AuthInfo>,
    attempt: tokio::sync::Mutex<()>,
}

impl AuthState {
    /// Create auth state with an initial snapshot.
    #[must_use]
    pub fn new(info: AuthInfo) -> Self {
        Self {
            info: std::sync::RwLock::new(info),
            attempt: tokio::sync::Mutex::new(()),
        }
    }

    /// Cloned snapshot of the current auth info.
    #[must_use]
    pub fn snapshot(&self) -> AuthInfo {
        match self.info.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> AuthStatus {
        self.snapshot().status
    }

    /// Acquire the serialized-attempt lock.
    ///
    /// Hold the guard for the duration of a login attempt.
    pub async fn lock_attempt(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.attempt.lock().await
    }

    /// Record the start of an authentication attempt.
    pub fn begin_attempt(&self) {
        self.update(|info| {
            info.status = AuthStatus::Authenticating;
            info.last_auth_attempt = Some(Utc::now());
        });
    }

    /// Record a successful authentication.
    pub fn succeed(&self) {
        self.update(|info| {
            info.status = AuthStatus::Authenticated;
            info.last_successful_auth = Some(Utc::now());
            info.error_message = None;
        });
    }

    /// Record a failed authentication with a terminal status and message.
    pub fn fail(&self, status: AuthStatus, message: impl Into<String>) {
        let message = message.into();
        self.update(|info| {
            info.status = status;
            info.error_message = Some(message);
        });
    }

    /// Record a failure that needs out-of-band setup before another
    /// attempt can succeed (e.g. an OAuth authorization flow).
    pub fn fail_requiring_setup(
        &self,
        status: AuthStatus,
        message: impl Into<String>,
        instructions: impl Into<String>,
    ) {
        let message = message.into();
        let instructions = instructions.into();
        self.update(|info| {
            info.status = status;
            info.error_message = Some(message);
            info.requires_setup = true;
            info.setup_instructions = Some(instructions);
        });
    }

    /// Set the status without touching timestamps or messages.
    ///
    /// Used for expiry detection (`Authenticated` → `TokenExpired`) and
    /// logout (`→ NotAuthenticated`).
    pub fn set_status(&self, status: AuthStatus) {
        self.update(|info| info.status = status);
    }

    /// Clear error state and return to `NotAuthenticated` (logout).
    pub fn reset(&self) {
        self.update(|info| {
            info.status = AuthStatus::NotAuthenticated;
            info.error_message = None;
        });
    }

    fn update(&self, mutate: impl FnOnce(&mut AuthInfo)) {
        match self.info.write() {
            Ok(mut guard) => mutate(&mut guard),
            Err(poisoned) => mutate(&mut poisoned.into_inner()),
        }
    }
}

/// A backend operation routed through the gateway.
///
/// The operations themselves are thin request/response wrappers; each
/// adapter maps a variant to one native API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum BrokerRequest {
    /// Account information.
    AccountInfo,
    /// Portfolio summary.
    Portfolio,
    /// Open positions.
    Positions,
    /// Full quote for a symbol.
    Quote {
        /// Ticker symbol.
        symbol: String,
    },
    /// Last price for a symbol.
    Price {
        /// Ticker symbol.
        symbol: String,
    },
    /// Market buy order.
    BuyMarket {
        /// Ticker symbol.
        symbol: String,
        /// Number of shares.
        quantity: f64,
    },
    /// Market sell order.
    SellMarket {
        /// Ticker symbol.
        symbol: String,
        /// Number of shares.
        quantity: f64,
    },
}

impl BrokerRequest {
    /// Operation name for logging and error envelopes.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::AccountInfo => "account_info",
            Self::Portfolio => "portfolio",
            Self::Positions => "positions",
            Self::Quote { .. } => "quote",
            Self::Price { .. } => "price",
            Self::BuyMarket { .. } => "buy_market",
            Self::SellMarket { .. } => "sell_market",
        }
    }
}

/// Uniform contract implemented by every backend integration.
///
/// Implementations never panic and never return `Err` across this
/// boundary: authentication failures land in [`AuthInfo`], call failures
/// land in the [`CallEnvelope`].
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Broker identifier.
    fn name(&self) -> &str;

    /// Snapshot of the current authentication info.
    fn auth_info(&self) -> AuthInfo;

    /// Whether credentials are configured for this backend.
    fn is_configured(&self) -> bool {
        self.auth_info().status != AuthStatus::NotConfigured
    }

    /// Run the full authentication flow.
    ///
    /// Never errors: on any failure the adapter records
    /// `AuthFailed`/`TokenExpired`/`MfaRequired` with a human-readable
    /// message and returns `false`. Concurrent calls on one adapter are
    /// serialized; waiters adopt the in-flight attempt's result.
    async fn authenticate(&self) -> bool;

    /// Whether the broker can serve calls right now.
    ///
    /// True only when authenticated and the session is not known-expired.
    /// May flip the status to `TokenExpired` as a side effect of the check.
    async fn is_available(&self) -> bool;

    /// Execute one backend call through the rate limiter and call executor.
    ///
    /// Always returns an envelope; errors are carried inside it.
    async fn invoke(&self, request: BrokerRequest) -> CallEnvelope;

    /// Best-effort logout; clears in-memory and persisted session state.
    ///
    /// Failures are logged, never propagated.
    async fn logout(&self);
}

impl std::fmt::Debug for dyn BrokerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerAdapter")
            .field("name", &self.name())
            .finish()
    }
}
