// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Broker Gateway - Core Library
//!
//! A gateway process that authenticates against one or more brokerage
//! backends, keeps their sessions alive, and executes API calls against
//! them under per-backend rate budgets with bounded retries. Callers get
//! a uniform, never-throwing result contract regardless of which backend
//! a call is routed to.
//!
//! # Architecture
//!
//! - **`broker`**: the broker-abstraction layer: the [`BrokerAdapter`]
//!   contract and its authentication state machine, the
//!   [`BrokerRegistry`] with graceful degradation, the token-bucket
//!   [`RateLimiter`], the retrying [`CallExecutor`] with error
//!   classification, and the startup coordinator.
//! - **`infrastructure`**: the two backend variants:
//!   [`CredentialSessionBroker`] (username/password + device
//!   verification, persisted session blob) and [`OAuthBroker`]
//!   (API key/secret + auto-refreshing token record).
//! - **`config`**: environment-only configuration; missing credentials
//!   are a configuration state, not an error.
//!
//! # Degradation contract
//!
//! Authentication failures never abort the process and never leak across
//! the registry boundary: a failed backend reports its status through the
//! query surface and returns structured error envelopes from calls, while
//! every other backend keeps working.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Broker abstraction layer: contract, registry, limiter, executor.
pub mod broker;

/// Environment-based configuration.
pub mod config;

/// Concrete backend adapters.
pub mod infrastructure;

// Re-exports for the common surface
pub use broker::{
    AuthInfo, AuthStatus, AuthSummary, BrokerAdapter, BrokerRegistry, BrokerRequest,
    BrokerStatusReport, CallEnvelope, CallError, CallExecutor, ErrorClass, RateBucketConfig,
    RateLimiter, RetryPolicy, attempt_broker_logins, run_session_keepalive,
};
pub use config::{ConfigError, CredentialBrokerConfig, GatewayConfig, OAuthBrokerConfig};
pub use infrastructure::credential::CredentialSessionBroker;
pub use infrastructure::oauth::OAuthBroker;
