//! Scripted mock broker for testing.
//!
//! Returns simulated authentication outcomes and call envelopes without
//! network traffic. Useful for registry and coordinator tests that need
//! brokers in specific auth states.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::adapter::{AuthInfo, AuthState, AuthStatus, BrokerAdapter, BrokerRequest};
use super::envelope::CallEnvelope;

/// Scripted login outcome.
#[derive(Debug, Clone)]
enum LoginOutcome {
    Succeed,
    Fail {
        status: AuthStatus,
        message: String,
    },
}

/// Mock broker with a scripted authentication outcome.
///
/// Login attempts are counted so tests can assert that concurrent
/// `authenticate()` calls collapse into a single attempt.
#[derive(Debug)]
pub struct MockBroker {
    name: String,
    auth: AuthState,
    outcome: LoginOutcome,
    login_delay: Duration,
    login_attempts: AtomicU32,
}

impl MockBroker {
    /// A configured mock whose logins succeed.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            auth: AuthState::new(AuthInfo::not_authenticated(&name)),
            name,
            outcome: LoginOutcome::Succeed,
            login_delay: Duration::ZERO,
            login_attempts: AtomicU32::new(0),
        }
    }

    /// An unconfigured mock (no credentials).
    #[must_use]
    pub fn unconfigured(name: impl Into<String>) -> Self {
        let name = name.into();
        let instructions = format!(
            "Set {}_USERNAME and {}_PASSWORD environment variables.",
            name.to_uppercase(),
            name.to_uppercase()
        );
        Self {
            auth: AuthState::new(AuthInfo::not_configured(&name, instructions)),
            name,
            outcome: LoginOutcome::Succeed,
            login_delay: Duration::ZERO,
            login_attempts: AtomicU32::new(0),
        }
    }

    /// Script the login to fail with `status` and `message`.
    #[must_use]
    pub fn failing(mut self, status: AuthStatus, message: impl Into<String>) -> Self {
        self.outcome = LoginOutcome::Fail {
            status,
            message: message.into(),
        };
        self
    }

    /// Add a simulated network delay to each login attempt.
    #[must_use]
    pub const fn with_login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = delay;
        self
    }

    /// Number of actual login attempts performed.
    #[must_use]
    pub fn login_attempts(&self) -> u32 {
        self.login_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerAdapter for MockBroker {
    fn name(&self) -> &str {
        &self.name
    }

    fn auth_info(&self) -> AuthInfo {
        self.auth.snapshot()
    }

    async fn authenticate(&self) -> bool {
        if !self.is_configured() {
            return false;
        }

        let _guard = self.auth.lock_attempt().await;

        // A sibling finished the login while we queued.
        if self.auth.status() == AuthStatus::Authenticated {
            return true;
        }

        self.auth.begin_attempt();
        self.login_attempts.fetch_add(1, Ordering::SeqCst);

        if !self.login_delay.is_zero() {
            tokio::time::sleep(self.login_delay).await;
        }

        match &self.outcome {
            LoginOutcome::Succeed => {
                self.auth.succeed();
                true
            }
            LoginOutcome::Fail { status, message } => {
                self.auth.fail(*status, message.clone());
                false
            }
        }
    }

    async fn is_available(&self) -> bool {
        self.auth.status() == AuthStatus::Authenticated
    }

    async fn invoke(&self, request: BrokerRequest) -> CallEnvelope {
        if !self.is_available().await {
            return CallEnvelope::unavailable(&self.auth_info(), request.operation());
        }
        CallEnvelope::success(serde_json::json!({
            "broker": self.name,
            "operation": request.operation(),
        }))
    }

    async fn logout(&self) {
        self.auth.reset();
    }
}
