//! Credential-session broker adapter.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::broker::adapter::{AuthInfo, AuthState, AuthStatus, BrokerAdapter, BrokerRequest};
use crate::broker::envelope::CallEnvelope;
use crate::broker::error::CallError;
use crate::broker::executor::CallExecutor;
use crate::broker::rate_limit::RateLimiter;
use crate::broker::session::SessionStore;
use crate::config::CredentialBrokerConfig;

use super::api_types::{ChallengeState, LoginRequest, LoginResponse, SessionBlob};
use super::client::CredentialHttpClient;

/// Session lifetime requested from the backend.
const SESSION_TTL_SECS: u64 = 86_400;

/// A failed login attempt: terminal status plus a human-readable message.
struct LoginFailure {
    status: AuthStatus,
    message: String,
}

impl LoginFailure {
    fn auth_failed(message: impl Into<String>) -> Self {
        Self {
            status: AuthStatus::AuthFailed,
            message: message.into(),
        }
    }
}

/// Broker adapter for username/password backends with device verification.
///
/// Login order: restore the persisted session blob (cheap path), then a
/// full credential login, entering a bounded poll loop when the backend
/// demands out-of-band device approval. The minted session is persisted
/// atomically and reloaded on the next startup.
pub struct CredentialSessionBroker {
    config: CredentialBrokerConfig,
    client: Option<CredentialHttpClient>,
    auth: AuthState,
    store: SessionStore,
    executor: CallExecutor,
    session: std::sync::RwLock<Option<SessionBlob>>,
    device_token: String,
}

impl CredentialSessionBroker {
    /// Build the adapter and register its rate budget with `limiter`.
    ///
    /// A missing credential set yields a `NotConfigured` adapter, not an
    /// error; only an unusable HTTP client construction fails.
    pub fn new(
        config: CredentialBrokerConfig,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, CallError> {
        limiter.configure(&config.name, config.rate);
        let executor = CallExecutor::new(limiter, config.retry.clone());
        let store = SessionStore::new(config.session_file.clone());

        let (client, auth) = if config.is_configured() {
            let base_url = config.base_url.clone().unwrap_or_default();
            (
                Some(CredentialHttpClient::new(&base_url, config.http_timeout)?),
                AuthState::new(AuthInfo::not_authenticated(&config.name)),
            )
        } else {
            (
                None,
                AuthState::new(AuthInfo::not_configured(
                    &config.name,
                    config.setup_instructions(),
                )),
            )
        };

        Ok(Self {
            client,
            auth,
            store,
            executor,
            session: std::sync::RwLock::new(None),
            device_token: Uuid::new_v4().to_string(),
            config,
        })
    }

    /// Whether the in-memory session exists and is not past expiry.
    fn session_is_live(&self) -> bool {
        self.read_session()
            .map(|blob| !blob.is_expired())
            .unwrap_or(false)
    }

    fn current_token(&self) -> Option<String> {
        self.read_session().map(|blob| blob.access_token)
    }

    fn read_session(&self) -> Option<SessionBlob> {
        match self.session.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_session(&self, blob: Option<SessionBlob>) {
        match self.session.write() {
            Ok(mut guard) => *guard = blob,
            Err(poisoned) => *poisoned.into_inner() = blob,
        }
    }

    /// Full login flow: restore, credential login, device verification.
    async fn login_flow(&self, client: &CredentialHttpClient) -> Result<SessionBlob, LoginFailure> {
        let stored = match self.store.load::<SessionBlob>().await {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!(
                    broker = %self.config.name,
                    error = %err,
                    "failed to read persisted session, performing full login"
                );
                None
            }
        };

        if let Some(blob) = &stored {
            if blob.is_expired() {
                tracing::debug!(broker = %self.config.name, "persisted session expired");
            } else {
                match client.verify_session(&blob.access_token).await {
                    Ok(()) => {
                        tracing::info!(broker = %self.config.name, "restored persisted session");
                        return Ok(blob.clone());
                    }
                    Err(err) => {
                        tracing::warn!(
                            broker = %self.config.name,
                            error = %err,
                            "persisted session rejected, performing full login"
                        );
                    }
                }
            }
        }

        // Reuse the device the backend already verified, if any.
        let device_token = stored
            .map(|blob| blob.device_token)
            .unwrap_or_else(|| self.device_token.clone());

        let request = LoginRequest {
            username: self.config.username.clone().unwrap_or_default(),
            password: self.config.password.clone().unwrap_or_default(),
            device_token: device_token.clone(),
            expires_in: SESSION_TTL_SECS,
            challenge_id: None,
        };

        let response = client
            .login(&request)
            .await
            .map_err(|err| LoginFailure::auth_failed(format!("login failed: {err}")))?;

        if let Some(blob) = Self::blob_from_response(&response, &device_token) {
            return Ok(blob);
        }

        let Some(challenge) = response.challenge else {
            return Err(LoginFailure::auth_failed(
                "login response carried neither a session nor a challenge",
            ));
        };

        self.await_device_approval(client, &challenge.id).await?;

        // Redeem the approved challenge for a session token.
        let redeem = LoginRequest {
            challenge_id: Some(challenge.id),
            ..request
        };
        let response = client
            .login(&redeem)
            .await
            .map_err(|err| LoginFailure::auth_failed(format!("login failed: {err}")))?;

        Self::blob_from_response(&response, &device_token).ok_or_else(|| {
            LoginFailure::auth_failed("backend did not mint a session after device approval")
        })
    }

    /// Poll the verification challenge until approved, denied, or timed
    /// out. Sets `MfaRequired` for the duration of the wait.
    async fn await_device_approval(
        &self,
        client: &CredentialHttpClient,
        challenge_id: &str,
    ) -> Result<(), LoginFailure> {
        tracing::info!(
            broker = %self.config.name,
            challenge_id,
            "device verification required, waiting for approval"
        );
        self.auth.fail(
            AuthStatus::MfaRequired,
            "waiting for out-of-band device approval",
        );

        let poll = async {
            loop {
                tokio::time::sleep(self.config.verification_poll_interval).await;
                match client.challenge_status(challenge_id).await {
                    Ok(ChallengeState::Approved) => return Ok(()),
                    Ok(ChallengeState::Denied) => {
                        return Err(LoginFailure::auth_failed(
                            "device verification was denied",
                        ));
                    }
                    Ok(ChallengeState::Pending | ChallengeState::Unknown) => {}
                    Err(err) => {
                        tracing::warn!(
                            broker = %self.config.name,
                            error = %err,
                            "challenge poll failed, will retry"
                        );
                    }
                }
            }
        };

        match tokio::time::timeout(self.config.verification_timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(LoginFailure::auth_failed(format!(
                "device verification timed out after {}s; approve the login from your device and retry",
                self.config.verification_timeout.as_secs()
            ))),
        }
    }

    fn blob_from_response(response: &LoginResponse, device_token: &str) -> Option<SessionBlob> {
        let access_token = response.access_token.clone()?;
        let ttl = response.expires_in.unwrap_or(SESSION_TTL_SECS);
        Some(SessionBlob {
            access_token,
            device_token: device_token.to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(ttl as i64),
        })
    }
}

#[async_trait]
impl BrokerAdapter for CredentialSessionBroker {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn auth_info(&self) -> AuthInfo {
        self.auth.snapshot()
    }

    async fn authenticate(&self) -> bool {
        let Some(client) = &self.client else {
            return false;
        };

        let _guard = self.auth.lock_attempt().await;

        // A concurrent attempt finished while we queued on the lock.
        if self.auth.status() == AuthStatus::Authenticated && self.session_is_live() {
            return true;
        }

        self.auth.begin_attempt();
        tracing::info!(broker = %self.config.name, "authenticating");

        match tokio::time::timeout(self.config.auth_deadline, self.login_flow(client)).await {
            Ok(Ok(blob)) => {
                if let Err(err) = self.store.save(&blob).await {
                    tracing::warn!(
                        broker = %self.config.name,
                        error = %err,
                        "failed to persist session blob"
                    );
                }
                self.set_session(Some(blob));
                self.auth.succeed();
                tracing::info!(broker = %self.config.name, "authentication successful");
                true
            }
            Ok(Err(failure)) => {
                tracing::warn!(
                    broker = %self.config.name,
                    status = %failure.status,
                    error = %failure.message,
                    "authentication failed"
                );
                self.auth.fail(failure.status, failure.message);
                false
            }
            Err(_) => {
                let message = format!(
                    "authentication timed out after {}s",
                    self.config.auth_deadline.as_secs()
                );
                tracing::warn!(broker = %self.config.name, "{message}");
                self.auth.fail(AuthStatus::AuthFailed, message);
                false
            }
        }
    }

    async fn is_available(&self) -> bool {
        if self.auth.status() != AuthStatus::Authenticated {
            return false;
        }
        if self.session_is_live() {
            true
        } else {
            self.auth.fail(AuthStatus::TokenExpired, "session expired");
            false
        }
    }

    async fn invoke(&self, request: BrokerRequest) -> CallEnvelope {
        let operation = request.operation();

        if !self.is_available().await {
            return CallEnvelope::unavailable(&self.auth_info(), operation);
        }
        let Some(client) = self.client.as_ref() else {
            return CallEnvelope::unavailable(&self.auth_info(), operation);
        };

        let broker = self;
        let request_ref = &request;
        let result = self
            .executor
            .run_with_reauth(
                &self.config.name,
                operation,
                move || async move {
                    let token = broker.current_token().ok_or_else(|| {
                        CallError::AuthExpired("no active session".to_string())
                    })?;
                    client.call(&token, request_ref).await
                },
                move || async move {
                    // Force a fresh login: the backend has rejected the
                    // session the quick path would otherwise reuse.
                    broker.auth.set_status(AuthStatus::TokenExpired);
                    broker.authenticate().await
                },
            )
            .await;

        match result {
            Ok(value) => CallEnvelope::success(value),
            Err(err) => {
                tracing::warn!(
                    broker = %self.config.name,
                    operation,
                    error = %err,
                    "call failed"
                );
                CallEnvelope::call_failed(&self.config.name, self.auth.status(), &err)
            }
        }
    }

    async fn logout(&self) {
        if let (Some(client), Some(token)) = (&self.client, self.current_token()) {
            if let Err(err) = client.revoke(&token).await {
                tracing::warn!(
                    broker = %self.config.name,
                    error = %err,
                    "logout call failed"
                );
            }
        }

        self.set_session(None);
        if let Err(err) = self.store.clear().await {
            tracing::warn!(
                broker = %self.config.name,
                error = %err,
                "failed to remove persisted session"
            );
        }
        if self.client.is_some() {
            self.auth.reset();
        }
        tracing::info!(broker = %self.config.name, "logged out");
    }
}
