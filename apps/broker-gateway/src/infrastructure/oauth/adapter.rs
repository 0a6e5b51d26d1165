//! OAuth broker adapter.

use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::adapter::{AuthInfo, AuthState, AuthStatus, BrokerAdapter, BrokerRequest};
use crate::broker::envelope::CallEnvelope;
use crate::broker::error::CallError;
use crate::broker::executor::CallExecutor;
use crate::broker::rate_limit::RateLimiter;
use crate::broker::session::SessionStore;
use crate::config::OAuthBrokerConfig;

use super::api_types::TokenRecord;
use super::client::OAuthHttpClient;

/// A failed authentication attempt.
struct AuthFailure {
    status: AuthStatus,
    message: String,
    requires_setup: bool,
}

/// Broker adapter for OAuth backends with auto-refreshing tokens.
///
/// The first authorization (interactive redirect) runs out-of-band and
/// leaves a token record on disk; from then on the adapter loads the
/// record and refreshes it transparently as it nears expiry. A failed
/// refresh lands in `TokenExpired`, signaling that setup must be re-run,
/// a different remediation than a rejected password.
pub struct OAuthBroker {
    config: OAuthBrokerConfig,
    client: Option<OAuthHttpClient>,
    auth: AuthState,
    store: SessionStore,
    executor: CallExecutor,
    tokens: std::sync::RwLock<Option<TokenRecord>>,
}

impl OAuthBroker {
    /// Build the adapter and register its rate budget with `limiter`.
    pub fn new(config: OAuthBrokerConfig, limiter: Arc<RateLimiter>) -> Result<Self, CallError> {
        limiter.configure(&config.name, config.rate);
        let executor = CallExecutor::new(limiter, config.retry.clone());
        let store = SessionStore::new(config.token_file.clone());

        let (client, auth) = if config.is_configured() {
            let client = OAuthHttpClient::new(
                config.base_url.as_deref().unwrap_or_default(),
                config.api_key.clone().unwrap_or_default(),
                config.app_secret.clone().unwrap_or_default(),
                config.http_timeout,
            )?;
            (
                Some(client),
                AuthState::new(AuthInfo::not_authenticated(&config.name)),
            )
        } else {
            (
                None,
                AuthState::new(
                    AuthInfo::not_configured(&config.name, config.setup_instructions())
                        .with_requires_setup(),
                ),
            )
        };

        Ok(Self {
            client,
            auth,
            store,
            executor,
            tokens: std::sync::RwLock::new(None),
            config,
        })
    }

    fn read_record(&self) -> Option<TokenRecord> {
        match self.tokens.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_record(&self, record: Option<TokenRecord>) {
        match self.tokens.write() {
            Ok(mut guard) => *guard = record,
            Err(poisoned) => *poisoned.into_inner() = record,
        }
    }

    /// In-memory record, falling back to the persisted one.
    async fn load_record(&self) -> Option<TokenRecord> {
        if let Some(record) = self.read_record() {
            return Some(record);
        }
        match self.store.load::<TokenRecord>().await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(
                    broker = %self.config.name,
                    error = %err,
                    "failed to read persisted token record"
                );
                None
            }
        }
    }

    /// Whether the current access token needs a refresh before use.
    fn token_needs_refresh(&self) -> bool {
        self.read_record()
            .is_none_or(|record| record.expires_within(self.config.refresh_leeway))
    }

    /// Load-or-refresh flow run under the attempt lock.
    ///
    /// With `force` the refresh happens even for a locally fresh token,
    /// the path taken when the backend has rejected it mid-call.
    async fn token_flow(
        &self,
        client: &OAuthHttpClient,
        force: bool,
    ) -> Result<TokenRecord, AuthFailure> {
        let Some(record) = self.load_record().await else {
            return Err(AuthFailure {
                status: AuthStatus::AuthFailed,
                message: format!(
                    "no authorization token found at '{}'; run the interactive authorization flow first",
                    self.store.path().display()
                ),
                requires_setup: true,
            });
        };

        if !force && !record.expires_within(self.config.refresh_leeway) {
            tracing::info!(broker = %self.config.name, "loaded valid token record");
            return Ok(record);
        }

        tracing::info!(broker = %self.config.name, "token near expiry, refreshing");
        match client.refresh(&record.refresh_token).await {
            Ok(response) => {
                let rotated = record.rotated(&response);
                if let Err(err) = self.store.save(&rotated).await {
                    tracing::warn!(
                        broker = %self.config.name,
                        error = %err,
                        "failed to persist refreshed token record"
                    );
                }
                Ok(rotated)
            }
            Err(err) => Err(AuthFailure {
                status: AuthStatus::TokenExpired,
                message: format!(
                    "token refresh failed: {err}; re-run the authorization flow"
                ),
                requires_setup: false,
            }),
        }
    }

    /// One serialized authentication attempt, quick path skipped.
    ///
    /// Used both by `authenticate()` and as the executor's one-shot
    /// re-auth hook when the backend rejects a token mid-call.
    async fn refresh_attempt(&self, force: bool) -> bool {
        let Some(client) = self.client.as_ref() else {
            return false;
        };

        let _guard = self.auth.lock_attempt().await;

        // A concurrent attempt already produced a usable token.
        if !force && self.auth.status() == AuthStatus::Authenticated && !self.token_needs_refresh()
        {
            return true;
        }

        self.auth.begin_attempt();

        match tokio::time::timeout(self.config.auth_deadline, self.token_flow(client, force)).await
        {
            Ok(Ok(record)) => {
                self.set_record(Some(record));
                self.auth.succeed();
                true
            }
            Ok(Err(failure)) => {
                tracing::warn!(
                    broker = %self.config.name,
                    status = %failure.status,
                    error = %failure.message,
                    "authentication failed"
                );
                if failure.requires_setup {
                    self.auth.fail_requiring_setup(
                        failure.status,
                        failure.message,
                        self.config.setup_instructions(),
                    );
                } else {
                    self.auth.fail(failure.status, failure.message);
                }
                false
            }
            Err(_) => {
                self.auth.fail(
                    AuthStatus::AuthFailed,
                    format!(
                        "authentication timed out after {}s",
                        self.config.auth_deadline.as_secs()
                    ),
                );
                false
            }
        }
    }
}

#[async_trait]
impl BrokerAdapter for OAuthBroker {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn auth_info(&self) -> AuthInfo {
        self.auth.snapshot()
    }

    async fn authenticate(&self) -> bool {
        if self.client.is_none() {
            return false;
        }

        // Quick path: a live token needs no attempt.
        if self.auth.status() == AuthStatus::Authenticated && !self.token_needs_refresh() {
            return true;
        }

        tracing::info!(broker = %self.config.name, "authenticating");
        self.refresh_attempt(false).await
    }

    async fn is_available(&self) -> bool {
        self.auth.status() == AuthStatus::Authenticated && self.read_record().is_some()
    }

    async fn invoke(&self, request: BrokerRequest) -> CallEnvelope {
        let operation = request.operation();

        if !self.is_available().await {
            return CallEnvelope::unavailable(&self.auth_info(), operation);
        }
        let Some(client) = self.client.as_ref() else {
            return CallEnvelope::unavailable(&self.auth_info(), operation);
        };

        // Transparent refresh ahead of a known-stale access token.
        if self.token_needs_refresh() && !self.refresh_attempt(false).await {
            return CallEnvelope::unavailable(&self.auth_info(), operation);
        }

        let broker = self;
        let request_ref = &request;
        let result = self
            .executor
            .run_with_reauth(
                &self.config.name,
                operation,
                move || async move {
                    let token = broker
                        .read_record()
                        .map(|record| record.access_token)
                        .ok_or_else(|| CallError::AuthExpired("no access token".to_string()))?;
                    client.call(&token, request_ref).await
                },
                move || async move { broker.refresh_attempt(true).await },
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
        self.set_record(None);
        if let Err(err) = self.store.clear().await {
            tracing::warn!(
                broker = %self.config.name,
                error = %err,
                "failed to remove persisted token record"
            );
        }
        if self.client.is_some() {
            self.auth.reset();
        }
        tracing::info!(broker = %self.config.name, "logged out");
    }
}
