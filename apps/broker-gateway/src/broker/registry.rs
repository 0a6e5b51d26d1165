//! Broker registry: directory of adapters and their auth state.
//!
//! The registry is an explicit instance injected wherever backend access
//! is needed; there is no ambient global. It drives authentication
//! attempts, answers availability and status queries, and hands out a
//! ready adapter or a structured unavailability envelope. Every
//! registered name always resolves to *some* auth info, even
//! `NotConfigured`; callers never observe a partially-missing registry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;

use super::adapter::{AuthStatus, BrokerAdapter};
use super::envelope::{CallEnvelope, CallFailure, FailureStatus};

/// Registry directory entry for one broker.
#[derive(Clone)]
struct BrokerDescriptor {
    adapter: Arc<dyn BrokerAdapter>,
    auth_attempts: Arc<AtomicU32>,
}

/// Status-report entry for one broker.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerStatusEntry {
    /// Current authentication status.
    pub status: AuthStatus,
    /// When the last authentication attempt started.
    pub last_auth_attempt: Option<DateTime<Utc>>,
    /// When authentication last succeeded.
    pub last_successful_auth: Option<DateTime<Utc>>,
    /// Failure detail from the last attempt, if any.
    pub error_message: Option<String>,
    /// Whether the broker can serve calls right now.
    pub is_available: bool,
    /// Whether credentials are configured.
    pub is_configured: bool,
    /// Whether out-of-band setup is required before authentication.
    pub requires_setup: bool,
    /// Remediation hint for unavailable brokers.
    pub setup_instructions: Option<String>,
    /// Authentication attempts driven through the registry.
    pub auth_attempts: u32,
}

/// Aggregated status snapshot across all registered brokers.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerStatusReport {
    /// Per-broker status entries, keyed by broker name.
    pub brokers: BTreeMap<String, BrokerStatusEntry>,
    /// Names of brokers currently available for calls.
    pub available: Vec<String>,
    /// Number of registered brokers.
    pub total_registered: usize,
    /// Number of brokers with credentials configured.
    pub total_configured: usize,
    /// Number of brokers currently authenticated.
    pub total_authenticated: usize,
}

/// Directory of broker adapters with authentication orchestration.
#[derive(Default)]
pub struct BrokerRegistry {
    brokers: std::sync::RwLock<BTreeMap<String, BrokerDescriptor>>,
    default_broker: std::sync::RwLock<Option<String>>,
}

impl BrokerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a broker adapter.
    ///
    /// Idempotent by name: re-registering a name keeps the existing
    /// adapter instance and its auth info. The first registered broker
    /// becomes the implicit default.
    pub fn register(&self, adapter: Arc<dyn BrokerAdapter>) {
        let name = adapter.name().to_string();

        {
            let mut brokers = write_lock(&self.brokers);
            if brokers.contains_key(&name) {
                tracing::debug!(broker = %name, "broker already registered, keeping existing instance");
                return;
            }
            tracing::info!(broker = %name, "registering broker");
            brokers.insert(
                name.clone(),
                BrokerDescriptor {
                    adapter,
                    auth_attempts: Arc::new(AtomicU32::new(0)),
                },
            );
        }

        let mut default_broker = write_lock(&self.default_broker);
        if default_broker.is_none() {
            tracing::info!(broker = %name, "set default broker");
            *default_broker = Some(name);
        }
    }

    /// Names of all registered brokers.
    #[must_use]
    pub fn broker_names(&self) -> Vec<String> {
        read_lock(&self.brokers).keys().cloned().collect()
    }

    /// Get a broker by name, or the default broker when `name` is `None`.
    #[must_use]
    pub fn get(&self, name: Option<&str>) -> Option<Arc<dyn BrokerAdapter>> {
        let resolved = match name {
            Some(name) => name.to_string(),
            None => read_lock(&self.default_broker).clone()?,
        };
        read_lock(&self.brokers)
            .get(&resolved)
            .map(|descriptor| descriptor.adapter.clone())
    }

    /// Get an available broker, or a structured unavailability envelope.
    ///
    /// The error envelope carries the broker name, its auth status, and a
    /// remediation hint; it is returned, never thrown.
    pub async fn get_or_unavailable(
        &self,
        name: Option<&str>,
        operation: &str,
    ) -> Result<Arc<dyn BrokerAdapter>, CallEnvelope> {
        let Some(adapter) = self.get(name) else {
            let requested = name.unwrap_or("default").to_string();
            return Err(CallEnvelope::Failure {
                error: CallFailure {
                    message: format!("Broker '{requested}' is not registered."),
                    status: FailureStatus::BrokerUnavailable,
                    broker: requested,
                    auth_status: AuthStatus::NotConfigured,
                    retryable: false,
                },
            });
        };

        if adapter.is_available().await {
            Ok(adapter)
        } else {
            Err(CallEnvelope::unavailable(&adapter.auth_info(), operation))
        }
    }

    /// Names of brokers that are authenticated and available.
    pub async fn available_brokers(&self) -> Vec<String> {
        let mut available = Vec::new();
        for (name, adapter) in self.adapters() {
            if adapter.is_available().await {
                available.push(name);
            }
        }
        available
    }

    /// Authenticate every registered broker.
    ///
    /// Configured brokers authenticate concurrently; one broker's failure
    /// never cancels or delays the others. Unconfigured brokers are
    /// skipped and reported `false`. With `fail_fast` the results of
    /// brokers after the first failure are discarded (startup always uses
    /// `false`). Never errors.
    pub async fn authenticate_all(&self, fail_fast: bool) -> BTreeMap<String, bool> {
        let descriptors: Vec<(String, BrokerDescriptor)> = read_lock(&self.brokers)
            .iter()
            .map(|(name, descriptor)| (name.clone(), descriptor.clone()))
            .collect();

        tracing::info!(
            brokers = descriptors.len(),
            "starting authentication for all registered brokers"
        );

        let attempts = descriptors
            .into_iter()
            .map(|(name, descriptor)| async move {
                if !descriptor.adapter.is_configured() {
                    tracing::warn!(broker = %name, "broker not configured, skipping authentication");
                    return (name, false);
                }

                descriptor.auth_attempts.fetch_add(1, Ordering::SeqCst);
                tracing::info!(broker = %name, "authenticating broker");
                let success = descriptor.adapter.authenticate().await;

                if success {
                    tracing::info!(broker = %name, "broker authenticated");
                } else {
                    let info = descriptor.adapter.auth_info();
                    tracing::warn!(
                        broker = %name,
                        status = %info.status,
                        error = info.error_message.as_deref().unwrap_or("unknown"),
                        "broker authentication failed"
                    );
                }
                (name, success)
            });

        let mut results: BTreeMap<String, bool> = join_all(attempts).await.into_iter().collect();

        if fail_fast {
            if let Some(first_failure) = results.iter().find(|(_, ok)| !**ok).map(|(n, _)| n.clone())
            {
                tracing::error!(broker = %first_failure, "fail-fast enabled, discarding later results");
                results.retain(|name, ok| *ok || name == &first_failure);
            }
        }

        let successful = results.values().filter(|ok| **ok).count();
        tracing::info!(
            successful,
            total = results.len(),
            "authentication complete"
        );

        results
    }

    /// Re-authenticate one broker if it is not currently available.
    ///
    /// Returns `true` when the broker ends up available. Unknown or
    /// unconfigured brokers return `false` without an attempt.
    pub async fn ensure_authenticated(&self, name: &str) -> bool {
        let Some(descriptor) = read_lock(&self.brokers).get(name).cloned() else {
            tracing::error!(broker = %name, "cannot authenticate unknown broker");
            return false;
        };

        if descriptor.adapter.is_available().await {
            return true;
        }
        if !descriptor.adapter.is_configured() {
            tracing::warn!(broker = %name, "cannot authenticate unconfigured broker");
            return false;
        }

        tracing::info!(broker = %name, "re-authenticating broker");
        descriptor.auth_attempts.fetch_add(1, Ordering::SeqCst);
        descriptor.adapter.authenticate().await
    }

    /// Aggregate status snapshot for the read-only query surface.
    ///
    /// Always succeeds and always reflects the current auth info of every
    /// registered broker.
    pub async fn status_report(&self) -> BrokerStatusReport {
        let descriptors: Vec<(String, BrokerDescriptor)> = read_lock(&self.brokers)
            .iter()
            .map(|(name, descriptor)| (name.clone(), descriptor.clone()))
            .collect();

        let mut brokers = BTreeMap::new();
        let mut available = Vec::new();
        let mut total_configured = 0;

        for (name, descriptor) in descriptors {
            let info = descriptor.adapter.auth_info();
            let is_available = descriptor.adapter.is_available().await;
            let is_configured = info.status != AuthStatus::NotConfigured;

            if is_configured {
                total_configured += 1;
            }
            if is_available {
                available.push(name.clone());
            }

            brokers.insert(
                name,
                BrokerStatusEntry {
                    status: info.status,
                    last_auth_attempt: info.last_auth_attempt,
                    last_successful_auth: info.last_successful_auth,
                    error_message: info.error_message,
                    is_available,
                    is_configured,
                    requires_setup: info.requires_setup,
                    setup_instructions: info.setup_instructions,
                    auth_attempts: descriptor.auth_attempts.load(Ordering::SeqCst),
                },
            );
        }

        BrokerStatusReport {
            total_registered: brokers.len(),
            total_configured,
            total_authenticated: available.len(),
            available,
            brokers,
        }
    }

    /// Log out every broker, best effort and concurrently.
    pub async fn logout_all(&self) {
        tracing::info!("logging out all brokers");
        let adapters = self.adapters();
        join_all(adapters.iter().map(|(name, adapter)| async move {
            adapter.logout().await;
            tracing::info!(broker = %name, "broker logged out");
        }))
        .await;
    }

    fn adapters(&self) -> Vec<(String, Arc<dyn BrokerAdapter>)> {
        read_lock(&self.brokers)
            .iter()
            .map(|(name, descriptor)| (name.clone(), descriptor.adapter.clone()))
            .collect()
    }
}

fn read_lock<T>(lock: &std::sync::RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &std::sync::RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
