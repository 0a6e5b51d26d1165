//! Startup authentication orchestration.
//!
//! Drives registry-wide authentication once at startup, logs a summary,
//! and, critically, never aborts the process: zero authenticated
//! brokers leaves the gateway running in limited mode. Also hosts the
//! session keep-alive task that re-authenticates brokers whose sessions
//! lapse while the process is running.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::adapter::{AuthStatus, BrokerAdapter};
use super::registry::BrokerRegistry;

/// Outcome of a registry-wide authentication pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSummary {
    /// Brokers that authenticated.
    pub successful: usize,
    /// Brokers attempted (configured or not).
    pub total: usize,
    /// Names of brokers that did not authenticate.
    pub failed: Vec<String>,
}

impl AuthSummary {
    /// Whether every attempted broker authenticated.
    #[must_use]
    pub fn all_authenticated(&self) -> bool {
        self.successful == self.total && self.total > 0
    }
}

/// Attempt to authenticate all registered brokers.
///
/// Non-blocking for the process: the gateway starts regardless of the
/// results. Each broker's outcome is logged individually, then an
/// aggregate line summarizes the pass.
pub async fn attempt_broker_logins(registry: &BrokerRegistry) -> AuthSummary {
    tracing::info!("starting multi-broker authentication");

    let names = registry.broker_names();
    if names.is_empty() {
        tracing::warn!("no brokers registered, gateway running without broker access");
        return AuthSummary {
            successful: 0,
            total: 0,
            failed: Vec::new(),
        };
    }
    tracing::info!(brokers = %names.join(", "), "registered brokers");

    let started = tokio::time::Instant::now();
    let results = registry.authenticate_all(false).await;
    let elapsed = started.elapsed();

    let successful = results.values().filter(|ok| **ok).count();
    let total = results.len();
    let failed: Vec<String> = results
        .iter()
        .filter(|(_, ok)| !**ok)
        .map(|(name, _)| name.clone())
        .collect();

    for (name, success) in &results {
        if *success {
            tracing::info!(broker = %name, "authenticated");
            continue;
        }
        let Some(adapter) = registry.get(Some(name.as_str())) else {
            continue;
        };
        let info = adapter.auth_info();
        match info.status {
            AuthStatus::NotConfigured => {
                tracing::info!(broker = %name, "not configured, skipped");
            }
            AuthStatus::MfaRequired => {
                tracing::warn!(broker = %name, "waiting on device/MFA approval");
            }
            _ => {
                tracing::error!(
                    broker = %name,
                    status = %info.status,
                    error = info.error_message.as_deref().unwrap_or("unknown error"),
                    "authentication failed"
                );
            }
        }
    }

    if successful == total && total > 0 {
        tracing::info!(
            total,
            elapsed_ms = elapsed.as_millis() as u64,
            "all brokers authenticated"
        );
    } else if successful > 0 {
        tracing::warn!(
            successful,
            total,
            unavailable = %failed.join(", "),
            elapsed_ms = elapsed.as_millis() as u64,
            "partial authentication, gateway running with reduced coverage"
        );
    } else {
        tracing::warn!(
            total,
            elapsed_ms = elapsed.as_millis() as u64,
            "no brokers authenticated, gateway running in limited mode"
        );
    }

    AuthSummary {
        successful,
        total,
        failed,
    }
}

/// Periodically re-authenticate configured brokers whose sessions lapsed.
///
/// Runs until `shutdown` is cancelled. Brokers that were never configured
/// or that require out-of-band setup are left alone; everything else that
/// reports unavailable gets one serialized re-auth attempt per tick.
pub async fn run_session_keepalive(
    registry: Arc<BrokerRegistry>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        "session keep-alive started"
    );

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::info!("session keep-alive stopping");
                return;
            }
            () = tokio::time::sleep(interval) => {}
        }

        for name in registry.broker_names() {
            let Some(adapter) = registry.get(Some(name.as_str())) else {
                continue;
            };
            if !adapter.is_configured() || adapter.is_available().await {
                continue;
            }

            let info = adapter.auth_info();
            if info.requires_setup || info.status == AuthStatus::MfaRequired {
                // Out-of-band action pending; a background retry cannot help.
                continue;
            }

            tracing::info!(broker = %name, status = %info.status, "keep-alive re-authentication");
            if !registry.ensure_authenticated(&name).await {
                tracing::warn!(broker = %name, "keep-alive re-authentication failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::broker::mock::MockBroker;

    #[tokio::test]
    async fn empty_registry_yields_empty_summary() {
        let registry = BrokerRegistry::new();
        let summary = attempt_broker_logins(&registry).await;
        assert_eq!(summary.successful, 0);
        assert_eq!(summary.total, 0);
        assert!(summary.failed.is_empty());
        assert!(!summary.all_authenticated());
    }

    #[tokio::test]
    async fn summary_counts_mixed_outcomes() {
        let registry = BrokerRegistry::new();
        registry.register(Arc::new(MockBroker::new("good")));
        registry.register(Arc::new(MockBroker::unconfigured("unset")));
        registry
            .register(Arc::new(MockBroker::new("bad").failing(
                AuthStatus::AuthFailed,
                "login rejected",
            )));

        let summary = attempt_broker_logins(&registry).await;
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.failed.len(), 2);
        assert!(summary.failed.contains(&"bad".to_string()));
        assert!(summary.failed.contains(&"unset".to_string()));
    }

    #[tokio::test]
    async fn all_authenticated_summary() {
        let registry = BrokerRegistry::new();
        registry.register(Arc::new(MockBroker::new("alpha")));
        registry.register(Arc::new(MockBroker::new("beta")));

        let summary = attempt_broker_logins(&registry).await;
        assert!(summary.all_authenticated());
        assert!(summary.failed.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_reauthenticates_lapsed_broker() {
        let registry = Arc::new(BrokerRegistry::new());
        let broker = Arc::new(MockBroker::new("alpha"));
        registry.register(broker.clone());
        attempt_broker_logins(&registry).await;
        assert_eq!(broker.login_attempts(), 1);

        // Simulate a lapsed session.
        broker.logout().await;

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_session_keepalive(
            registry.clone(),
            Duration::from_secs(60),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(registry.get(Some("alpha")).unwrap().is_available().await);
        assert_eq!(broker.login_attempts(), 2);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_leaves_unconfigured_brokers_alone() {
        let registry = Arc::new(BrokerRegistry::new());
        let broker = Arc::new(MockBroker::unconfigured("alpha"));
        registry.register(broker.clone());

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_session_keepalive(
            registry.clone(),
            Duration::from_secs(60),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(broker.login_attempts(), 0);

        shutdown.cancel();
        task.await.unwrap();
    }
}
