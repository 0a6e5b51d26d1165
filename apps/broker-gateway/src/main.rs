//! Broker Gateway Binary
//!
//! Starts the multi-broker gateway: registers the configured backends,
//! attempts authentication for all of them (failures never abort
//! startup), keeps sessions alive, and logs out cleanly on shutdown.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin broker-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Gateway
//! - `GATEWAY_STATE_DIR`: session-artifact directory (default: .broker-gateway)
//! - `GATEWAY_KEEPALIVE_SECS`: session keep-alive interval (default: 300)
//! - `GATEWAY_CREDENTIAL_BROKER`: credential backend name (default: credential)
//! - `GATEWAY_OAUTH_BROKER`: OAuth backend name (default: oauth)
//! - `RUST_LOG`: log level (default: info)
//!
//! ## Per backend (prefix = uppercased backend name)
//! - `{NAME}_USERNAME`, `{NAME}_PASSWORD`, `{NAME}_BASE_URL`: credential backend
//! - `{NAME}_API_KEY`, `{NAME}_APP_SECRET`, `{NAME}_BASE_URL`: OAuth backend
//!
//! A backend with an incomplete credential set starts as `not_configured`
//! and the gateway runs without it.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use broker_gateway::broker::{BrokerRegistry, RateLimiter, attempt_broker_logins, run_session_keepalive};
use broker_gateway::config::GatewayConfig;
use broker_gateway::infrastructure::credential::CredentialSessionBroker;
use broker_gateway::infrastructure::oauth::OAuthBroker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env().context("failed to load gateway configuration")?;
    tracing::info!(
        state_dir = %config.state_dir.display(),
        credential_broker = %config.credential.name,
        oauth_broker = %config.oauth.name,
        "starting broker gateway"
    );

    let limiter = Arc::new(RateLimiter::default());
    let registry = Arc::new(BrokerRegistry::new());

    let credential = CredentialSessionBroker::new(config.credential.clone(), limiter.clone())
        .context("failed to construct credential broker")?;
    registry.register(Arc::new(credential));

    let oauth = OAuthBroker::new(config.oauth.clone(), limiter.clone())
        .context("failed to construct OAuth broker")?;
    registry.register(Arc::new(oauth));

    // Startup authentication: failures degrade, they never abort.
    let summary = attempt_broker_logins(&registry).await;
    tracing::info!(
        successful = summary.successful,
        total = summary.total,
        "gateway ready"
    );

    let report = registry.status_report().await;
    match serde_json::to_string(&report) {
        Ok(json) => tracing::debug!(status = %json, "initial broker status"),
        Err(err) => tracing::warn!(error = %err, "failed to encode broker status"),
    }

    let shutdown = CancellationToken::new();
    let keepalive = tokio::spawn(run_session_keepalive(
        registry.clone(),
        config.keepalive_interval,
        shutdown.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    shutdown.cancel();
    if let Err(err) = keepalive.await {
        tracing::warn!(error = %err, "keep-alive task ended abnormally");
    }

    registry.logout_all().await;
    tracing::info!("broker gateway stopped");
    Ok(())
}
