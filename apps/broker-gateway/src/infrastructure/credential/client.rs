//! HTTP client for the credential-session backend.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::broker::adapter::BrokerRequest;
use crate::broker::error::CallError;

use super::api_types::{
    ApiErrorResponse, ChallengeState, ChallengeStatusResponse, LoginRequest, LoginResponse,
};

/// HTTP client for one credential-session backend.
#[derive(Debug, Clone)]
pub struct CredentialHttpClient {
    http: reqwest::Client,
    base_url: String,
}

impl CredentialHttpClient {
    /// Build a client against `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CallError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CallError::Network(err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Attempt a login; may return a device-verification challenge.
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, CallError> {
        let url = format!("{}/api/v1/session", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|err| CallError::from_transport(&err))?;
        read_json(response).await
    }

    /// Poll a device-verification challenge.
    pub async fn challenge_status(&self, challenge_id: &str) -> Result<ChallengeState, CallError> {
        let url = format!("{}/api/v1/session/challenge/{challenge_id}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| CallError::from_transport(&err))?;
        let status: ChallengeStatusResponse = read_json(response).await?;
        Ok(status.status)
    }

    /// Cheap authenticated call used to validate a restored session.
    pub async fn verify_session(&self, access_token: &str) -> Result<(), CallError> {
        let url = format!("{}/api/v1/account", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| CallError::from_transport(&err))?;
        let _: Value = read_json(response).await?;
        Ok(())
    }

    /// Revoke the session on the backend (logout).
    pub async fn revoke(&self, access_token: &str) -> Result<(), CallError> {
        let url = format!("{}/api/v1/session", self.base_url);
        let response = self
            .http
            .delete(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| CallError::from_transport(&err))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Execute one gateway operation against the backend.
    pub async fn call(
        &self,
        access_token: &str,
        request: &BrokerRequest,
    ) -> Result<Value, CallError> {
        let response = match request {
            BrokerRequest::AccountInfo => self.get("/api/v1/account", access_token).await?,
            BrokerRequest::Portfolio => self.get("/api/v1/portfolio", access_token).await?,
            BrokerRequest::Positions => self.get("/api/v1/positions", access_token).await?,
            BrokerRequest::Quote { symbol } => {
                self.get(&format!("/api/v1/quotes/{symbol}"), access_token)
                    .await?
            }
            BrokerRequest::Price { symbol } => {
                self.get(&format!("/api/v1/prices/{symbol}"), access_token)
                    .await?
            }
            BrokerRequest::BuyMarket { symbol, quantity } => {
                self.post_order(access_token, symbol, "buy", *quantity).await?
            }
            BrokerRequest::SellMarket { symbol, quantity } => {
                self.post_order(access_token, symbol, "sell", *quantity)
                    .await?
            }
        };
        read_json(response).await
    }

    async fn get(&self, path: &str, access_token: &str) -> Result<reqwest::Response, CallError> {
        self.http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| CallError::from_transport(&err))
    }

    async fn post_order(
        &self,
        access_token: &str,
        symbol: &str,
        side: &str,
        quantity: f64,
    ) -> Result<reqwest::Response, CallError> {
        self.http
            .post(format!("{}/api/v1/orders", self.base_url))
            .bearer_auth(access_token)
            .json(&serde_json::json!({
                "symbol": symbol,
                "side": side,
                "order_type": "market",
                "quantity": quantity,
            }))
            .send()
            .await
            .map_err(|err| CallError::from_transport(&err))
    }
}

/// Parse a JSON body, mapping non-success statuses into `CallError`.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, CallError> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|err| CallError::from_transport(&err))?;
    serde_json::from_slice(&bytes).map_err(|err| CallError::MalformedResponse(err.to_string()))
}

/// Map an error response into the call-error taxonomy, honoring
/// Retry-After on 429s and surfacing the backend's detail message.
async fn error_from_response(response: reqwest::Response) -> CallError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ApiErrorResponse>(&body)
        .ok()
        .and_then(|err| err.detail)
        .unwrap_or(body);

    if status == 429 {
        return CallError::RateLimited {
            retry_after_secs: retry_after,
        };
    }
    CallError::from_status(status, detail)
}
