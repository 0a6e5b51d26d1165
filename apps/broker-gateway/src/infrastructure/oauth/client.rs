//! HTTP client for the OAuth backend.

use std::time::Duration;

use serde_json::Value;

use crate::broker::adapter::BrokerRequest;
use crate::broker::error::CallError;

use super::api_types::{OAuthErrorResponse, TokenResponse};

/// HTTP client for one OAuth backend.
#[derive(Debug, Clone)]
pub struct OAuthHttpClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    app_secret: String,
}

impl OAuthHttpClient {
    /// Build a client against `base_url` with application credentials.
    pub fn new(
        base_url: &str,
        api_key: String,
        app_secret: String,
        timeout: Duration,
    ) -> Result<Self, CallError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CallError::Network(err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            app_secret,
        })
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, CallError> {
        let url = format!("{}/v1/oauth/token", self.base_url);
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.api_key, Some(&self.app_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|err| CallError::from_transport(&err))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| CallError::from_transport(&err))?;
        serde_json::from_slice(&bytes).map_err(|err| CallError::MalformedResponse(err.to_string()))
    }

    /// Execute one gateway operation against the backend.
    pub async fn call(
        &self,
        access_token: &str,
        request: &BrokerRequest,
    ) -> Result<Value, CallError> {
        let response = match request {
            BrokerRequest::AccountInfo => self.get("/v1/accounts/me", access_token).await?,
            BrokerRequest::Portfolio => self.get("/v1/portfolio", access_token).await?,
            BrokerRequest::Positions => self.get("/v1/positions", access_token).await?,
            BrokerRequest::Quote { symbol } => {
                self.get(&format!("/v1/marketdata/{symbol}/quotes"), access_token)
                    .await?
            }
            BrokerRequest::Price { symbol } => {
                self.get(&format!("/v1/marketdata/{symbol}/price"), access_token)
                    .await?
            }
            BrokerRequest::BuyMarket { symbol, quantity } => {
                self.post_order(access_token, symbol, "BUY", *quantity).await?
            }
            BrokerRequest::SellMarket { symbol, quantity } => {
                self.post_order(access_token, symbol, "SELL", *quantity)
                    .await?
            }
        };

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| CallError::from_transport(&err))?;
        serde_json::from_slice(&bytes).map_err(|err| CallError::MalformedResponse(err.to_string()))
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
            .post(format!("{}/v1/orders", self.base_url))
            .bearer_auth(access_token)
            .json(&serde_json::json!({
                "symbol": symbol,
                "instruction": side,
                "order_type": "MARKET",
                "quantity": quantity,
            }))
            .send()
            .await
            .map_err(|err| CallError::from_transport(&err))
    }
}

/// Map an error response into the call-error taxonomy.
async fn error_from_response(response: reqwest::Response) -> CallError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<OAuthErrorResponse>(&body)
        .ok()
        .and_then(|err| err.message())
        .unwrap_or(body);

    if status == 429 {
        return CallError::RateLimited {
            retry_after_secs: retry_after,
        };
    }
    CallError::from_status(status, detail)
}
