//! PayPal client, the only module that talks to the PayPal REST API.
//!
//! Uses OAuth2 client credentials; the access token is cached until shortly
//! before PayPal says it expires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::config::PayPalConfig;
use crate::errors::AppError;
use crate::models::subscription::{
    STATUS_ACTIVE, STATUS_CANCELED, STATUS_PENDING, STATUS_SUSPENDED,
};

const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum PayPalError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid subscription id: {0:?}")]
    InvalidSubscriptionId(String),

    #[error("invalid PayPal base URL: {0}")]
    BaseUrl(String),
}

/// PayPal subscription ids look like `I-BW452GLLEP1G`.
pub fn is_valid_subscription_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

impl From<PayPalError> for AppError {
    fn from(err: PayPalError) -> Self {
        match err {
            PayPalError::InvalidSubscriptionId(_) => AppError::bad_request(
                "INVALID_SUBSCRIPTION_ID",
                "paypalSubscriptionId may only contain letters, digits and dashes",
            ),
            PayPalError::Api { status: 404, .. } => AppError::bad_request(
                "PAYPAL_SUBSCRIPTION_NOT_FOUND",
                "PayPal does not know this subscription id",
            ),
            PayPalError::Api { status, message } if (400..500).contains(&status) => {
                AppError::Upstream {
                    service: "PayPal",
                    status: StatusCode::BAD_REQUEST,
                    message,
                }
            }
            other => AppError::Upstream {
                service: "PayPal",
                status: StatusCode::BAD_GATEWAY,
                message: other.to_string(),
            },
        }
    }
}

/// Live subscription state as reported by PayPal.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySubscription {
    pub id: String,
    pub plan_id: String,
    pub status: String,
    pub start_time: Option<DateTime<Utc>>,
    pub billing_info: Option<BillingInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingInfo {
    pub next_billing_time: Option<DateTime<Utc>>,
}

impl GatewaySubscription {
    pub fn next_billing_time(&self) -> Option<DateTime<Utc>> {
        self.billing_info.as_ref().and_then(|b| b.next_billing_time)
    }

    /// Local status for the gateway status.
    pub fn local_status(&self) -> String {
        map_gateway_status(&self.status)
    }

    /// Gateway states that can never back a new activation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.to_ascii_uppercase().as_str(),
            "CANCELLED" | "SUSPENDED" | "EXPIRED"
        )
    }
}

/// Maps a PayPal subscription status to the local status vocabulary.
/// Unknown values pass through lowercased.
pub fn map_gateway_status(status: &str) -> String {
    match status.to_ascii_uppercase().as_str() {
        "ACTIVE" => STATUS_ACTIVE.to_string(),
        "APPROVAL_PENDING" => STATUS_PENDING.to_string(),
        "SUSPENDED" => STATUS_SUSPENDED.to_string(),
        "CANCELLED" | "EXPIRED" => STATUS_CANCELED.to_string(),
        _ => status.to_lowercase(),
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct PayPalErrorBody {
    message: Option<String>,
    error_description: Option<String>,
}

#[derive(Clone)]
pub struct PayPalClient {
    client: Client,
    config: PayPalConfig,
    token: Arc<Mutex<Option<(String, Instant)>>>,
}

impl PayPalClient {
    pub fn new(client: Client, config: PayPalConfig) -> Self {
        Self {
            client,
            config,
            token: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &PayPalConfig {
        &self.config
    }

    async fn access_token(&self) -> Result<String, PayPalError> {
        let mut cached = self.token.lock().await;
        if let Some((token, expires)) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < *expires {
                return Ok(token.clone());
            }
        }

        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.config.base_url))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let response = check_status(response).await?;
        let token: TokenResponse = response.json().await?;

        debug!("Fetched PayPal access token (expires in {}s)", token.expires_in);
        let expires = Instant::now() + Duration::from_secs(token.expires_in);
        *cached = Some((token.access_token.clone(), expires));
        Ok(token.access_token)
    }

    /// `{base_url}/v1/billing/subscriptions/{id}[/{action}]` with the id as one
    /// encoded path segment.
    fn subscription_url(&self, id: &str, action: Option<&str>) -> Result<Url, PayPalError> {
        if !is_valid_subscription_id(id) {
            return Err(PayPalError::InvalidSubscriptionId(id.to_string()));
        }
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| PayPalError::BaseUrl(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| PayPalError::BaseUrl(self.config.base_url.clone()))?;
            segments
                .pop_if_empty()
                .extend(["v1", "billing", "subscriptions", id]);
            if let Some(action) = action {
                segments.push(action);
            }
        }
        Ok(url)
    }

    pub async fn get_subscription(&self, id: &str) -> Result<GatewaySubscription, PayPalError> {
        let url = self.subscription_url(id, None)?;
        let token = self.access_token().await?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    pub async fn cancel_subscription(&self, id: &str, reason: &str) -> Result<(), PayPalError> {
        let url = self.subscription_url(id, Some("cancel"))?;
        let token = self.access_token().await?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "reason": reason }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PayPalError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<PayPalErrorBody>(&body)
        .ok()
        .and_then(|e| e.message.or(e.error_description))
        .unwrap_or(body);
    Err(PayPalError::Api {
        status: status.as_u16(),
        message,
    })
}
