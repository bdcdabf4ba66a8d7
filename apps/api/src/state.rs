use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client as HttpClient;
use sqlx::PgPool;

use crate::auth::token::TokenCodec;
use crate::billing::paypal::PayPalClient;
use crate::config::Config;
use crate::errors::AppError;
use crate::mailer::{HttpMailer, Mailer};
use crate::media::drive::DriveClient;
use crate::media::dropbox::DropboxClient;

/// Shared application state injected into all route handlers via Axum extractors.
/// Built once at startup; the pool and HTTP client are reused by every request.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    /// `None` when neither AUTH_SECRET nor MAGIC_LINK_SECRET is set.
    pub tokens: Option<TokenCodec>,
    pub paypal: Option<PayPalClient>,
    pub mailer: Option<Arc<dyn Mailer>>,
    pub dropbox: DropboxClient,
    pub drive: DriveClient,
}

impl AppState {
    pub fn new(db: PgPool, config: Config) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;

        let tokens = config.auth.secret.as_deref().map(TokenCodec::new);
        let paypal = config
            .paypal
            .clone()
            .map(|c| PayPalClient::new(http.clone(), c));
        let mailer = config
            .mail
            .clone()
            .map(|c| Arc::new(HttpMailer::new(http.clone(), c)) as Arc<dyn Mailer>);
        let dropbox = DropboxClient::new(http.clone(), config.dropbox.clone());
        let drive = DriveClient::new(http, config.google_drive_api_key.clone());

        Ok(AppState {
            db,
            config,
            tokens,
            paypal,
            mailer,
            dropbox,
            drive,
        })
    }

    pub fn tokens(&self) -> Result<&TokenCodec, AppError> {
        self.tokens
            .as_ref()
            .ok_or(AppError::NotConfigured("AUTH_SECRET"))
    }

    pub fn paypal(&self) -> Result<&PayPalClient, AppError> {
        self.paypal.as_ref().ok_or(AppError::NotConfigured("PayPal"))
    }

    pub fn mailer(&self) -> Option<&dyn Mailer> {
        self.mailer.as_deref()
    }
}
