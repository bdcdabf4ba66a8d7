use anyhow::{Context, Result};

use crate::billing::plans::{BillingCycle, Tier};
use crate::users::normalize_email;

const DEFAULT_APP_URL: &str = "http://localhost:3000";
const DEFAULT_MAIL_API_URL: &str = "https://api.resend.com/emails";
pub const DEFAULT_MAGIC_LINK_TTL_MINUTES: i64 = 10;
const MIN_MAGIC_LINK_TTL_MINUTES: i64 = 5;
const MAX_MAGIC_LINK_TTL_MINUTES: i64 = 60;

/// Application configuration loaded from environment variables.
/// Only `DATABASE_URL` is required; every integration is optional and the
/// handlers that need a missing one answer 500.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub rust_log: String,
    pub app_env: String,
    pub app_url: String,
    pub auth: AuthConfig,
    pub paypal: Option<PayPalConfig>,
    pub dropbox: DropboxConfig,
    pub google_drive_api_key: Option<String>,
    pub mail: Option<MailConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Signing secret for magic links, sign-in codes and sessions.
    pub secret: Option<String>,
    /// Normalized emails; empty means everyone may sign in.
    pub allowed_emails: Vec<String>,
    pub auto_signup: bool,
    pub magic_link_ttl_minutes: i64,
}

impl AuthConfig {
    pub fn is_allowed(&self, normalized_email: &str) -> bool {
        self.allowed_emails.is_empty()
            || self.allowed_emails.iter().any(|e| e == normalized_email)
    }
}

#[derive(Debug, Clone)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub base_url: String,
    pub plan_ids: PayPalPlanIds,
}

#[derive(Debug, Clone, Default)]
pub struct PayPalPlanIds {
    pub personal_monthly: Option<String>,
    pub personal_annual: Option<String>,
    pub business_monthly: Option<String>,
    pub business_annual: Option<String>,
}

impl PayPalPlanIds {
    /// PayPal plan id configured for a paid tier and cycle.
    pub fn lookup(&self, tier: Tier, cycle: BillingCycle) -> Option<&str> {
        let id = match (tier, cycle) {
            (Tier::Personal, BillingCycle::Monthly) => &self.personal_monthly,
            (Tier::Personal, BillingCycle::Annual) => &self.personal_annual,
            (Tier::Business, BillingCycle::Monthly) => &self.business_monthly,
            (Tier::Business, BillingCycle::Annual) => &self.business_annual,
            (Tier::Free, _) => return None,
        };
        id.as_deref()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DropboxConfig {
    pub app_key: Option<String>,
    pub app_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
}

impl DropboxConfig {
    pub fn has_credentials(&self) -> bool {
        self.access_token.is_some()
            || (self.app_key.is_some() && self.app_secret.is_some() && self.refresh_token.is_some())
    }
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let paypal = match (optional_env("PAYPAL_CLIENT_ID"), optional_env("PAYPAL_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(PayPalConfig {
                client_id,
                client_secret,
                base_url: paypal_base_url(optional_env("PAYPAL_ENV").as_deref()).to_string(),
                plan_ids: PayPalPlanIds {
                    personal_monthly: optional_env("PAYPAL_PLAN_PERSONAL_MONTHLY"),
                    personal_annual: optional_env("PAYPAL_PLAN_PERSONAL_ANNUAL"),
                    business_monthly: optional_env("PAYPAL_PLAN_BUSINESS_MONTHLY"),
                    business_annual: optional_env("PAYPAL_PLAN_BUSINESS_ANNUAL"),
                },
            }),
            _ => None,
        };

        let mail = match (optional_env("MAIL_API_KEY"), optional_env("MAIL_FROM")) {
            (Some(api_key), Some(from)) => Some(MailConfig {
                api_url: optional_env("MAIL_API_URL")
                    .unwrap_or_else(|| DEFAULT_MAIL_API_URL.to_string()),
                api_key,
                from,
            }),
            _ => None,
        };

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            app_env: optional_env("APP_ENV").unwrap_or_else(|| "development".to_string()),
            app_url: optional_env("APP_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_APP_URL.to_string()),
            auth: AuthConfig {
                secret: first_non_empty(&[
                    optional_env("AUTH_SECRET"),
                    optional_env("MAGIC_LINK_SECRET"),
                ]),
                allowed_emails: parse_allow_list(
                    &std::env::var("ALLOWED_EMAILS").unwrap_or_default(),
                ),
                auto_signup: optional_env("AUTO_SIGNUP").is_some_and(|v| parse_flag(&v)),
                magic_link_ttl_minutes: clamp_ttl_minutes(
                    optional_env("MAGIC_LINK_TTL_MINUTES").and_then(|v| v.parse().ok()),
                ),
            },
            paypal,
            dropbox: DropboxConfig {
                app_key: optional_env("DROPBOX_APP_KEY"),
                app_secret: optional_env("DROPBOX_APP_SECRET"),
                refresh_token: optional_env("DROPBOX_REFRESH_TOKEN"),
                access_token: optional_env("DROPBOX_ACCESS_TOKEN"),
            },
            google_drive_api_key: optional_env("GOOGLE_DRIVE_API_KEY"),
            mail,
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Reads an env var, treating blank values as unset.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn first_non_empty(candidates: &[Option<String>]) -> Option<String> {
    candidates.iter().flatten().find(|v| !v.is_empty()).cloned()
}

pub fn parse_allow_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .map(normalize_email)
        .filter(|e| !e.is_empty())
        .collect()
}

pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn clamp_ttl_minutes(raw: Option<i64>) -> i64 {
    raw.unwrap_or(DEFAULT_MAGIC_LINK_TTL_MINUTES)
        .clamp(MIN_MAGIC_LINK_TTL_MINUTES, MAX_MAGIC_LINK_TTL_MINUTES)
}

fn paypal_base_url(env: Option<&str>) -> &'static str {
    match env.map(str::to_ascii_lowercase).as_deref() {
        Some("live") | Some("production") => "https://api-m.paypal.com",
        _ => "https://api-m.sandbox.paypal.com",
    }
}
