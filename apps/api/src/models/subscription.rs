use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_SUSPENDED: &str = "suspended";
pub const STATUS_CANCELED: &str = "canceled";

pub const GATEWAY_INTERNAL: &str = "INTERNAL";
pub const GATEWAY_PAYPAL: &str = "PAYPAL";
pub const GATEWAY_REFERRAL: &str = "REFERRAL";

/// One subscription period. Rows are never deleted; the current
/// subscription is derived by the resolver.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Tier and cycle composite, e.g. `business_monthly` or `personal_referral_bonus`.
    pub plan: String,
    pub status: String,
    pub gateway: String,
    pub gateway_subscription_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub next_billing_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRow {
    pub fn is_paypal(&self) -> bool {
        self.gateway == GATEWAY_PAYPAL
    }
}
