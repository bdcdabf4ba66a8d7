use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invite lifecycle; transitions only move forward.
pub const INVITE_PENDING: &str = "pending";
pub const INVITE_REGISTERED: &str = "registered";
pub const INVITE_REWARDED: &str = "rewarded";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReferralInviteRow {
    pub id: Uuid,
    pub referrer_id: Uuid,
    pub invitee_email: String,
    pub code: String,
    pub status: String,
    pub invitee_user_id: Option<Uuid>,
    pub rewarded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
