//! Referral ledger: invite bookkeeping and bonus grants.
//!
//! Invites only move forward: pending → registered → rewarded. A reward is
//! granted inside the caller's transaction so it rolls back with the
//! activation that triggered it.

use chrono::{DateTime, Months, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgExecutor};
use tracing::info;
use uuid::Uuid;

use crate::billing::resolver::{load_active, pick_winner};
use crate::models::referral::{
    ReferralInviteRow, INVITE_PENDING, INVITE_REGISTERED, INVITE_REWARDED,
};
use crate::models::subscription::{SubscriptionRow, GATEWAY_REFERRAL, STATUS_ACTIVE};
use crate::models::user::User;

pub const REFERRAL_BONUS_PLAN: &str = "personal_referral_bonus";
const BONUS_MONTHS: u32 = 1;
const CODE_LEN: usize = 12;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardOutcome {
    pub invite_id: Uuid,
    pub referrer_id: Uuid,
    pub invitee_id: Uuid,
    pub referrer_bonus: SubscriptionRow,
    pub invitee_bonus: SubscriptionRow,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReferralStats {
    pub total: usize,
    pub pending: usize,
    pub registered: usize,
    pub rewarded: usize,
}

pub fn stats_for(invites: &[ReferralInviteRow]) -> ReferralStats {
    invites.iter().fold(
        ReferralStats {
            total: invites.len(),
            ..Default::default()
        },
        |mut stats, invite| {
            match invite.status.as_str() {
                INVITE_PENDING => stats.pending += 1,
                INVITE_REGISTERED => stats.registered += 1,
                INVITE_REWARDED => stats.rewarded += 1,
                _ => {}
            }
            stats
        },
    )
}

/// Bonus period for one recipient: starts at the later of `now` and the
/// recipient's current expiry, so it extends access instead of overlapping it.
pub fn bonus_window(
    now: DateTime<Utc>,
    current_expiry: Option<DateTime<Utc>>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = current_expiry.filter(|e| *e > now).unwrap_or(now);
    let end = start
        .checked_add_months(Months::new(BONUS_MONTHS))
        .unwrap_or(start);
    (start, end)
}

pub fn new_referral_code() -> String {
    Uuid::new_v4().simple().to_string()[..CODE_LEN].to_uppercase()
}

/// Oldest invite for `email` that has not paid out yet.
pub async fn find_rewardable_invite<'e>(
    db: impl PgExecutor<'e>,
    email: &str,
) -> Result<Option<ReferralInviteRow>, sqlx::Error> {
    sqlx::query_as::<_, ReferralInviteRow>(
        r#"
        SELECT * FROM referral_invites
        WHERE invitee_email = $1 AND status IN ($2, $3)
        ORDER BY created_at ASC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(email)
    .bind(INVITE_PENDING)
    .bind(INVITE_REGISTERED)
    .fetch_optional(db)
    .await
}

async fn grant_bonus(
    conn: &mut PgConnection,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<SubscriptionRow, sqlx::Error> {
    let active = load_active(&mut *conn, user_id, now).await?;
    let current_expiry = pick_winner(&active).and_then(|s| s.expires_at);
    let (start, end) = bonus_window(now, current_expiry);

    sqlx::query_as::<_, SubscriptionRow>(
        r#"
        INSERT INTO subscriptions (user_id, plan, status, gateway, started_at, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(REFERRAL_BONUS_PLAN)
    .bind(STATUS_ACTIVE)
    .bind(GATEWAY_REFERRAL)
    .bind(start)
    .bind(end)
    .fetch_one(&mut *conn)
    .await
}

/// Grants the referrer and the invitee one bonus month each and marks the
/// invite rewarded. No-op when the invitee has no outstanding invite.
pub async fn apply_referral_reward(
    conn: &mut PgConnection,
    invitee: &User,
    now: DateTime<Utc>,
) -> Result<Option<RewardOutcome>, sqlx::Error> {
    let Some(invite) = find_rewardable_invite(&mut *conn, &invitee.email).await? else {
        return Ok(None);
    };

    // Each recipient's start date is computed from their own current expiry.
    let referrer_bonus = grant_bonus(conn, invite.referrer_id, now).await?;
    let invitee_bonus = grant_bonus(conn, invitee.id, now).await?;

    sqlx::query(
        r#"
        UPDATE referral_invites
        SET status = $2, invitee_user_id = $3, rewarded_at = $4, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(invite.id)
    .bind(INVITE_REWARDED)
    .bind(invitee.id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    info!(
        "Referral invite {} rewarded: referrer {} and invitee {}",
        invite.id, invite.referrer_id, invitee.id
    );

    Ok(Some(RewardOutcome {
        invite_id: invite.id,
        referrer_id: invite.referrer_id,
        invitee_id: invitee.id,
        referrer_bonus,
        invitee_bonus,
    }))
}

pub async fn was_invited<'e>(db: impl PgExecutor<'e>, email: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM referral_invites WHERE invitee_email = $1)",
    )
    .bind(email)
    .fetch_one(db)
    .await
}

/// Moves pending invites for a newly signed-up email to `registered`.
pub async fn mark_registered<'e>(
    db: impl PgExecutor<'e>,
    email: &str,
    user_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE referral_invites
        SET status = $3, invitee_user_id = $2, updated_at = now()
        WHERE invitee_email = $1 AND status = $4
        "#,
    )
    .bind(email)
    .bind(user_id)
    .bind(INVITE_REGISTERED)
    .bind(INVITE_PENDING)
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

/// Creates the invite, or returns the existing one for this (referrer, email) pair unchanged.
pub async fn upsert_invite<'e>(
    db: impl PgExecutor<'e>,
    referrer_id: Uuid,
    invitee_email: &str,
) -> Result<ReferralInviteRow, sqlx::Error> {
    sqlx::query_as::<_, ReferralInviteRow>(
        r#"
        INSERT INTO referral_invites (referrer_id, invitee_email, code, status)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (referrer_id, invitee_email) DO UPDATE SET updated_at = now()
        RETURNING *
        "#,
    )
    .bind(referrer_id)
    .bind(invitee_email)
    .bind(new_referral_code())
    .bind(INVITE_PENDING)
    .fetch_one(db)
    .await
}

pub async fn list_invites<'e>(
    db: impl PgExecutor<'e>,
    referrer_id: Uuid,
) -> Result<Vec<ReferralInviteRow>, sqlx::Error> {
    sqlx::query_as::<_, ReferralInviteRow>(
        "SELECT * FROM referral_invites WHERE referrer_id = $1 ORDER BY created_at DESC",
    )
    .bind(referrer_id)
    .fetch_all(db)
    .await
}
