//! Subscription resolver: turns a user's subscription rows into one effective
//! tier, feature set and "winning" subscription.
//!
//! PayPal rows are refreshed from the gateway before resolution. Gateway
//! failures are logged and swallowed so a PayPal outage never blocks sign-in.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::Serialize;
use sqlx::{PgExecutor, PgPool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::billing::paypal::{GatewaySubscription, PayPalClient};
use crate::billing::plans::{features_for, PlanFeatures, Tier};
use crate::db::is_schema_error;
use crate::models::subscription::{SubscriptionRow, GATEWAY_PAYPAL, STATUS_ACTIVE};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub orders_today: i64,
    pub orders_this_week: i64,
    pub day_started_at: DateTime<Utc>,
    pub week_started_at: DateTime<Utc>,
}

impl Usage {
    /// Zero counts over the windows containing `now`.
    pub fn empty(now: DateTime<Utc>) -> Self {
        let (day_start, week_start) = usage_windows(now);
        Usage {
            orders_today: 0,
            orders_this_week: 0,
            day_started_at: day_start,
            week_started_at: week_start,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub tier: Tier,
    pub subscription: Option<SubscriptionRow>,
    pub plan_features: PlanFeatures,
    pub usage: Usage,
}

/// Active rows that have started; PayPal rows skip the local expiry check
/// because their authoritative expiry lives at the gateway.
pub async fn load_active<'e>(
    db: impl PgExecutor<'e>,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<SubscriptionRow>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionRow>(
        r#"
        SELECT * FROM subscriptions
        WHERE user_id = $1
          AND status = $2
          AND started_at <= $3
          AND (expires_at > $3 OR gateway = $4)
        ORDER BY created_at ASC
        "#,
    )
    .bind(user_id)
    .bind(STATUS_ACTIVE)
    .bind(now)
    .bind(GATEWAY_PAYPAL)
    .fetch_all(db)
    .await
}

/// Status, next-billing and expiry a row should carry after a gateway sync.
/// Missing gateway billing data keeps the row's previous values.
pub fn synced_fields(
    row: &SubscriptionRow,
    live: &GatewaySubscription,
) -> (String, Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let next_billing = live.next_billing_time();
    (
        live.local_status(),
        next_billing.or(row.next_billing_at),
        next_billing.or(row.expires_at),
    )
}

/// Refreshes every PayPal-backed row from the gateway. Returns true if any
/// row was written, meaning the active set must be reloaded.
pub async fn sync_paypal_rows(
    db: &PgPool,
    paypal: Option<&PayPalClient>,
    rows: &[SubscriptionRow],
) -> bool {
    let mut synced = false;

    for row in rows.iter().filter(|r| r.is_paypal()) {
        let Some(gateway_id) = row.gateway_subscription_id.as_deref() else {
            continue;
        };
        let Some(paypal) = paypal else {
            debug!("PayPal not configured; skipping sync of subscription {}", row.id);
            continue;
        };

        let live = match paypal.get_subscription(gateway_id).await {
            Ok(live) => live,
            Err(e) => {
                warn!("PayPal sync failed for subscription {} ({gateway_id}): {e}", row.id);
                continue;
            }
        };

        let (status, next_billing, expires) = synced_fields(row, &live);
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $1, next_billing_at = $2, expires_at = $3, updated_at = now()
            WHERE id = $4
            "#,
        )
        .bind(&status)
        .bind(next_billing)
        .bind(expires)
        .bind(row.id)
        .execute(db)
        .await;

        match result {
            Ok(_) => {
                if status != row.status {
                    info!(
                        "Subscription {} moved {} -> {} after PayPal sync",
                        row.id, row.status, status
                    );
                }
                synced = true;
            }
            Err(e) => warn!("Failed to store PayPal sync for subscription {}: {e}", row.id),
        }
    }

    synced
}

/// Highest tier across the active rows; free when there are none.
pub fn derive_tier(rows: &[SubscriptionRow]) -> Tier {
    rows.iter()
        .map(|r| Tier::from_plan_string(&r.plan))
        .max_by_key(|t| t.rank())
        .unwrap_or(Tier::Free)
}

/// True when `candidate` should replace `current` as the winner:
/// higher tier rank, or same rank and strictly later expiry.
pub fn outranks(candidate: &SubscriptionRow, current: &SubscriptionRow) -> bool {
    let candidate_rank = Tier::from_plan_string(&candidate.plan).rank();
    let current_rank = Tier::from_plan_string(&current.plan).rank();
    candidate_rank > current_rank
        || (candidate_rank == current_rank && candidate.expires_at > current.expires_at)
}

/// Pairwise reduction to the single winning row; the first row seen starts as the winner.
pub fn pick_winner(rows: &[SubscriptionRow]) -> Option<&SubscriptionRow> {
    rows.iter().fold(None, |best, row| match best {
        Some(current) if !outranks(row, current) => Some(current),
        _ => Some(row),
    })
}

/// Start of the current UTC day and of the current UTC week (Monday).
pub fn usage_windows(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let day = now.date_naive();
    let day_start = Utc.from_utc_datetime(&day.and_time(chrono::NaiveTime::MIN));
    let week_start = day_start - Duration::days(i64::from(day.weekday().num_days_from_monday()));
    (day_start, week_start)
}

pub async fn count_usage(
    db: &PgPool,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Usage, sqlx::Error> {
    let (day_start, week_start) = usage_windows(now);
    let (orders_today, orders_this_week): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE created_at >= $2),
            COUNT(*) FILTER (WHERE created_at >= $3)
        FROM orders
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .bind(day_start)
    .bind(week_start)
    .fetch_one(db)
    .await?;

    Ok(Usage {
        orders_today,
        orders_this_week,
        day_started_at: day_start,
        week_started_at: week_start,
    })
}

/// A missing or reshaped orders table reads as no usage; the tier still resolves.
fn usage_or_empty(
    counted: Result<Usage, sqlx::Error>,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Usage, sqlx::Error> {
    match counted {
        Err(e) if is_schema_error(&e) => {
            warn!("Orders unavailable for usage of {user_id}: {e}");
            Ok(Usage::empty(now))
        }
        other => other,
    }
}

pub async fn resolve(
    db: &PgPool,
    paypal: Option<&PayPalClient>,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Resolution, sqlx::Error> {
    let mut active = load_active(db, user_id, now).await?;
    if sync_paypal_rows(db, paypal, &active).await {
        active = load_active(db, user_id, now).await?;
    }

    let tier = derive_tier(&active);
    let subscription = pick_winner(&active).cloned();
    let usage = usage_or_empty(count_usage(db, user_id, now).await, user_id, now)?;

    Ok(Resolution {
        tier,
        subscription,
        plan_features: features_for(tier),
        usage,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::subscription::GATEWAY_INTERNAL;

    pub(crate) fn row(plan: &str, expires_at: Option<DateTime<Utc>>) -> SubscriptionRow {
        let now = Utc::now();
        SubscriptionRow {
            id: Uuid::new_v4(),
            user_id: Uuid::nil(),
            plan: plan.to_string(),
            status: STATUS_ACTIVE.to_string(),
            gateway: GATEWAY_INTERNAL.to_string(),
            gateway_subscription_id: None,
            started_at: now - Duration::days(1),
            next_billing_at: None,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_no_rows_is_free_without_winner() {
        assert_eq!(derive_tier(&[]), Tier::Free);
        assert!(pick_winner(&[]).is_none());
    }

    #[test]
    fn test_higher_tier_wins_regardless_of_expiry() {
        let rows = vec![
            row("personal_annual", Some(at("2027-12-01T00:00:00Z"))),
            row("business_monthly", Some(at("2026-11-01T00:00:00Z"))),
        ];
        assert_eq!(derive_tier(&rows), Tier::Business);
        assert_eq!(pick_winner(&rows).unwrap().plan, "business_monthly");
    }

    #[test]
    fn test_equal_tier_later_expiry_wins_in_any_order() {
        let early = row("personal_monthly", Some(at("2026-11-01T00:00:00Z")));
        let late = row("personal_referral_bonus", Some(at("2026-12-15T00:00:00Z")));

        let forward = vec![early.clone(), late.clone()];
        let backward = vec![late.clone(), early.clone()];
        assert_eq!(pick_winner(&forward).unwrap().id, late.id);
        assert_eq!(pick_winner(&backward).unwrap().id, late.id);
    }

    #[test]
    fn test_expiry_compared_as_timestamps() {
        // Lexical comparison of these would pick the wrong one.
        let a = row("personal_monthly", Some(at("2026-09-30T23:00:00-05:00")));
        let b = row("personal_monthly", Some(at("2026-10-01T01:00:00Z")));
        assert_eq!(pick_winner(&[b.clone(), a.clone()]).unwrap().id, a.id);
    }

    #[test]
    fn test_full_tie_keeps_first_seen() {
        let expiry = Some(at("2026-11-01T00:00:00Z"));
        let first = row("business_monthly", expiry);
        let second = row("business_annual", expiry);
        assert_eq!(pick_winner(&[first.clone(), second]).unwrap().id, first.id);
    }

    #[test]
    fn test_unknown_expiry_loses_tie() {
        let open = row("personal_monthly", None);
        let dated = row("personal_monthly", Some(at("2026-11-01T00:00:00Z")));
        assert_eq!(pick_winner(&[open, dated.clone()]).unwrap().id, dated.id);
    }

    #[test]
    fn test_usage_windows_start_monday_utc() {
        // 2026-10-16 is a Friday.
        let (day, week) = usage_windows(at("2026-10-16T15:42:10Z"));
        assert_eq!(day, at("2026-10-16T00:00:00Z"));
        assert_eq!(week, at("2026-10-12T00:00:00Z"));
    }

    #[test]
    fn test_schema_errors_degrade_to_empty_usage() {
        let now = at("2026-10-16T15:42:10Z");
        let missing = sqlx::Error::ColumnNotFound("created_at".to_string());
        let usage = usage_or_empty(Err(missing), Uuid::nil(), now).unwrap();
        assert_eq!(usage.orders_today, 0);
        assert_eq!(usage.orders_this_week, 0);
        assert_eq!(usage.week_started_at, at("2026-10-12T00:00:00Z"));

        let down = usage_or_empty(Err(sqlx::Error::PoolTimedOut), Uuid::nil(), now);
        assert!(matches!(down, Err(sqlx::Error::PoolTimedOut)));
    }

    #[test]
    fn test_usage_windows_on_monday_and_sunday() {
        let (day, week) = usage_windows(at("2026-10-12T00:00:00Z"));
        assert_eq!(day, week);
        let (_, week) = usage_windows(at("2026-10-18T23:59:59Z"));
        assert_eq!(week, at("2026-10-12T00:00:00Z"));
    }

    #[test]
    fn test_synced_fields_follow_gateway() {
        let mut local = row("business_monthly", Some(at("2026-10-01T00:00:00Z")));
        local.gateway = GATEWAY_PAYPAL.to_string();
        let live: GatewaySubscription = serde_json::from_str(
            r#"{"id":"I-1","plan_id":"P-1","status":"ACTIVE",
                "billing_info":{"next_billing_time":"2026-11-01T00:00:00Z"}}"#,
        )
        .unwrap();
        let (status, next, expires) = synced_fields(&local, &live);
        assert_eq!(status, "active");
        assert_eq!(next, Some(at("2026-11-01T00:00:00Z")));
        assert_eq!(expires, Some(at("2026-11-01T00:00:00Z")));
    }

    #[test]
    fn test_synced_fields_keep_previous_without_billing_info() {
        let mut local = row("business_monthly", Some(at("2026-10-01T00:00:00Z")));
        local.next_billing_at = Some(at("2026-10-01T00:00:00Z"));
        let live: GatewaySubscription =
            serde_json::from_str(r#"{"id":"I-1","plan_id":"P-1","status":"CANCELLED"}"#).unwrap();
        let (status, next, expires) = synced_fields(&local, &live);
        assert_eq!(status, "canceled");
        assert_eq!(next, local.next_billing_at);
        assert_eq!(expires, local.expires_at);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_resolve_without_orders_table_keeps_tier(pool: PgPool) {
        let user = crate::users::directory::find_or_create(&pool, "agent@x.com")
            .await
            .unwrap();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, plan, status, gateway, started_at, expires_at)
            VALUES ($1, 'business_annual', $2, $3, $4, $5)
            "#,
        )
        .bind(user.id)
        .bind(STATUS_ACTIVE)
        .bind(GATEWAY_INTERNAL)
        .bind(now - Duration::days(1))
        .bind(now + Duration::days(30))
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("DROP TABLE orders").execute(&pool).await.unwrap();

        let resolution = resolve(&pool, None, user.id, now).await.unwrap();
        assert_eq!(resolution.tier, Tier::Business);
        assert_eq!(
            resolution.subscription.map(|s| s.plan).as_deref(),
            Some("business_annual")
        );
        assert_eq!(resolution.usage.orders_today, 0);
        assert_eq!(resolution.usage.orders_this_week, 0);
    }
}
