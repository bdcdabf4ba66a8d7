//! Subscription lifecycle: PayPal activation, internal activation, cancellation.
//!
//! Multi-row writes run in one transaction. Notification emails are collected
//! as `PostCommit` effects and attempted only after the commit succeeds; a
//! failed email is logged and never undoes the committed state.

use chrono::{DateTime, Months, Utc};
use serde::Serialize;
use sqlx::{Connection, PgPool};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::billing::paypal::{GatewaySubscription, PayPalClient};
use crate::billing::plans::{plan_identifier, BillingCycle, Tier};
use crate::billing::resolver::{load_active, pick_winner};
use crate::db::is_schema_error;
use crate::errors::AppError;
use crate::mailer::{templates, Email, Mailer};
use crate::models::subscription::{
    SubscriptionRow, GATEWAY_INTERNAL, GATEWAY_PAYPAL, STATUS_ACTIVE, STATUS_CANCELED,
    STATUS_PENDING,
};
use crate::models::user::User;
use crate::referrals::ledger::{apply_referral_reward, RewardOutcome};

/// Side effect deferred until after the transaction commits.
#[derive(Debug, Clone, PartialEq)]
pub enum PostCommit {
    Activated {
        to: String,
        tier: Tier,
        plan: String,
        next_billing: Option<DateTime<Utc>>,
    },
    Canceled {
        to: String,
        plan: String,
        superseded: bool,
    },
}

impl PostCommit {
    pub fn email(&self) -> Email {
        match self {
            PostCommit::Activated {
                to,
                tier,
                plan,
                next_billing,
            } => templates::subscription_activated(to, *tier, plan, *next_billing),
            PostCommit::Canceled {
                to,
                plan,
                superseded,
            } => templates::subscription_canceled(to, plan, *superseded),
        }
    }
}

/// Attempts every effect independently. Returns how many succeeded.
pub async fn run_post_commit(mailer: Option<&dyn Mailer>, effects: Vec<PostCommit>) -> usize {
    let Some(mailer) = mailer else {
        if !effects.is_empty() {
            warn!("Mail not configured; dropping {} notification(s)", effects.len());
        }
        return 0;
    };

    let mut delivered = 0;
    for effect in effects {
        let email = effect.email();
        match mailer.send(&email).await {
            Ok(()) => delivered += 1,
            Err(e) => error!("Failed to send \"{}\" to {}: {e}", email.subject, email.to),
        }
    }
    delivered
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationOutcome {
    pub subscription: SubscriptionRow,
    pub referral_reward: Option<RewardOutcome>,
    pub paypal_status: String,
    #[serde(skip)]
    pub superseded: Vec<SubscriptionRow>,
}

/// Local status written for a freshly approved PayPal subscription.
/// PayPal reports APPROVAL_PENDING right after a synchronous approval even
/// though billing is already scheduled, so pending is promoted to active.
pub fn activation_status(live: &GatewaySubscription) -> String {
    let status = live.local_status();
    if status == STATUS_PENDING {
        STATUS_ACTIVE.to_string()
    } else {
        status
    }
}

/// Expiry for a new paid period: the gateway's next billing time, or one
/// billing cycle from `start` when the gateway has not scheduled one.
pub fn period_end(
    start: DateTime<Utc>,
    cycle: BillingCycle,
    next_billing: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    next_billing.unwrap_or_else(|| {
        start
            .checked_add_months(Months::new(cycle.months()))
            .unwrap_or(start)
    })
}

/// Checks the live gateway subscription against what the client asked for.
pub fn validate_gateway_subscription(
    live: &GatewaySubscription,
    expected_plan_id: &str,
) -> Result<(), AppError> {
    if live.plan_id != expected_plan_id {
        return Err(AppError::bad_request(
            "PLAN_MISMATCH",
            format!(
                "PayPal subscription {} is for plan {}, expected {}",
                live.id, live.plan_id, expected_plan_id
            ),
        ));
    }
    if live.is_terminal() {
        return Err(AppError::bad_request(
            "INVALID_GATEWAY_STATUS",
            format!("PayPal subscription {} is {}", live.id, live.status),
        ));
    }
    Ok(())
}

/// A gateway subscription id belongs to the first user that activated it.
fn subscription_taken(gateway_subscription_id: &str) -> AppError {
    AppError::conflict(
        "SUBSCRIPTION_OWNED_BY_ANOTHER_USER",
        format!("PayPal subscription {gateway_subscription_id} is linked to another account"),
    )
}

/// Parameters for activating a PayPal-backed subscription.
pub struct PayPalActivation<'a> {
    pub user: &'a User,
    pub tier: Tier,
    pub cycle: BillingCycle,
    pub gateway_subscription_id: &'a str,
}

pub async fn activate_paypal(
    db: &PgPool,
    paypal: &PayPalClient,
    mailer: Option<&dyn Mailer>,
    params: PayPalActivation<'_>,
    now: DateTime<Utc>,
) -> Result<ActivationOutcome, AppError> {
    let PayPalActivation {
        user,
        tier,
        cycle,
        gateway_subscription_id,
    } = params;
    if !tier.is_paid() {
        return Err(AppError::bad_request(
            "INVALID_TIER",
            "tier must be personal or business",
        ));
    }
    let expected_plan_id = paypal
        .config()
        .plan_ids
        .lookup(tier, cycle)
        .ok_or_else(|| {
            AppError::bad_request(
                "PLAN_NOT_CONFIGURED",
                format!("No PayPal plan configured for {}", plan_identifier(tier, cycle)),
            )
        })?
        .to_string();

    let live = paypal.get_subscription(gateway_subscription_id).await?;
    validate_gateway_subscription(&live, &expected_plan_id)?;

    let status = activation_status(&live);
    let started_at = live.start_time.filter(|t| *t <= now).unwrap_or(now);
    let next_billing = live.next_billing_time();
    let expires_at = period_end(started_at, cycle, next_billing);
    let plan = plan_identifier(tier, cycle);

    let mut tx = db.begin().await?;

    let owner: Option<Uuid> = sqlx::query_scalar(
        "SELECT user_id FROM subscriptions WHERE gateway_subscription_id = $1 FOR UPDATE",
    )
    .bind(gateway_subscription_id)
    .fetch_optional(&mut *tx)
    .await?;
    if owner.is_some_and(|owner| owner != user.id) {
        return Err(subscription_taken(gateway_subscription_id));
    }

    let superseded = sqlx::query_as::<_, SubscriptionRow>(
        r#"
        UPDATE subscriptions
        SET status = $3, expires_at = $4, next_billing_at = NULL, updated_at = now()
        WHERE user_id = $1
          AND status = $5
          AND started_at <= $4
          AND (expires_at > $4 OR gateway = $6)
          AND gateway_subscription_id IS DISTINCT FROM $2
        RETURNING *
        "#,
    )
    .bind(user.id)
    .bind(gateway_subscription_id)
    .bind(STATUS_CANCELED)
    .bind(now)
    .bind(STATUS_ACTIVE)
    .bind(GATEWAY_PAYPAL)
    .fetch_all(&mut *tx)
    .await?;

    let subscription = sqlx::query_as::<_, SubscriptionRow>(
        r#"
        INSERT INTO subscriptions
            (user_id, plan, status, gateway, gateway_subscription_id,
             started_at, next_billing_at, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (gateway_subscription_id) DO UPDATE SET
            plan = EXCLUDED.plan,
            status = EXCLUDED.status,
            next_billing_at = EXCLUDED.next_billing_at,
            expires_at = EXCLUDED.expires_at,
            updated_at = now()
        WHERE subscriptions.user_id = EXCLUDED.user_id
        RETURNING *
        "#,
    )
    .bind(user.id)
    .bind(&plan)
    .bind(&status)
    .bind(GATEWAY_PAYPAL)
    .bind(gateway_subscription_id)
    .bind(started_at)
    .bind(next_billing)
    .bind(expires_at)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| subscription_taken(gateway_subscription_id))?;

    let mut referral_reward = None;
    if subscription.status == STATUS_ACTIVE {
        // Savepoint so a missing referral table does not poison the outer transaction.
        let mut savepoint = tx.begin().await?;
        match apply_referral_reward(&mut savepoint, user, now).await {
            Ok(reward) => {
                savepoint.commit().await?;
                referral_reward = reward;
            }
            Err(e) if is_schema_error(&e) => {
                warn!("Referral tables unavailable, skipping reward for {}: {e}", user.id);
                savepoint.rollback().await?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    tx.commit().await?;
    info!(
        "Activated PayPal subscription {} ({plan}, {status}) for user {}; superseded {}",
        gateway_subscription_id,
        user.id,
        superseded.len()
    );

    let mut effects = vec![PostCommit::Activated {
        to: user.email.clone(),
        tier,
        plan: subscription.plan.clone(),
        next_billing: subscription.next_billing_at,
    }];
    effects.extend(superseded.iter().map(|old| PostCommit::Canceled {
        to: user.email.clone(),
        plan: old.plan.clone(),
        superseded: true,
    }));
    run_post_commit(mailer, effects).await;

    Ok(ActivationOutcome {
        subscription,
        referral_reward,
        paypal_status: live.status,
        superseded,
    })
}

/// Cancels the user's current winning subscription. Returns `None` when
/// nothing is active. PayPal-backed rows are also canceled at the gateway,
/// best effort.
pub async fn cancel_current(
    db: &PgPool,
    paypal: Option<&PayPalClient>,
    mailer: Option<&dyn Mailer>,
    user: &User,
    now: DateTime<Utc>,
) -> Result<Option<SubscriptionRow>, AppError> {
    let active = load_active(db, user.id, now).await?;
    let Some(current) = pick_winner(&active) else {
        return Ok(None);
    };

    let canceled = sqlx::query_as::<_, SubscriptionRow>(
        r#"
        UPDATE subscriptions
        SET status = $2, expires_at = $3, next_billing_at = NULL, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(current.id)
    .bind(STATUS_CANCELED)
    .bind(now)
    .fetch_one(db)
    .await?;

    info!("Canceled subscription {} for user {}", canceled.id, user.id);

    if let (true, Some(gateway_id), Some(paypal)) = (
        canceled.is_paypal(),
        canceled.gateway_subscription_id.as_deref(),
        paypal,
    ) {
        if let Err(e) = paypal
            .cancel_subscription(gateway_id, "Canceled by customer")
            .await
        {
            error!("PayPal cancel failed for {gateway_id} (local row already canceled): {e}");
        }
    }

    run_post_commit(
        mailer,
        vec![PostCommit::Canceled {
            to: user.email.clone(),
            plan: canceled.plan.clone(),
            superseded: false,
        }],
    )
    .await;

    Ok(Some(canceled))
}

/// Creates an internally-billed subscription unless one is already running,
/// in which case the running one is returned. The flag is true when a row was created.
pub async fn activate_internal(
    db: &PgPool,
    mailer: Option<&dyn Mailer>,
    user: &User,
    tier: Tier,
    cycle: BillingCycle,
    now: DateTime<Utc>,
) -> Result<(SubscriptionRow, bool), AppError> {
    if !tier.is_paid() {
        return Err(AppError::bad_request(
            "INVALID_PLAN",
            "plan must be a personal or business plan",
        ));
    }

    let running = sqlx::query_as::<_, SubscriptionRow>(
        r#"
        SELECT * FROM subscriptions
        WHERE user_id = $1 AND status = $2 AND started_at <= $3 AND expires_at > $3
        ORDER BY created_at ASC
        "#,
    )
    .bind(user.id)
    .bind(STATUS_ACTIVE)
    .bind(now)
    .fetch_all(db)
    .await?;
    if let Some(existing) = pick_winner(&running) {
        return Ok((existing.clone(), false));
    }

    let expires_at = period_end(now, cycle, None);
    let subscription = sqlx::query_as::<_, SubscriptionRow>(
        r#"
        INSERT INTO subscriptions (user_id, plan, status, gateway, started_at, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(user.id)
    .bind(plan_identifier(tier, cycle))
    .bind(STATUS_ACTIVE)
    .bind(GATEWAY_INTERNAL)
    .bind(now)
    .bind(expires_at)
    .fetch_one(db)
    .await?;

    info!("Created internal subscription {} for user {}", subscription.id, user.id);

    run_post_commit(
        mailer,
        vec![PostCommit::Activated {
            to: user.email.clone(),
            tier,
            plan: subscription.plan.clone(),
            next_billing: None,
        }],
    )
    .await;

    Ok((subscription, true))
}
