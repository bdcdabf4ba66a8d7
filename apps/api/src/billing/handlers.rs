use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::billing::lifecycle::{activate_internal, activate_paypal, cancel_current, PayPalActivation};
use crate::billing::paypal::is_valid_subscription_id;
use crate::billing::plans::{catalog, requested_plan, BillingCycle, PlanFeatures, Tier};
use crate::billing::resolver::{resolve, Usage};
use crate::errors::AppError;
use crate::models::subscription::SubscriptionRow;
use crate::state::AppState;
use crate::users::directory::{find_by_email, find_or_create};
use crate::users::require_email;

#[derive(Debug, Default, Deserialize)]
pub struct EmailQuery {
    pub email: Option<String>,
    pub action: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub action: Option<String>,
    pub email: Option<String>,
    pub plan: Option<String>,
    pub tier: Option<String>,
    pub billing_cycle: Option<String>,
    pub paypal_subscription_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatusResponse {
    pub subscription: Option<SubscriptionRow>,
    pub tier: Tier,
    pub plan_features: PlanFeatures,
    pub usage: Usage,
}

/// GET /api/subscriptions?email=
pub async fn handle_get_subscription(
    State(state): State<AppState>,
    Query(params): Query<EmailQuery>,
) -> Result<Json<SubscriptionStatusResponse>, AppError> {
    let email = require_email(params.email.as_deref(), "email")?;
    let user = find_or_create(&state.db, &email).await?;
    let resolution = resolve(&state.db, state.paypal.as_ref(), user.id, Utc::now()).await?;
    Ok(Json(SubscriptionStatusResponse {
        subscription: resolution.subscription,
        tier: resolution.tier,
        plan_features: resolution.plan_features,
        usage: resolution.usage,
    }))
}

/// POST /api/subscriptions
/// Dispatches on `action`: `activate_paypal`, `cancel_subscription`, or
/// (absent) an internally-billed activation.
pub async fn handle_post_subscription(
    State(state): State<AppState>,
    Query(params): Query<EmailQuery>,
    body: Option<Json<SubscriptionRequest>>,
) -> Result<Response, AppError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let action = req.action.clone().or(params.action).unwrap_or_default();
    let email = require_email(req.email.as_deref().or(params.email.as_deref()), "email")?;
    let now = Utc::now();

    match action.as_str() {
        "activate_paypal" => {
            let gateway_subscription_id = req
                .paypal_subscription_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| {
                    AppError::Validation("paypalSubscriptionId is required".to_string())
                })?;
            if !is_valid_subscription_id(gateway_subscription_id) {
                return Err(AppError::bad_request(
                    "INVALID_SUBSCRIPTION_ID",
                    "paypalSubscriptionId may only contain letters, digits and dashes",
                ));
            }
            let (tier, cycle) = requested_tier(&req, "INVALID_TIER")?;
            if !tier.is_paid() {
                return Err(AppError::bad_request(
                    "INVALID_TIER",
                    "tier must be personal or business",
                ));
            }
            let paypal = state.paypal()?;
            let user = find_or_create(&state.db, &email).await?;

            let outcome = activate_paypal(
                &state.db,
                paypal,
                state.mailer(),
                PayPalActivation {
                    user: &user,
                    tier,
                    cycle,
                    gateway_subscription_id,
                },
                now,
            )
            .await?;
            Ok(Json(outcome).into_response())
        }
        "cancel_subscription" => {
            let user = find_by_email(&state.db, &email)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("User {email} not found")))?;
            let canceled =
                cancel_current(&state.db, state.paypal.as_ref(), state.mailer(), &user, now)
                    .await?;
            Ok(Json(json!({ "canceled": canceled })).into_response())
        }
        "" => {
            let (tier, cycle) = requested_tier(&req, "INVALID_PLAN")?;
            let user = find_or_create(&state.db, &email).await?;
            let (subscription, created) =
                activate_internal(&state.db, state.mailer(), &user, tier, cycle, now).await?;
            let status = if created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            Ok((status, Json(json!({ "subscription": subscription }))).into_response())
        }
        other => Err(AppError::bad_request(
            "UNKNOWN_ACTION",
            format!("Unknown action '{other}'"),
        )),
    }
}

fn requested_tier(
    req: &SubscriptionRequest,
    code: &'static str,
) -> Result<(Tier, BillingCycle), AppError> {
    requested_plan(
        req.plan.as_deref(),
        req.tier.as_deref(),
        req.billing_cycle.as_deref(),
    )
    .ok_or_else(|| {
        AppError::bad_request(
            code,
            "plan, tier or billingCycle is missing or not recognised",
        )
    })
}

/// GET /api/plans
pub async fn handle_list_plans() -> Json<Vec<PlanFeatures>> {
    Json(catalog())
}
