use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::AppError;
use crate::mailer::templates;
use crate::models::referral::ReferralInviteRow;
use crate::referrals::ledger::{list_invites, stats_for, upsert_invite, ReferralStats};
use crate::state::AppState;
use crate::users::directory::find_or_create;
use crate::users::require_email;

#[derive(Debug, Default, Deserialize)]
pub struct ReferralQuery {
    pub email: Option<String>,
    pub action: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteRequest {
    pub action: Option<String>,
    pub referrer_email: Option<String>,
    pub invitee_email: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralOverview {
    pub stats: ReferralStats,
    pub invites: Vec<ReferralInviteRow>,
    pub referral_link: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct EmailDelivery {
    pub sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct InviteResponse {
    pub invite: ReferralInviteRow,
    pub email: EmailDelivery,
}

pub fn referral_link(app_url: &str, reference: &str) -> String {
    format!("{}/?ref={reference}", app_url.trim_end_matches('/'))
}

/// GET /api/referrals?email=
pub async fn handle_get_referrals(
    State(state): State<AppState>,
    Query(params): Query<ReferralQuery>,
) -> Result<Json<ReferralOverview>, AppError> {
    let email = require_email(params.email.as_deref(), "email")?;
    let user = find_or_create(&state.db, &email).await?;
    let invites = list_invites(&state.db, user.id).await?;

    Ok(Json(ReferralOverview {
        stats: stats_for(&invites),
        invites,
        referral_link: referral_link(&state.config.app_url, &user.id.to_string()),
    }))
}

/// POST /api/referrals (action=invite)
pub async fn handle_post_referral(
    State(state): State<AppState>,
    Query(params): Query<ReferralQuery>,
    body: Option<Json<InviteRequest>>,
) -> Result<Json<InviteResponse>, AppError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let action = req.action.clone().or(params.action).unwrap_or_default();
    if action != "invite" {
        return Err(AppError::bad_request(
            "UNKNOWN_ACTION",
            format!("Unknown action '{action}'"),
        ));
    }

    let referrer_email = require_email(req.referrer_email.as_deref(), "referrerEmail")?;
    let invitee_email = require_email(req.invitee_email.as_deref(), "inviteeEmail")?;
    if referrer_email == invitee_email {
        return Err(AppError::bad_request(
            "SELF_INVITE",
            "You cannot invite yourself",
        ));
    }

    let referrer = find_or_create(&state.db, &referrer_email).await?;
    let invite = upsert_invite(&state.db, referrer.id, &invitee_email).await?;
    info!("Referral invite {} from {} to {}", invite.id, referrer.id, invitee_email);

    let link = referral_link(&state.config.app_url, &invite.code);
    let email = match state.mailer() {
        Some(mailer) => match mailer
            .send(&templates::referral_invite(&invitee_email, &referrer_email, &link))
            .await
        {
            Ok(()) => EmailDelivery {
                sent: true,
                error: None,
            },
            Err(e) => {
                warn!("Referral invite email to {invitee_email} failed: {e}");
                EmailDelivery {
                    sent: false,
                    error: Some(e.to_string()),
                }
            }
        },
        None => EmailDelivery {
            sent: false,
            error: Some("Mail provider is not configured".to_string()),
        },
    };

    Ok(Json(InviteResponse { invite, email }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referral_link_shape() {
        assert_eq!(
            referral_link("https://app.example.com/", "AB12CD34EF56"),
            "https://app.example.com/?ref=AB12CD34EF56"
        );
        assert_eq!(
            referral_link("http://localhost:3000", "u-1"),
            "http://localhost:3000/?ref=u-1"
        );
    }

    #[test]
    fn test_email_delivery_omits_empty_error() {
        let sent = serde_json::to_value(EmailDelivery {
            sent: true,
            error: None,
        })
        .unwrap();
        assert_eq!(sent, serde_json::json!({ "sent": true }));
    }
}
