//! Axum handler for the auth endpoint.
//!
//! One POST route dispatches on `action`:
//! `send_magic_link`, `verify_magic_link`, `verify_login_code`, `session`, `logout`.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::auth::cookies::{
    clear_session_cookie, is_secure_request, session_cookie, session_token,
};
use crate::auth::token::{time_slot, TokenError};
use crate::billing::plans::{features_for, PlanFeatures, Tier};
use crate::billing::resolver::{resolve, Usage};
use crate::db::is_schema_error;
use crate::errors::AppError;
use crate::mailer::templates;
use crate::models::subscription::SubscriptionRow;
use crate::models::user::User;
use crate::referrals::ledger::{mark_registered, was_invited};
use crate::state::AppState;
use crate::users::directory::{find_by_email, find_by_id, find_or_create, mark_email_verified};
use crate::users::{is_valid_email, normalize_email};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    pub action: Option<String>,
    pub email: Option<String>,
    pub token: Option<String>,
    pub code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActionQuery {
    pub action: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    pub success: bool,
    pub user: User,
    pub subscription: Option<SubscriptionRow>,
    pub tier: Tier,
    pub plan_features: PlanFeatures,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// POST /api/auth
pub async fn handle_auth(
    State(state): State<AppState>,
    Query(query): Query<ActionQuery>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Option<Json<AuthRequest>>,
) -> Response {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let action = req.action.clone().or(query.action).unwrap_or_default();
    let secure = is_secure_request(&headers, state.config.is_production());

    match action.as_str() {
        "send_magic_link" => send_magic_link(&state, &req).await.into_response(),
        "verify_magic_link" => match verify_magic_link(&state, &req).await {
            Ok(user) => sign_in(&state, user, jar, secure).await.into_response(),
            Err(e) => e.into_response(),
        },
        "verify_login_code" => match verify_login_code(&state, &req).await {
            Ok(user) => sign_in(&state, user, jar, secure).await.into_response(),
            Err(e) => e.into_response(),
        },
        "session" => session(&state, jar, secure).await,
        "logout" => (
            jar.add(clear_session_cookie(secure)),
            Json(json!({ "success": true })),
        )
            .into_response(),
        "" => AppError::Validation("action is required".to_string()).into_response(),
        other => AppError::bad_request("UNKNOWN_ACTION", format!("Unknown action '{other}'"))
            .into_response(),
    }
}

fn check_allowed(state: &AppState, email: &str) -> Result<(), AppError> {
    if state.config.auth.is_allowed(email) {
        Ok(())
    } else {
        Err(AppError::Forbidden {
            code: "EMAIL_NOT_ALLOWED",
            message: "This email address is not allowed to sign in".to_string(),
        })
    }
}

/// Invite lookups are secondary: an unmigrated referral table counts as "not invited".
async fn invited(state: &AppState, email: &str) -> Result<bool, AppError> {
    match was_invited(&state.db, email).await {
        Ok(invited) => Ok(invited),
        Err(e) if is_schema_error(&e) => {
            warn!("Referral lookup unavailable for {email}: {e}");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

async fn may_sign_up(state: &AppState, email: &str) -> Result<bool, AppError> {
    Ok(state.config.auth.auto_signup || invited(state, email).await?)
}

fn account_not_found() -> AppError {
    AppError::unauthorized(
        "ACCOUNT_NOT_FOUND",
        "No account exists for this email address",
    )
}

async fn send_magic_link(state: &AppState, req: &AuthRequest) -> Result<Json<serde_json::Value>, AppError> {
    let email = normalize_email(req.email.as_deref().unwrap_or_default());
    if !is_valid_email(&email) {
        return Err(AppError::bad_request(
            "INVALID_EMAIL",
            "email must be a valid email address",
        ));
    }
    let tokens = state.tokens()?;
    let mailer = state
        .mailer()
        .ok_or(AppError::NotConfigured("Mail provider"))?;

    check_allowed(state, &email)?;
    if find_by_email(&state.db, &email).await?.is_none() && !may_sign_up(state, &email).await? {
        return Err(account_not_found());
    }

    let ttl = state.config.auth.magic_link_ttl_minutes;
    let now = Utc::now();
    let (token, _) = tokens.issue_magic_link(&email, ttl, now);
    let code = tokens.login_code(&email, time_slot(now.timestamp_millis(), ttl));
    let link = format!("{}/auth/verify?token={token}", state.config.app_url);

    mailer
        .send(&templates::magic_link(&email, &link, &code, ttl))
        .await?;
    info!("Sent magic link to {email}");

    Ok(Json(json!({
        "success": true,
        "message": "Check your email for a sign-in link and code",
    })))
}

async fn verify_magic_link(state: &AppState, req: &AuthRequest) -> Result<String, AppError> {
    let token = req
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Validation("token is required".to_string()))?;

    let claims = state
        .tokens()?
        .verify_magic_link(token, Utc::now())
        .map_err(|e| {
            let message = match e {
                TokenError::Expired => "This sign-in link has expired",
                _ => "This sign-in link is invalid",
            };
            AppError::unauthorized("INVALID_MAGIC_LINK", message)
        })?;

    Ok(normalize_email(&claims.email))
}

pub fn is_six_digits(code: &str) -> bool {
    code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit())
}

async fn verify_login_code(state: &AppState, req: &AuthRequest) -> Result<String, AppError> {
    let email = normalize_email(req.email.as_deref().unwrap_or_default());
    if !is_valid_email(&email) {
        return Err(AppError::bad_request(
            "INVALID_EMAIL",
            "email must be a valid email address",
        ));
    }
    let code = req.code.as_deref().unwrap_or_default().trim();
    if !is_six_digits(code) {
        return Err(AppError::bad_request(
            "INVALID_CODE_FORMAT",
            "code must be 6 digits",
        ));
    }

    let ttl = state.config.auth.magic_link_ttl_minutes;
    if !state
        .tokens()?
        .verify_login_code(&email, code, ttl, Utc::now())
    {
        return Err(AppError::unauthorized(
            "INVALID_LOGIN_CODE",
            "This code is invalid or has expired",
        ));
    }
    Ok(email)
}

/// Tier resolution for sign-in; unmigrated subscription tables degrade to free with a warning.
async fn resolve_for_sign_in(
    state: &AppState,
    user: User,
) -> Result<SignInResponse, AppError> {
    match resolve(&state.db, state.paypal.as_ref(), user.id, Utc::now()).await {
        Ok(resolution) => Ok(SignInResponse {
            success: true,
            user,
            subscription: resolution.subscription,
            tier: resolution.tier,
            plan_features: resolution.plan_features,
            usage: Some(resolution.usage),
            warning: None,
        }),
        Err(e) if is_schema_error(&e) => {
            warn!("Subscription lookup unavailable for {}: {e}", user.id);
            Ok(SignInResponse {
                success: true,
                user,
                subscription: None,
                tier: Tier::Free,
                plan_features: features_for(Tier::Free),
                usage: None,
                warning: Some(
                    "Subscription data is unavailable; showing the free tier".to_string(),
                ),
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Completes a verified sign-in: find or create the user, stamp verification,
/// resolve the tier and issue a session cookie.
async fn sign_in(
    state: &AppState,
    email: String,
    jar: CookieJar,
    secure: bool,
) -> Result<(CookieJar, Json<SignInResponse>), AppError> {
    check_allowed(state, &email)?;

    let user = match find_by_email(&state.db, &email).await? {
        Some(user) => user,
        None => {
            if !may_sign_up(state, &email).await? {
                return Err(account_not_found());
            }
            find_or_create(&state.db, &email).await?
        }
    };

    // Invites count as registered once the invitee first proves the address,
    // including users that were created earlier by another endpoint.
    let first_verification = user.email_verified_at.is_none();
    let user = mark_email_verified(&state.db, user).await?;
    if first_verification {
        match mark_registered(&state.db, &email, user.id).await {
            Ok(n) if n > 0 => info!("Marked {n} referral invite(s) registered for {email}"),
            Ok(_) => {}
            Err(e) => warn!("Could not mark referral invites for {email}: {e}"),
        }
    }

    let response = resolve_for_sign_in(state, user).await?;
    let token = state
        .tokens()?
        .issue_session(response.user.id, &response.user.email, Utc::now());

    info!("Signed in {} ({:?})", response.user.email, response.tier);
    Ok((jar.add(session_cookie(token, secure)), Json(response)))
}

async fn session(state: &AppState, jar: CookieJar, secure: bool) -> Response {
    let tokens = match state.tokens() {
        Ok(tokens) => tokens,
        Err(e) => return e.into_response(),
    };
    let reject = |jar: CookieJar, code: &'static str, message: &str| {
        (
            jar.add(clear_session_cookie(secure)),
            AppError::unauthorized(code, message),
        )
            .into_response()
    };

    let Some(token) = session_token(&jar) else {
        return reject(jar, "SESSION_MISSING", "Not signed in");
    };
    let claims = match tokens.verify_session(&token, Utc::now()) {
        Ok(claims) => claims,
        Err(_) => return reject(jar, "SESSION_INVALID", "Session is invalid or expired"),
    };
    let user = match find_by_id(&state.db, claims.uid).await {
        Ok(Some(user)) => user,
        Ok(None) => return reject(jar, "SESSION_INVALID", "Session user no longer exists"),
        Err(e) => return AppError::from(e).into_response(),
    };

    match resolve_for_sign_in(state, user).await {
        Ok(response) => {
            // Sliding expiry: every successful check issues a fresh token.
            let token = tokens.issue_session(response.user.id, &response.user.email, Utc::now());
            (jar.add(session_cookie(token, secure)), Json(response)).into_response()
        }
        Err(e) => e.into_response(),
    }
}
