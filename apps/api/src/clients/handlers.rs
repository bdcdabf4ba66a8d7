use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::clients::profiles::{list_profiles, upsert_profile, ProfileInput};
use crate::errors::AppError;
use crate::models::client_profile::ClientProfileRow;
use crate::state::AppState;
use crate::users::directory::find_or_create;
use crate::users::require_email;

#[derive(Debug, Default, Deserialize)]
pub struct EmailQuery {
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRequest {
    pub email: Option<String>,
    pub client_id: Option<String>,
    pub client_email: Option<String>,
    pub client_name: Option<String>,
}

#[derive(Serialize)]
pub struct ProfileListResponse {
    pub profiles: Vec<ClientProfileRow>,
}

impl ProfileRequest {
    fn into_input(self) -> Result<(String, ProfileInput), AppError> {
        let email = require_email(self.email.as_deref(), "email")?;
        let client_id = self
            .client_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Validation("clientId is required".to_string()))?;
        let client_email = require_email(self.client_email.as_deref(), "clientEmail")?;
        let client_name = self
            .client_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        Ok((
            email,
            ProfileInput {
                client_id,
                client_email,
                client_name,
            },
        ))
    }
}

/// GET /api/client-profiles?email=
pub async fn handle_get_profiles(
    State(state): State<AppState>,
    Query(params): Query<EmailQuery>,
) -> Result<Json<ProfileListResponse>, AppError> {
    let email = require_email(params.email.as_deref(), "email")?;
    let user = find_or_create(&state.db, &email).await?;
    let profiles = list_profiles(&state.db, user.id).await?;
    Ok(Json(ProfileListResponse { profiles }))
}

/// POST /api/client-profiles
pub async fn handle_upsert_profile(
    State(state): State<AppState>,
    body: Option<Json<ProfileRequest>>,
) -> Result<Json<Value>, AppError> {
    let (email, input) = body.map(|Json(b)| b).unwrap_or_default().into_input()?;
    let user = find_or_create(&state.db, &email).await?;
    let profile = upsert_profile(&state.db, user.id, &input).await?;
    Ok(Json(json!({ "profile": profile })))
}
