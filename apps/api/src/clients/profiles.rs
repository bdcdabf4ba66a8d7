//! Client profiles: one row per (user, clientId), with client emails unique
//! per user regardless of case.

use sqlx::{PgExecutor, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::models::client_profile::ClientProfileRow;

/// Validated input for one upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileInput {
    pub client_id: String,
    pub client_email: String,
    pub client_name: Option<String>,
}

/// What to do with the rows currently matching the input's clientId and email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconcile {
    Insert,
    Update { id: Uuid },
    /// The clientId row wins and absorbs the email; the other email row goes away.
    Merge { keep: Uuid, remove: Uuid },
}

pub fn reconcile(
    by_client_id: Option<&ClientProfileRow>,
    by_email: Option<&ClientProfileRow>,
) -> Reconcile {
    match (by_client_id, by_email) {
        (None, None) => Reconcile::Insert,
        (Some(row), None) | (None, Some(row)) => Reconcile::Update { id: row.id },
        (Some(a), Some(b)) if a.id == b.id => Reconcile::Update { id: a.id },
        (Some(a), Some(b)) => Reconcile::Merge {
            keep: a.id,
            remove: b.id,
        },
    }
}

pub async fn list_profiles<'e>(
    db: impl PgExecutor<'e>,
    user_id: Uuid,
) -> Result<Vec<ClientProfileRow>, sqlx::Error> {
    sqlx::query_as::<_, ClientProfileRow>(
        "SELECT * FROM client_profiles WHERE user_id = $1 ORDER BY updated_at DESC",
    )
    .bind(user_id)
    .fetch_all(db)
    .await
}

pub async fn upsert_profile(
    db: &PgPool,
    user_id: Uuid,
    input: &ProfileInput,
) -> Result<ClientProfileRow, sqlx::Error> {
    let mut tx = db.begin().await?;

    let by_client_id = sqlx::query_as::<_, ClientProfileRow>(
        "SELECT * FROM client_profiles WHERE user_id = $1 AND client_id = $2 FOR UPDATE",
    )
    .bind(user_id)
    .bind(&input.client_id)
    .fetch_optional(&mut *tx)
    .await?;

    let by_email = sqlx::query_as::<_, ClientProfileRow>(
        "SELECT * FROM client_profiles WHERE user_id = $1 AND lower(client_email) = lower($2) FOR UPDATE",
    )
    .bind(user_id)
    .bind(&input.client_email)
    .fetch_optional(&mut *tx)
    .await?;

    let target = match reconcile(by_client_id.as_ref(), by_email.as_ref()) {
        Reconcile::Insert => None,
        Reconcile::Update { id } => Some(id),
        Reconcile::Merge { keep, remove } => {
            sqlx::query("DELETE FROM client_profiles WHERE id = $1")
                .bind(remove)
                .execute(&mut *tx)
                .await?;
            info!("Merged duplicate client profile {remove} into {keep}");
            Some(keep)
        }
    };

    let profile = match target {
        None => {
            sqlx::query_as::<_, ClientProfileRow>(
                r#"
                INSERT INTO client_profiles (user_id, client_id, client_email, client_name)
                VALUES ($1, $2, $3, $4)
                RETURNING *
                "#,
            )
            .bind(user_id)
            .bind(&input.client_id)
            .bind(&input.client_email)
            .bind(&input.client_name)
            .fetch_one(&mut *tx)
            .await?
        }
        Some(id) => {
            sqlx::query_as::<_, ClientProfileRow>(
                r#"
                UPDATE client_profiles
                SET client_id = $2,
                    client_email = $3,
                    client_name = COALESCE($4, client_name),
                    updated_at = now()
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(&input.client_id)
            .bind(&input.client_email)
            .bind(&input.client_name)
            .fetch_one(&mut *tx)
            .await?
        }
    };

    tx.commit().await?;
    Ok(profile)
}
