use sqlx::{PgExecutor, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::models::user::User;

pub async fn find_by_email<'e>(db: impl PgExecutor<'e>, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(db)
        .await
}

pub async fn find_by_id(db: &PgPool, id: Uuid) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Returns the user for `email`, creating it if absent. `email` must already be normalized.
/// Concurrent first touches converge on one row through the unique email constraint.
pub async fn find_or_create(db: &PgPool, email: &str) -> Result<User, sqlx::Error> {
    if let Some(user) = find_by_email(db, email).await? {
        return Ok(user);
    }

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, name, role)
        VALUES ($1, $2, 'user')
        ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
        RETURNING *
        "#,
    )
    .bind(email)
    .bind(default_display_name(email))
    .fetch_one(db)
    .await?;

    info!("Created user {} for {}", user.id, user.email);
    Ok(user)
}

/// Stamps `email_verified_at` the first time; later calls leave it untouched.
pub async fn mark_email_verified(db: &PgPool, user: User) -> Result<User, sqlx::Error> {
    if user.email_verified_at.is_some() {
        return Ok(user);
    }
    sqlx::query_as::<_, User>(
        "UPDATE users SET email_verified_at = COALESCE(email_verified_at, now()) WHERE id = $1 RETURNING *",
    )
    .bind(user.id)
    .fetch_one(db)
    .await
}

/// Display name derived from the local part: `jane.doe@x.com` -> `Jane Doe`.
pub fn default_display_name(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let local = local.split('+').next().unwrap_or_default();
    local
        .split(['.', '_', '-'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut c = w.chars();
            match c.next() {
                None => String::new(),
                Some(f) => f.to_uppercase().to_string() + c.as_str(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
