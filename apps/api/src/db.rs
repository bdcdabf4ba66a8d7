use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Creates and returns a PostgreSQL connection pool.
/// The pool lives in `AppState` for the whole process and is shared by every request.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Stable discriminant for database failures, so callers can branch on the
/// failure kind instead of provider-specific code strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    SchemaMissing,
    SchemaMismatch,
    Unreachable,
    AuthFailed,
    UniqueViolation,
    Other,
}

/// Classifies a sqlx error and returns the raw code it carried, if any.
pub fn classify(err: &sqlx::Error) -> (DbErrorKind, Option<String>) {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned());
            let kind = code
                .as_deref()
                .map(kind_for_sqlstate)
                .unwrap_or(DbErrorKind::Other);
            (kind, code)
        }
        sqlx::Error::Io(_) => (DbErrorKind::Unreachable, Some("IO".to_string())),
        sqlx::Error::Tls(_) => (DbErrorKind::Unreachable, Some("TLS".to_string())),
        sqlx::Error::PoolTimedOut => (DbErrorKind::Unreachable, Some("POOL_TIMED_OUT".to_string())),
        sqlx::Error::PoolClosed => (DbErrorKind::Unreachable, Some("POOL_CLOSED".to_string())),
        sqlx::Error::ColumnNotFound(_) | sqlx::Error::ColumnDecode { .. } => {
            (DbErrorKind::SchemaMismatch, Some("COLUMN".to_string()))
        }
        sqlx::Error::TypeNotFound { .. } => {
            (DbErrorKind::SchemaMismatch, Some("TYPE_NOT_FOUND".to_string()))
        }
        _ => (DbErrorKind::Other, None),
    }
}

pub fn kind_for_sqlstate(code: &str) -> DbErrorKind {
    match code {
        "42P01" | "3F000" => DbErrorKind::SchemaMissing,
        "42703" | "42804" | "42883" => DbErrorKind::SchemaMismatch,
        "28P01" | "28000" => DbErrorKind::AuthFailed,
        "23505" => DbErrorKind::UniqueViolation,
        c if c.starts_with("08") || c == "57P03" => DbErrorKind::Unreachable,
        _ => DbErrorKind::Other,
    }
}

/// Human-actionable hint for each failure kind.
pub fn hint(kind: DbErrorKind) -> &'static str {
    match kind {
        DbErrorKind::SchemaMissing => {
            "A required table does not exist. Run the migrations in apps/api/migrations."
        }
        DbErrorKind::SchemaMismatch => {
            "The database schema is out of date. Apply the latest migrations."
        }
        DbErrorKind::Unreachable => {
            "The database could not be reached. Check DATABASE_URL and network access."
        }
        DbErrorKind::AuthFailed => {
            "The database rejected the credentials in DATABASE_URL."
        }
        DbErrorKind::UniqueViolation => "A record with the same unique value already exists.",
        DbErrorKind::Other => "An unexpected database error occurred.",
    }
}

/// True for errors that mean the tables are not (fully) migrated yet.
/// Secondary lookups degrade to a warning on these instead of failing.
pub fn is_schema_error(err: &sqlx::Error) -> bool {
    matches!(
        classify(err).0,
        DbErrorKind::SchemaMissing | DbErrorKind::SchemaMismatch
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlstate_mapping() {
        assert_eq!(kind_for_sqlstate("42P01"), DbErrorKind::SchemaMissing);
        assert_eq!(kind_for_sqlstate("42703"), DbErrorKind::SchemaMismatch);
        assert_eq!(kind_for_sqlstate("28P01"), DbErrorKind::AuthFailed);
        assert_eq!(kind_for_sqlstate("23505"), DbErrorKind::UniqueViolation);
        assert_eq!(kind_for_sqlstate("08006"), DbErrorKind::Unreachable);
        assert_eq!(kind_for_sqlstate("22P02"), DbErrorKind::Other);
    }

    #[test]
    fn test_transport_errors_are_unreachable() {
        let (kind, code) = classify(&sqlx::Error::PoolTimedOut);
        assert_eq!(kind, DbErrorKind::Unreachable);
        assert_eq!(code.as_deref(), Some("POOL_TIMED_OUT"));
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let err = sqlx::Error::ColumnNotFound("email_verified_at".to_string());
        assert!(is_schema_error(&err));
        assert!(!is_schema_error(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn test_every_kind_has_a_hint() {
        for kind in [
            DbErrorKind::SchemaMissing,
            DbErrorKind::SchemaMismatch,
            DbErrorKind::Unreachable,
            DbErrorKind::AuthFailed,
            DbErrorKind::UniqueViolation,
            DbErrorKind::Other,
        ] {
            assert!(!hint(kind).is_empty());
        }
    }
}
