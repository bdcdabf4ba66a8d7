use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::db::{classify, hint, DbErrorKind};

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// 400 with a machine-readable code the client can branch on.
    #[error("{code}: {message}")]
    BadRequest { code: &'static str, message: String },

    #[error("{code}: {message}")]
    Unauthorized { code: &'static str, message: String },

    #[error("{code}: {message}")]
    Forbidden { code: &'static str, message: String },

    /// 409 for a write that would take over a record owned by someone else.
    #[error("{code}: {message}")]
    Conflict { code: &'static str, message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A third-party API (PayPal, Dropbox, Drive, mail) failed or refused the request.
    #[error("{service} error (status {status}): {message}")]
    Upstream {
        service: &'static str,
        status: StatusCode,
        message: String,
    },

    #[error("Not configured: {0}")]
    NotConfigured(&'static str),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Unauthorized {
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        AppError::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Conflict {
            code,
            message: message.into(),
        }
    }

    /// Status code the error renders with.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Database(e) => match classify(e).0 {
                DbErrorKind::UniqueViolation => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Upstream { status, .. } => *status,
            AppError::NotConfigured(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut error = Map::new();

        let (code, message) = match &self {
            AppError::NotFound(msg) => ("NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => ("VALIDATION_ERROR", msg.clone()),
            AppError::BadRequest { code, message }
            | AppError::Unauthorized { code, message }
            | AppError::Forbidden { code, message }
            | AppError::Conflict { code, message } => (*code, message.clone()),
            AppError::Database(e) => {
                let (kind, db_code) = classify(e);
                tracing::error!("Database error ({kind:?}): {e}");
                error.insert("hint".to_string(), json!(hint(kind)));
                if let Some(db_code) = db_code {
                    error.insert("dbCode".to_string(), json!(db_code));
                }
                match kind {
                    DbErrorKind::UniqueViolation => ("CONFLICT", hint(kind).to_string()),
                    _ => ("DATABASE_ERROR", "A database error occurred".to_string()),
                }
            }
            AppError::Upstream {
                service, message, ..
            } => {
                tracing::error!("{service} error: {message}");
                ("UPSTREAM_ERROR", format!("{service}: {message}"))
            }
            AppError::NotConfigured(what) => {
                tracing::error!("Missing configuration: {what}");
                ("NOT_CONFIGURED", format!("{what} is not configured"))
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        error.insert("code".to_string(), json!(code));
        error.insert("message".to_string(), json!(message));

        let body = Json(json!({
            "success": false,
            "error": Value::Object(error),
        }));

        (status, body).into_response()
    }
}
