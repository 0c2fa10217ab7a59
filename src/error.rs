use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failure taxonomy shared by every operation. Each variant maps to a stable
/// machine-readable `code` plus a human-readable message; internal details
/// (SQL errors, row ids of other tenants) never reach the wire.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// The response batch does not cover every question of the survey.
    #[error("missing {} of {total} question(s): {missing:?}", .missing.len())]
    Incomplete { missing: Vec<i64>, total: usize },

    /// The batch references questions outside the session's survey.
    #[error("question(s) outside the survey: {0:?}")]
    InvalidReference(Vec<i64>),

    #[error("{0}")]
    InvalidValue(String),

    /// Bounded retry budget consumed (code generation).
    #[error("{0}")]
    Exhausted(String),

    /// Update with no fields to apply.
    #[error("{0}")]
    NoOp(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("too many requests, try again later")]
    RateLimited,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError::Internal(anyhow::anyhow!(msg.into()))
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Incomplete { .. }
            | ApiError::InvalidReference(_)
            | ApiError::InvalidValue(_)
            | ApiError::NoOp(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Exhausted(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Incomplete { .. } => "incomplete",
            ApiError::InvalidReference(_) => "invalid_reference",
            ApiError::InvalidValue(_) => "invalid_value",
            ApiError::Exhausted(_) => "exhausted",
            ApiError::NoOp(_) => "no_op",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::RateLimited => "rate_limited",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = ?self, "request failed");
        } else {
            tracing::warn!(code = self.code(), "{}", self);
        }
        // storage/internal detail stays in the logs, never on the wire
        let message = match &self {
            ApiError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        let mut body = json!({ "error": message, "code": self.code() });
        // Incomplete batches name the missing ids so the client can recover.
        if let ApiError::Incomplete { missing, total } = &self {
            body["preguntas_faltantes"] = json!(missing);
            body["total_preguntas"] = json!(total);
        }
        (status, Json(body)).into_response()
    }
}

/// True when the database rejected the statement on a UNIQUE constraint.
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|db| db.kind() == sqlx::error::ErrorKind::UniqueViolation)
        .unwrap_or(false)
}
