//! Error types for the circulation server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Numeric error codes carried in every error body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    NotFound = 1,
    BadRequest = 2,
    Duplicate = 3,
    Internal = 4,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::Duplicate => "duplicate",
            ErrorCode::Internal => "internal",
        }
    }
}

/// Main application error type
///
/// `NotFound` and `Duplicate` carry the entity name, `BadRequest` a short
/// message describing the rejected request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0} already exist")]
    Duplicate(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(entity: &str) -> Self {
        AppError::NotFound(entity.to_string())
    }

    pub fn bad_request(message: &str) -> Self {
        AppError::BadRequest(message.to_string())
    }

    pub fn duplicate(entity: &str) -> Self {
        AppError::Duplicate(entity.to_string())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::BadRequest(_) => ErrorCode::BadRequest,
            AppError::Duplicate(_) => ErrorCode::Duplicate,
            AppError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Duplicate(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Entity owning a constraint; constraint names start with their table name
fn constraint_entity(constraint: Option<&str>) -> String {
    let constraint = constraint.unwrap_or_default();
    let entity = [
        ("book_copies", "copy"),
        ("books", "book"),
        ("members", "member"),
        ("loans", "loan"),
        ("reservations", "reservation"),
    ]
    .iter()
    .find(|(table, _)| constraint.starts_with(table))
    .map(|(_, entity)| *entity)
    .unwrap_or("record");
    entity.to_string()
}

/// Entity referenced by a foreign-key constraint such as `loans_member_id_fkey`
fn referenced_entity(constraint: Option<&str>) -> String {
    let constraint = constraint.unwrap_or_default();
    let entity = if constraint.contains("member_id") {
        "member"
    } else if constraint.contains("copy_id") {
        "copy"
    } else if constraint.contains("book_id") {
        "book"
    } else {
        "record"
    };
    entity.to_string()
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::not_found("record"),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                tracing::warn!("Unique violation: {}", db_err.message());
                AppError::Duplicate(constraint_entity(db_err.constraint()))
            }
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                tracing::warn!("Foreign key violation: {}", db_err.message());
                AppError::NotFound(referenced_entity(db_err.constraint()))
            }
            _ => {
                tracing::error!("Database error: {:?}", err);
                AppError::Internal(err.to_string())
            }
        }
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let code = self.code();
        let body = Json(ErrorResponse {
            code: code as u32,
            error: code.as_str().to_string(),
            message,
        });

        (self.status_code(), body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
