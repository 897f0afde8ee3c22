//! Error handling for emgserver

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Device already streaming (resource conflict)
    #[error("Device busy: {0}")]
    DeviceBusy(String),

    /// Repetition outside the allowed sequence
    #[error("Incorrect repetition: {0}")]
    IncorrectRepetition(String),

    /// Movement does not match the active session
    #[error("Movement not allowed: {0}")]
    MovementMismatch(String),

    /// Frame inconsistent with current session/device state
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Classifier service failure
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// SQLx database error
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::DeviceBusy(msg) => (StatusCode::CONFLICT, "DEVICE_BUSY", msg.clone()),
            Error::IncorrectRepetition(msg) => {
                (StatusCode::BAD_REQUEST, "INCORRECT_REPETITION", msg.clone())
            }
            Error::MovementMismatch(msg) => {
                (StatusCode::BAD_REQUEST, "MOVEMENT_NOT_ALLOWED", msg.clone())
            }
            Error::ProtocolViolation(msg) => {
                (StatusCode::BAD_REQUEST, "PROTOCOL_VIOLATION", msg.clone())
            }
            Error::Classifier(msg) => (StatusCode::BAD_GATEWAY, "CLASSIFIER_ERROR", msg.clone()),
            Error::Database(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                msg.clone(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                msg.clone(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
            Error::Sqlx(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                e.to_string(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
