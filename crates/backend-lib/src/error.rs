// crates/backend-lib/src/error.rs

//! Central error type + Axum integration.
use crate::registry::RegistryError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Join rejected: {0}")]
    Registry(#[from] RegistryError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Presence service is not running")]
    ActorUnavailable,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] axum::Error),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Registry(RegistryError::DuplicateConnection(_)) => StatusCode::CONFLICT,
            AppError::Registry(_) => StatusCode::BAD_REQUEST,
            AppError::ActorUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Registry(RegistryError::MissingName) => "JOIN_001",
            AppError::Registry(RegistryError::MissingSession) => "JOIN_002",
            AppError::Registry(RegistryError::DuplicateConnection(_)) => "JOIN_003",
            AppError::Config(_) => "CFG_001",
            AppError::ActorUnavailable => "SVC_001",
            AppError::Json(_) => "JSON_001",
            AppError::WebSocket(_) => "WS_001",
        }
    }

    /// Get a sanitized message suitable for production use
    pub fn sanitized_message(&self) -> String {
        match self {
            AppError::Registry(err) => err.to_string(),
            AppError::ActorUnavailable => "Service temporarily unavailable".to_string(),
            AppError::Json(_) => "Invalid request format".to_string(),
            AppError::Config(_) | AppError::WebSocket(_) => {
                "An internal server error occurred".to_string()
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        // Use detailed messages in development, sanitized in production
        let message = if cfg!(debug_assertions) {
            self.to_string()
        } else {
            self.sanitized_message()
        };

        let body = serde_json::json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for AppError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        AppError::ActorUnavailable
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for AppError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        AppError::ActorUnavailable
    }
}

impl From<figment::Error> for AppError {
    fn from(err: figment::Error) -> Self {
        AppError::Config(err.to_string())
    }
}
