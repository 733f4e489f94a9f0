use crate::services::TokenError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run is not running: {0}")]
    RunNotRunning(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Token(#[from] TokenError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ActionNotFound(_) | AppError::RunNotFound(_) => StatusCode::NOT_FOUND,
            AppError::RunNotRunning(_) => StatusCode::CONFLICT,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Config(_) | AppError::Execution(_) | AppError::Io(_) | AppError::Token(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            AppError::ActionNotFound(id) => format!("Action '{}' not found", id),
            AppError::RunNotFound(id) => format!("Run '{}' not found", id),
            AppError::RunNotRunning(id) => format!("Run '{}' is not running", id),
            AppError::Unauthorized => "Missing or invalid bearer token".to_string(),
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                e.to_string()
            }
            AppError::Token(e) => {
                tracing::error!("Token store error: {}", e);
                e.to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "code": status.as_u16(),
            "message": message
        });

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
