use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::api::response;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Failed to fetch data: {0}")]
    FetchError(String),

    #[error("LLM processing error: {0}")]
    LlmError(String),

    #[error("Error parsing content: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Extraction credential is not configured")]
    MissingCredential,

    #[error("Invalid media type: {0}")]
    InvalidMediaType(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Operation already running: {0}")]
    AlreadyRunning(String),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl AppError {
    /// Stable machine-readable code carried in the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::FetchError(_) => "fetch_error",
            AppError::LlmError(_) => "vendor_error",
            AppError::ParseError(_) => "parse_error",
            AppError::ConfigError(_) => "configuration_error",
            AppError::PersistenceError(_) => "persistence_error",
            AppError::MissingCredential => "missing_credential",
            AppError::InvalidMediaType(_) => "invalid_media_type",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::AlreadyRunning(_) => "already_running",
            AppError::TaskFailed(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::FetchError(_) => StatusCode::BAD_GATEWAY,
            AppError::LlmError(_) => StatusCode::BAD_GATEWAY,
            AppError::ParseError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::PersistenceError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::MissingCredential => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InvalidMediaType(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::AlreadyRunning(_) => StatusCode::CONFLICT,
            AppError::TaskFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::warn!(code = self.code(), error = %self, "request rejected");
        }

        response::error::<()>(status, self.code(), self.to_string()).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::FetchError(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::PersistenceError(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::PersistenceError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ParseError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::TaskFailed(err.to_string())
    }
}

impl From<std::env::VarError> for AppError {
    fn from(err: std::env::VarError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
