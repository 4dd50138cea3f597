use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type shared by the gateway and the service runtime.
///
/// Variants map onto the wire taxonomy: client errors (4xx) surface their
/// message directly, upstream and internal errors become opaque 5xx
/// responses with the message logged.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Serialization =====
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Storage =====
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Message bus =====
    #[error("bus error: {0}")]
    Bus(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    // ===== Resilience =====
    #[error("circuit breaker is open: {0}")]
    BreakerOpen(String),

    #[error("rate limit exceeded: {0}")]
    TooManyRequests(String),

    // ===== Client errors =====
    #[error("authentication error: {0}")]
    Auth(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    // ===== Process =====
    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal server error: {0}")]
    Internal(String),

    #[error("unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl AppError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::BreakerOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Bus(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Log with a level matching the error class
    pub fn log(&self) {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "server error");
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(error = %self, "authentication failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "client error");
        }
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        AppError::Auth(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn bus(msg: impl Into<String>) -> Self {
        AppError::Bus(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        AppError::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();
        // Server errors stay opaque to the client
        let message = if status.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, axum::Json(json!({ "error": message }))).into_response()
    }
}
