//! # Error Handling
//!
//! Two error types for the two halves of this crate:
//!
//! - **AppError**: errors surfaced by the relay's HTTP API, converted to
//!   JSON responses via actix's `ResponseError` trait.
//! - **PipelineError**: errors raised inside the client audio pipeline
//!   (capture, transport, playback). Device- and transport-level failures
//!   recover into a full teardown and are surfaced once; per-chunk decode
//!   failures are logged and dropped, never fatal.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Errors returned from the relay's HTTP handlers.
///
/// ## Error Categories:
/// - **Internal**: server-side problems (500)
/// - **BadRequest**: client sent invalid data (400)
/// - **NotFound**: requested resource doesn't exist (404)
/// - **ConfigError**: configuration problems (500)
/// - **ValidationError**: data validation failed (400)
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (negotiation failures, I/O, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

/// Converts an `AppError` into a JSON HTTP response.
///
/// ## HTTP Status Code Mapping:
/// - Internal/ConfigError → 500
/// - BadRequest/ValidationError → 400
/// - NotFound → 404
///
/// All errors share one response structure:
/// ```json
/// { "error": { "type": "...", "message": "...", "timestamp": "..." } }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Internal(format!("Provider request failed: {}", err))
    }
}

/// Type alias for Results that use the HTTP error type.
pub type AppResult<T> = Result<T, AppError>;

/// Errors raised by the client audio pipeline.
///
/// ## Propagation policy:
/// - `DeviceUnavailable`, `ConnectError`, `TransportClosed` trigger a full
///   teardown before they are surfaced, so no half-open device or socket
///   survives the failure.
/// - `AlreadyStarted` is a local re-entrancy guard, not fatal.
/// - `DecodeError` is per-chunk: logged, dropped, never halts the queue.
///
/// No variant triggers an automatic retry; reconnection is an explicit new
/// `connect()` initiated by the caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("already started")]
    AlreadyStarted,

    #[error("transport failed to open: {0}")]
    ConnectError(String),

    #[error("inbound chunk decode failed: {0}")]
    DecodeError(String),

    #[error("transport closed unexpectedly: {0}")]
    TransportClosed(String),

    #[error("audio playback error: {0}")]
    Playback(String),

    #[error("pipeline configuration error: {0}")]
    Config(String),
}

impl From<cpal::DevicesError> for PipelineError {
    fn from(err: cpal::DevicesError) -> Self {
        PipelineError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for PipelineError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        PipelineError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for PipelineError {
    fn from(err: cpal::BuildStreamError) -> Self {
        PipelineError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for PipelineError {
    fn from(err: cpal::PlayStreamError) -> Self {
        PipelineError::DeviceUnavailable(err.to_string())
    }
}

/// Type alias for Results inside the audio pipeline.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::ValidationError("sample_rate must be non-zero".to_string());
        assert_eq!(
            err.to_string(),
            "Validation error: sample_rate must be non-zero"
        );
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::ConnectError("connection refused".to_string());
        assert_eq!(
            err.to_string(),
            "transport failed to open: connection refused"
        );
        assert_eq!(PipelineError::AlreadyStarted.to_string(), "already started");
    }
}
