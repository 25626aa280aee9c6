//! # Error Handling
//!
//! Two layers of errors live in this service:
//!
//! - **`VoiceError`**: failures inside the voice core (codec, transport,
//!   microphone/speaker acquisition, lifecycle rules). Only connection-level
//!   and capability-level failures ever leave the core; per-frame and
//!   per-fragment failures are absorbed where they happen.
//! - **`AppError`**: the HTTP boundary. Every handler returns `AppResult<T>`,
//!   and `ResponseError` turns the error into a JSON body with a matching
//!   status code.
//!
//! ## Key Rust Concepts:
//! - **thiserror**: derives `Display` and `std::error::Error` for the core enum
//! - **From trait**: lets `?` convert core errors into HTTP errors automatically
//! - **ResponseError trait**: converts errors to HTTP responses

use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Errors raised by the voice session core.
///
/// ## Error Categories:
/// - **Decode**: an inbound fragment could not be turned into playable audio
///   (invalid base64 or half a sample). Always absorbed, never escalated.
/// - **Connection**: the remote endpoint refused the handshake or the stream
///   broke mid-session. Fatal to the session attempt.
/// - **Capability**: the microphone or the output device could not be
///   acquired. Fatal to the session attempt.
/// - **AlreadyActive**: `start()` was called while a session is live.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VoiceError {
    #[error("decode error: {0}")]
    Decode(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("audio device unavailable: {0}")]
    Capability(String),

    #[error("a voice session is already {0}")]
    AlreadyActive(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid voice configuration: {0}")]
    Config(String),
}

/// Custom error types for the HTTP layer.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
/// - **Conflict**: The request clashes with the live session (409 errors)
/// - **Upstream**: A remote collaborator failed (502 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ValidationError**: Data validation failed (400 errors)
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::BadRequest("Invalid JSON".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// A voice session is already connecting or active
    Conflict(String),

    /// Memory store or remote AI endpoint failed
    Upstream(String),

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
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

/// Converts `AppError` into an HTTP response.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "conflict",
///     "message": "a voice session is already active",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "upstream_error", msg.clone()),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.clone()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,           // Machine-readable error type
                "message": message,           // Human-readable error message
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

/// Maps core failures onto HTTP semantics.
///
/// `AlreadyActive` is the only one a client can cause by itself, so it becomes 409.
/// Session settings come from the stored configuration, so `Config` is a
/// server-side configuration error.
impl From<VoiceError> for AppError {
    fn from(err: VoiceError) -> Self {
        match err {
            VoiceError::AlreadyActive(_) => AppError::Conflict(err.to_string()),
            VoiceError::Config(_) => AppError::ConfigError(err.to_string()),
            VoiceError::Connection(_) | VoiceError::Protocol(_) => AppError::Upstream(err.to_string()),
            VoiceError::Capability(_) | VoiceError::Decode(_) => AppError::Internal(err.to_string()),
        }
    }
}

/// Convenience type alias for Results that use AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_error_messages() {
        assert_eq!(
            VoiceError::Capability("no microphone".into()).to_string(),
            "audio device unavailable: no microphone"
        );
        assert_eq!(VoiceError::AlreadyActive("active".into()).to_string(), "a voice session is already active");
    }

    #[test]
    fn test_already_active_maps_to_conflict() {
        let err: AppError = VoiceError::AlreadyActive("active".into()).into();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(err.error_response().status().as_u16(), 409);
    }

    #[test]
    fn test_unusable_session_settings_are_config_errors() {
        let err: AppError = VoiceError::Config("model must not be empty".into()).into();
        assert!(matches!(err, AppError::ConfigError(_)));
        assert_eq!(err.error_response().status().as_u16(), 500);
    }

    #[test]
    fn test_connection_failure_maps_to_bad_gateway() {
        let err: AppError = VoiceError::Connection("handshake refused".into()).into();
        assert_eq!(err.error_response().status().as_u16(), 502);
    }
}
