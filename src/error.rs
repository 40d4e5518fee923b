//! # Error Handling
//!
//! Error taxonomy for the ASR server and its mapping onto HTTP responses.
//!
//! ## Categories:
//! - **Initialization**: the inference engine could not be loaded. Nothing can be
//!   served until this is fixed; the next request retries the load.
//! - **Inference**: the backend raised while transcribing or detecting. The message
//!   is the backend's own message, unchanged.
//! - **InvalidRequest**: the client request is unusable (no audio file, unknown task,
//!   upload too large). Raised before any temporary file is created.
//! - **Internal / ConfigError**: everything else on the server side.
//!
//! ## Response shape:
//! Every error is rendered as JSON. `detail` keeps the body compatible with
//! whisper-asr-webservice clients, `error` carries the structured form:
//! ```json
//! {
//!   "detail": "No audio file provided",
//!   "error": {
//!     "type": "invalid_request",
//!     "message": "No audio file provided",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Failures surfaced by the transcription core and the HTTP layer.
#[derive(Debug)]
pub enum AppError {
    /// Model/engine failed to load (missing weights, unknown identifier, device error).
    Initialization(String),

    /// The backend raised during transcription or language detection.
    Inference(String),

    /// The request was rejected before any resource was created.
    InvalidRequest(String),

    /// Server-side failures outside the engine (I/O, task join errors).
    Internal(String),

    /// Configuration file or environment variable problems.
    ConfigError(String),
}

impl AppError {
    /// Machine-readable error type used in the JSON body.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Initialization(_) => "initialization_error",
            AppError::Inference(_) => "inference_error",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::Internal(_) => "internal_error",
            AppError::ConfigError(_) => "config_error",
        }
    }

    /// The bare message, without the category prefix used by `Display`.
    pub fn message(&self) -> &str {
        match self {
            AppError::Initialization(msg)
            | AppError::Inference(msg)
            | AppError::InvalidRequest(msg)
            | AppError::Internal(msg)
            | AppError::ConfigError(msg) => msg,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
            AppError::Inference(msg) => write!(f, "Inference error: {}", msg),
            AppError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// HTTP mapping:
/// - InvalidRequest → 400 (Bad Request)
/// - everything else → 500 (Internal Server Error)
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Initialization(_)
            | AppError::Inference(_)
            | AppError::Internal(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "detail": self.message(),
            "error": {
                "type": self.error_type(),
                "message": self.message(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Untyped failures reaching the HTTP boundary are server-side problems.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
