//! # Error Handling
//!
//! [`AppError`] is the error type of the HTTP handlers. Every variant maps to
//! a status code and the JSON body used by the upload endpoint:
//!
//! ```json
//! { "success": false, "error": "Speech unrecognizable." }
//! ```
//!
//! Lower layers keep their own `thiserror` enums (`BackendError`,
//! `StreamError`, `WavError`, `UploadError`) and are converted here at the
//! handler boundary through the `From` impls below, so `?` works in handlers.

use crate::audio::upload::UploadError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    /// The request itself is unusable (missing field, wrong content type).
    BadRequest(String),

    /// The uploaded file is not a WAV container we can decode.
    MalformedUpload(String),

    /// The upload exceeds `upload.max_bytes`.
    PayloadTooLarge(usize),

    /// Recognition finished without usable speech.
    Unrecognizable,

    /// The speech backend failed.
    RecognitionFailed,

    /// Every session slot is taken.
    Busy,

    Internal(String),

    ConfigError(String),
}

impl AppError {
    /// Message sent to the client in the `error` field.
    pub fn client_message(&self) -> String {
        match self {
            AppError::BadRequest(msg) => msg.clone(),
            AppError::MalformedUpload(msg) => format!("Malformed audio upload: {}", msg),
            AppError::PayloadTooLarge(limit) => {
                format!("Audio upload exceeds the {} byte limit", limit)
            }
            AppError::Unrecognizable => crate::speech::recognition::UNRECOGNIZABLE_MESSAGE.to_string(),
            AppError::RecognitionFailed => {
                crate::speech::recognition::INTERNAL_FAILURE_MESSAGE.to_string()
            }
            AppError::Busy => "Too many concurrent speech sessions, try again later".to_string(),
            // Internal details stay in the logs.
            AppError::Internal(_) | AppError::ConfigError(_) => "Internal server error".to_string(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::MalformedUpload(msg) => write!(f, "Malformed upload: {}", msg),
            AppError::PayloadTooLarge(limit) => write!(f, "Payload larger than {} bytes", limit),
            AppError::Unrecognizable => write!(f, "Speech unrecognizable"),
            AppError::RecognitionFailed => write!(f, "Speech recognition failed"),
            AppError::Busy => write!(f, "Session limit reached"),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_)
            | AppError::MalformedUpload(_)
            | AppError::Unrecognizable
            | AppError::RecognitionFailed => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": self.client_message(),
        }))
    }
}

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

impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Invalid multipart body: {}", err))
    }
}

impl From<actix_web::error::BlockingError> for AppError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Storage(err) => AppError::Internal(format!("Upload storage failed: {}", err)),
            other => AppError::MalformedUpload(other.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
