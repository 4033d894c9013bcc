use crate::api::models::uploads::ErrorResponse;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

const MEBIBYTE: u64 = 1024 * 1024;

#[derive(ThisError, Debug)]
pub enum Error {
    /// The request carried no `file` part with a filename
    #[error("No file uploaded.")]
    NoFileUploaded,

    /// Declared MIME type is not in the allowed set, or sniffed content contradicts it
    #[error("Invalid file type {declared:?}")]
    InvalidFileType { declared: String },

    /// File body is larger than the configured limit
    #[error("File size exceeds the {}MB limit.", format_megabytes(*limit_bytes))]
    FileTooLarge { limit_bytes: u64 },

    /// Storing the file failed after validation passed
    #[error("File upload failed: {reason}")]
    UploadFailed { reason: String },

    /// Upload capacity is exhausted
    #[error("{message}")]
    TooManyRequests { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

impl Error {
    /// Conventional HTTP status for this error.
    ///
    /// Uploads answer 200 on the wire unless `upload.error_status_codes` is enabled, in which case
    /// this status is used instead.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NoFileUploaded => StatusCode::BAD_REQUEST,
            Error::InvalidFileType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::UploadFailed { .. } | Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::NoFileUploaded => "No file uploaded.".to_string(),
            Error::InvalidFileType { .. } => "Invalid file type. Only JPEG, PNG, or GIF or jpg are allowed.".to_string(),
            Error::FileTooLarge { .. } => self.to_string(),
            Error::TooManyRequests { message } => message.clone(),
            Error::UploadFailed { .. } | Error::Internal { .. } => "File upload failed.".to_string(),
        }
    }
}

/// Render a byte limit the way it is phrased to clients: `5` for 5 MiB, `1.5` for 1.5 MiB.
fn format_megabytes(bytes: u64) -> String {
    if bytes % MEBIBYTE == 0 {
        (bytes / MEBIBYTE).to_string()
    } else {
        format!("{:.1}", bytes as f64 / MEBIBYTE as f64)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::UploadFailed { .. } | Error::Internal { .. } => {
                tracing::error!("Upload error: {:#}", self);
            }
            Error::TooManyRequests { .. } => {
                tracing::warn!("Upload rejected: {}", self);
            }
            Error::NoFileUploaded | Error::InvalidFileType { .. } | Error::FileTooLarge { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        // Callers branch on the `error` key, not the status line
        let body = ErrorResponse {
            error: self.user_message(),
        };
        (StatusCode::OK, Json(body)).into_response()
    }
}

/// Type alias for upload operation results
pub type Result<T> = std::result::Result<T, Error>;
