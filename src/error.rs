use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No capture device available: {0}")]
    NoDeviceAvailable(String),

    #[error("Capture error [{source_name}]: {reason}")]
    Capture { source_name: String, reason: String },

    #[error("Video device lost [{device}]: {reason}")]
    VideoDeviceLost { device: String, reason: String },

    #[error("Video error: {0}")]
    VideoError(String),

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Broadcaster unavailable: {0}")]
    BroadcasterUnavailable(String),

    #[error("Broadcaster request {request} failed (code: {code}): {reason}")]
    BroadcasterRequest {
        request: String,
        code: i64,
        reason: String,
    },

    #[error("Provisioning failed at {step}: {reason}")]
    Provision {
        step: String,
        reason: String,
        /// Whether the underlying failure was transient
        retryable: bool,
    },

    #[error("Live output failed to start after {attempts} attempts: {reason}")]
    StartFailed { attempts: u32, reason: String },

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transcode failed: {0}")]
    Transcode(String),

    #[error("Metadata store error: {0}")]
    Metadata(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

/// Live platform (YouTube Data API) failures, classified by HTTP status
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("{step}: malformed request (HTTP 400): {message}. Check resolution, frame rate and scheduled start time in the request")]
    BadRequest { step: String, message: String },

    #[error("{step}: access denied (HTTP 403): {message}. The access token needs the youtube.force-ssl scope and live streaming must be enabled on the channel")]
    Forbidden { step: String, message: String },

    #[error("{step}: access token rejected (HTTP 401): {message}. Refresh the access token")]
    Unauthorized { step: String, message: String },

    #[error("{step}: HTTP {status}: {message}")]
    Api {
        step: String,
        status: u16,
        message: String,
    },

    #[error("{step}: unexpected response: {message}")]
    UnexpectedResponse { step: String, message: String },

    #[error("bind failed after stream {stream_id} and broadcast {broadcast_id} were created: {reason}")]
    BindFailedAfterCreate {
        stream_id: String,
        broadcast_id: String,
        reason: String,
    },
}

impl AppError {
    /// Whether a control-plane caller may retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::BroadcasterUnavailable(_)
                | AppError::BroadcasterRequest { .. }
                | AppError::Provision {
                    retryable: true,
                    ..
                }
                | AppError::Timeout(_)
                | AppError::Http(_)
                | AppError::Io(_)
        )
    }

    /// Whether the error means the capture device disappeared
    pub fn is_device_lost(&self) -> bool {
        matches!(self, AppError::VideoDeviceLost { .. })
    }
}

/// Error response body (unified success format)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NoDeviceAvailable(_) | AppError::BroadcasterUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        tracing::error!(
            error_type = std::any::type_name_of_val(&self),
            error_message = %body.message,
            "Request failed"
        );

        (status, Json(body)).into_response()
    }
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::BroadcasterUnavailable("refused".into()).is_retryable());
        assert!(AppError::Timeout("GetStreamStatus".into()).is_retryable());
        assert!(!AppError::Config("missing key".into()).is_retryable());
        assert!(!AppError::Validation("empty file".into()).is_retryable());

        let provision = |retryable| AppError::Provision {
            step: "create scene".into(),
            reason: "x".into(),
            retryable,
        };
        assert!(provision(true).is_retryable());
        assert!(!provision(false).is_retryable());
    }

    #[test]
    fn test_platform_error_guidance() {
        let err = PlatformError::Forbidden {
            step: "liveBroadcasts.insert".into(),
            message: "insufficientPermissions".into(),
        };
        let text = AppError::from(err).to_string();
        assert!(text.contains("403"));
        assert!(text.contains("youtube.force-ssl"));
    }
}
