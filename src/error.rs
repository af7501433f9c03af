//! Error handling for the footage cache engine

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera id not present in the registry
    #[error("Unknown camera: {0}")]
    UnknownCamera(i64),

    /// NVR could not be reached (network or auth failure)
    #[error("NVR unreachable: {0}")]
    NvrUnreachable(String),

    /// NVR responded but has no segment matching the request
    #[error("No footage found: {0}")]
    NoFootage(String),

    /// Segment transfer aborted or incomplete
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// Eviction could not free space (all entries referenced)
    #[error("Cache full: {0}")]
    CacheFull(String),

    /// Consumer disconnected mid-stream
    #[error("Client aborted")]
    ClientAborted,

    /// Local or NVR-side timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::UnknownCamera(id) => (
                StatusCode::NOT_FOUND,
                "UNKNOWN_CAMERA",
                format!("camera {} is not registered", id),
            ),
            Error::NvrUnreachable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SEGMENT_UNAVAILABLE",
                msg.clone(),
            ),
            Error::NoFootage(msg) => (StatusCode::NOT_FOUND, "NO_FOOTAGE", msg.clone()),
            Error::DownloadFailed(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SEGMENT_UNAVAILABLE",
                msg.clone(),
            ),
            Error::CacheFull(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SEGMENT_UNAVAILABLE",
                msg.clone(),
            ),
            Error::ClientAborted => (
                StatusCode::BAD_REQUEST,
                "CLIENT_ABORTED",
                "client disconnected".to_string(),
            ),
            Error::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", msg.clone()),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                msg.clone(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}

impl Error {
    /// Metric label used by the download error counter
    pub fn category(&self) -> &'static str {
        match self {
            Error::UnknownCamera(_) => "invalid_camera",
            Error::NoFootage(_) => "segment_not_found",
            Error::NvrUnreachable(_) | Error::DownloadFailed(_) | Error::Http(_) => "upstream",
            Error::ClientAborted => "client_abort",
            _ => "unknown",
        }
    }
}
