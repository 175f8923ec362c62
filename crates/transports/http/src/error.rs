//! HTTP transport error types

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use diagramd_core::ErrorKind;
use thiserror::Error;

/// Content type of every error body
pub const ERROR_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Error responses must never be cached
pub const ERROR_CACHE_CONTROL: &str = "no-cache, no-store";

/// HTTP transport error types
#[derive(Debug, Error)]
pub enum Error {
    /// Bind address could not be parsed
    #[error("Invalid bind address: {0}")]
    InvalidAddress(String),

    /// Listener could not be bound
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Server error
    #[error("Server error: {0}")]
    ServerError(String),
}

/// Result type for HTTP transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Maps conversion error kinds to response statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPolicy {
    /// Status for a renderer that rejected its input
    pub renderer_error: StatusCode,
}

impl StatusPolicy {
    pub fn new(renderer_error: StatusCode) -> Self {
        Self { renderer_error }
    }

    pub fn status_for(&self, kind: ErrorKind) -> StatusCode {
        match kind {
            ErrorKind::UnsupportedFormat | ErrorKind::DecodeError => StatusCode::BAD_REQUEST,
            ErrorKind::NonZeroExit => self.renderer_error,
            ErrorKind::LaunchFailure | ErrorKind::Timeout | ErrorKind::IoFailure => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self::new(StatusCode::BAD_REQUEST)
    }
}

/// Plain-text error response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Map a conversion failure by kind only
    pub fn from_conversion(error: diagramd_core::Error, policy: &StatusPolicy) -> Self {
        Self::new(policy.status_for(error.kind()), error.to_string())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, message = %self.message, "Request failed");
        } else {
            tracing::debug!(status = %self.status, message = %self.message, "Request rejected");
        }

        (
            self.status,
            [
                (header::CONTENT_TYPE, HeaderValue::from_static(ERROR_CONTENT_TYPE)),
                (header::CACHE_CONTROL, HeaderValue::from_static(ERROR_CACHE_CONTROL)),
            ],
            self.message,
        )
            .into_response()
    }
}
