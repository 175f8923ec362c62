//! Error types for the diagramd conversion pipeline
//!
//! Every failure is converted into one of these variants before it leaves a
//! [`DiagramService`](crate::service::DiagramService). Transports map
//! [`ErrorKind`] to a status and never inspect the message.

use std::time::Duration;

use thiserror::Error;

use crate::decode::DecodeError;
use crate::executor::ExecutionError;

/// Result type alias for diagramd core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while converting a diagram
#[derive(Debug, Error)]
pub enum Error {
    /// Requested output format is unknown or not supported by the service
    #[error("Unsupported output format: {token}. Must be one of {supported}")]
    UnsupportedFormat {
        /// Token as received from the client
        token: String,
        /// Human-readable list of the tokens the service accepts
        supported: String,
    },

    /// Encoded diagram source could not be decoded
    #[error("Unable to decode the source: {0}")]
    Decode(#[from] DecodeError),

    /// Renderer executable is missing or could not be started
    #[error("Renderer could not be started: {0}")]
    LaunchFailure(String),

    /// Renderer did not finish before its deadline
    #[error("Renderer timed out after {}ms", timeout.as_millis())]
    Timeout {
        /// Deadline the renderer exceeded
        timeout: Duration,
    },

    /// Renderer rejected the source
    #[error("{diagnostic}")]
    NonZeroExit {
        /// Exit code, `None` when the renderer was killed by a signal
        code: Option<i32>,
        /// Captured (and capped) diagnostic output
        diagnostic: String,
    },

    /// Pipe, process or worker I/O fault unrelated to the source content
    #[error("I/O error: {0}")]
    Io(String),
}

/// Coarse classification used by transports to pick a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedFormat,
    DecodeError,
    LaunchFailure,
    Timeout,
    NonZeroExit,
    IoFailure,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Error::Decode(_) => ErrorKind::DecodeError,
            Error::LaunchFailure(_) => ErrorKind::LaunchFailure,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::NonZeroExit { .. } => ErrorKind::NonZeroExit,
            Error::Io(_) => ErrorKind::IoFailure,
        }
    }

    /// Whether the failure is attributed to the request rather than the server
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::UnsupportedFormat | ErrorKind::DecodeError | ErrorKind::NonZeroExit
        )
    }
}

impl From<ExecutionError> for Error {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Launch { program, source } => {
                Error::LaunchFailure(format!("{}: {}", program.display(), source))
            }
            ExecutionError::Timeout { timeout, .. } => Error::Timeout { timeout },
            ExecutionError::NonZeroExit { code, diagnostic } => {
                Error::NonZeroExit { code, diagnostic }
            }
            ExecutionError::Io(e) => Error::Io(e.to_string()),
        }
    }
}
