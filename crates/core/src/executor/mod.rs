//! External renderer execution
//!
//! A renderer is run once per conversion: the source is written to its stdin,
//! the rendered bytes are read from stdout and diagnostics from stderr.
//! Execution is blocking; callers run it on a [`BlockingPool`](crate::pool::BlockingPool).

mod command;

pub use command::CommandExecutor;

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

/// Upper bound on diagnostic text carried by [`ExecutionError::NonZeroExit`]
pub const MAX_DIAGNOSTIC_BYTES: usize = 4096;

const TRUNCATION_MARKER: &str = "... (truncated)";

/// Everything needed to run one renderer invocation
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Executable, either a path or a bare name resolved through `PATH`
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Bytes fed to the process's stdin
    pub input: Bytes,
    /// Deadline for the whole invocation
    pub timeout: Duration,
}

/// Execution failures
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Executable missing or not startable
    #[error("failed to start {}: {source}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Process exceeded its deadline and was killed
    #[error("{} did not finish within {}ms", program.display(), timeout.as_millis())]
    Timeout { program: PathBuf, timeout: Duration },

    /// Process finished unsuccessfully
    #[error("renderer exited with {}: {diagnostic}", describe_code(*code))]
    NonZeroExit {
        /// `None` when terminated by a signal
        code: Option<i32>,
        diagnostic: String,
    },

    /// Pipe or wait failure
    #[error("process I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

/// Runs a renderer to completion
///
/// Implementations block the calling thread.
pub trait ProcessExecutor: Send + Sync {
    fn execute(&self, request: &ExecutionRequest) -> Result<Vec<u8>, ExecutionError>;
}

/// Build the diagnostic for a failed run
///
/// Prefers stderr, falls back to stdout, and caps the result at
/// [`MAX_DIAGNOSTIC_BYTES`] on a character boundary.
pub fn diagnostic_text(stderr: &[u8], stdout: &[u8]) -> String {
    let raw = if stderr.iter().all(u8::is_ascii_whitespace) {
        stdout
    } else {
        stderr
    };
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();

    if text.len() <= MAX_DIAGNOSTIC_BYTES {
        return text.to_string();
    }

    let mut end = MAX_DIAGNOSTIC_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &text[..end], TRUNCATION_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_prefers_stderr() {
        let text = diagnostic_text(b"Error: syntax error in line 1\n", b"partial output");
        assert_eq!(text, "Error: syntax error in line 1");
    }

    #[test]
    fn test_diagnostic_falls_back_to_stdout() {
        let text = diagnostic_text(b"  \n", b"ERROR\n1\nSyntax Error?\n");
        assert_eq!(text, "ERROR\n1\nSyntax Error?");
    }

    #[test]
    fn test_diagnostic_is_capped() {
        let long = vec![b'e'; MAX_DIAGNOSTIC_BYTES * 3];
        let text = diagnostic_text(&long, b"");
        assert!(text.ends_with(TRUNCATION_MARKER));
        assert_eq!(text.len(), MAX_DIAGNOSTIC_BYTES + TRUNCATION_MARKER.len());
    }

    #[test]
    fn test_diagnostic_cap_respects_char_boundaries() {
        // 3-byte characters never line up with the cap
        let long = "é€".repeat(MAX_DIAGNOSTIC_BYTES);
        let text = diagnostic_text(long.as_bytes(), b"");
        assert!(text.ends_with(TRUNCATION_MARKER));
        assert!(text.len() <= MAX_DIAGNOSTIC_BYTES + TRUNCATION_MARKER.len());
    }

    #[test]
    fn test_non_zero_exit_display() {
        let err = ExecutionError::NonZeroExit {
            code: Some(2),
            diagnostic: "bad input".to_string(),
        };
        assert_eq!(err.to_string(), "renderer exited with code 2: bad input");

        let killed = ExecutionError::NonZeroExit {
            code: None,
            diagnostic: String::new(),
        };
        assert!(killed.to_string().contains("a signal"));
    }
}
