//! Per-job error taxonomy delivered to clients as structured failure payloads.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while handling a single request on a connection.
///
/// None of these terminate the listening process; they are serialized into
/// the `error` field of the reply frame.
#[derive(Debug, Error)]
pub enum JobError {
    /// No converter binary could be located, or the cached one vanished.
    #[error("Unable to find LibreOffice binary, make sure LibreOffice has been installed!")]
    BinaryNotFound,

    /// The input extension has no export filter.
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// The client-supplied filename cannot be used as a workspace entry.
    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    /// The uploaded content could not be decoded.
    #[error("Invalid content: {0}")]
    InvalidContent(String),

    /// The converter could not be spawned or failed without producing output.
    #[error("Conversion process failed: {0}")]
    ProcessExecution(String),

    /// The converter exceeded the configured deadline and was killed.
    #[error("Conversion timed out after {0:?}")]
    Timeout(Duration),

    /// The converter exited cleanly but the expected PDF is absent.
    #[error("Expected output file not created: {0}")]
    OutputMissing(String),

    /// Workspace allocation, input write, output read or cleanup failed.
    #[error("Workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl JobError {
    /// Stable machine-readable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            JobError::BinaryNotFound => "binary_not_found",
            JobError::UnsupportedFormat(_) => "unsupported_format",
            JobError::InvalidFilename(_) => "invalid_filename",
            JobError::InvalidContent(_) => "invalid_content",
            JobError::ProcessExecution(_) => "process_execution",
            JobError::Timeout(_) => "timeout",
            JobError::OutputMissing(_) => "output_missing",
            JobError::Workspace(_) => "workspace",
            JobError::UnknownCommand(_) => "unknown_command",
            JobError::InvalidRequest(_) => "invalid_request",
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Serialized form of a [`JobError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_body_carries_code_and_message() {
        let body = JobError::UnsupportedFormat("odt".to_string()).to_body();
        assert_eq!(
            body,
            ErrorBody {
                code: "unsupported_format",
                message: "Unsupported document format: odt".to_string(),
            }
        );
    }

    #[test]
    fn test_timeout_message_keeps_sub_second_precision() {
        let err = JobError::Timeout(Duration::from_millis(300));
        assert_eq!(err.code(), "timeout");
        assert_eq!(err.to_string(), "Conversion timed out after 300ms");
        assert_eq!(
            JobError::Timeout(Duration::from_secs(120)).to_string(),
            "Conversion timed out after 120s"
        );
    }

    #[test]
    fn test_io_error_maps_to_workspace() {
        let err: JobError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert_eq!(err.code(), "workspace");
    }
}
