//! Error taxonomy shared by the sandbox, dispatch and orchestration layers
//!
//! Component errors (`SandboxError`, `ToolError`, `PhaseError`, `BackendError`,
//! `ConfigError`) each map onto an [`ErrorKind`], which is what ends up in
//! tool responses, phase records and the persisted report.

use crate::config::ConfigError;
use crate::docker::ImagePullError;
use crate::llm::BackendError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a failure as it is reported to callers and persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Sandbox runtime unreachable
    SandboxUnavailable,
    /// Registry/network failure while ensuring an image
    ImagePullFailure,
    /// A tool exceeded its wall-clock bound
    ContainerTimeout,
    /// A tool exited with a non-zero status
    ToolExecutionFailure,
    /// Reasoning service error or timeout
    ExternalServiceFailure,
    /// Configuration could not be loaded or validated
    ConfigurationInvalid,
    /// Unknown tool, file or prerequisite output
    NotFound,
    /// Arguments did not match the declared schema
    InvalidArguments,
    /// Input that can never succeed (malformed data, no contracts)
    InvalidInput,
    /// Local filesystem failure
    Io,
    /// Cancelled by the session cancellation signal
    Cancelled,
    /// Anything else, including handler panics
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SandboxUnavailable => "SandboxUnavailable",
            ErrorKind::ImagePullFailure => "ImagePullFailure",
            ErrorKind::ContainerTimeout => "ContainerTimeout",
            ErrorKind::ToolExecutionFailure => "ToolExecutionFailure",
            ErrorKind::ExternalServiceFailure => "ExternalServiceFailure",
            ErrorKind::ConfigurationInvalid => "ConfigurationInvalid",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::InvalidArguments => "InvalidArguments",
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::Io => "Io",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal",
        }
    }

    /// Failures caused by the sandbox infrastructure rather than by the tool
    /// or its input.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            ErrorKind::SandboxUnavailable
                | ErrorKind::ImagePullFailure
                | ErrorKind::ContainerTimeout
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable `{kind, message}` pair carried by responses and records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Session-level errors surfaced to the CLI
///
/// Only `SandboxUnavailable` and `ConfigurationInvalid` abort a session; the
/// remaining variants exist for callers driving components directly.
#[derive(Debug, Error)]
pub enum ArgusError {
    #[error("Sandbox runtime unavailable: {0}")]
    SandboxUnavailable(String),

    #[error(transparent)]
    ImagePullFailure(#[from] ImagePullError),

    #[error("Container exceeded its {seconds}s timeout")]
    ContainerTimeout { seconds: u64 },

    #[error("Tool '{tool}' failed: {message}")]
    ToolExecutionFailure { tool: String, message: String },

    #[error("External service failure: {0}")]
    ExternalServiceFailure(#[from] BackendError),

    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(#[from] ConfigError),

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArgusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArgusError::SandboxUnavailable(_) => ErrorKind::SandboxUnavailable,
            ArgusError::ImagePullFailure(_) => ErrorKind::ImagePullFailure,
            ArgusError::ContainerTimeout { .. } => ErrorKind::ContainerTimeout,
            ArgusError::ToolExecutionFailure { .. } => ErrorKind::ToolExecutionFailure,
            ArgusError::ExternalServiceFailure(_) => ErrorKind::ExternalServiceFailure,
            ArgusError::ConfigurationInvalid(_) => ErrorKind::ConfigurationInvalid,
            ArgusError::Cancelled => ErrorKind::Cancelled,
            ArgusError::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether this error aborts the whole session rather than one phase
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SandboxUnavailable | ErrorKind::ConfigurationInvalid
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ContainerTimeout).unwrap();
        assert_eq!(json, "\"container_timeout\"");

        let back: ErrorKind = serde_json::from_str("\"not_found\"").unwrap();
        assert_eq!(back, ErrorKind::NotFound);
    }

    #[test]
    fn test_infrastructure_kinds() {
        assert!(ErrorKind::ContainerTimeout.is_infrastructure());
        assert!(ErrorKind::ImagePullFailure.is_infrastructure());
        assert!(!ErrorKind::ToolExecutionFailure.is_infrastructure());
        assert!(!ErrorKind::InvalidArguments.is_infrastructure());
    }

    #[test]
    fn test_only_sandbox_and_config_are_fatal() {
        assert!(ArgusError::SandboxUnavailable("down".into()).is_fatal());
        assert!(
            ArgusError::ConfigurationInvalid(ConfigError::ValidationFailed("x".into())).is_fatal()
        );
        assert!(!ArgusError::ContainerTimeout { seconds: 5 }.is_fatal());
        assert!(!ArgusError::ToolExecutionFailure {
            tool: "slither".into(),
            message: "exit 1".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_error_info_display() {
        let info = ErrorInfo::new(ErrorKind::NotFound, "Unknown tool: foo");
        assert_eq!(info.to_string(), "NotFound: Unknown tool: foo");
    }
}
