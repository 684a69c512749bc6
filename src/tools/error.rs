use crate::docker::{ImagePullError, SandboxError};
use crate::error::{ErrorInfo, ErrorKind};
use serde_json::Value;
use thiserror::Error;

/// Handler-level failure, folded into a response by the dispatcher
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    ImagePull(#[from] ImagePullError),

    #[error("Sandbox runtime unavailable: {0}")]
    SandboxUnavailable(String),

    /// The tool ran past its bound; `partial` holds what it printed so far
    #[error("Tool timed out after {seconds}s")]
    Timeout { seconds: u64, partial: Value },

    /// The tool ran and exited non-zero; `payload` holds its output
    #[error("Tool exited with status {}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".into()))]
    ExecutionFailed {
        exit_code: Option<i64>,
        payload: Value,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::InvalidArguments(_) => ErrorKind::InvalidArguments,
            ToolError::NotFound(_) => ErrorKind::NotFound,
            ToolError::ImagePull(_) => ErrorKind::ImagePullFailure,
            ToolError::SandboxUnavailable(_) => ErrorKind::SandboxUnavailable,
            ToolError::Timeout { .. } => ErrorKind::ContainerTimeout,
            ToolError::ExecutionFailed { .. } => ErrorKind::ToolExecutionFailure,
            ToolError::Io(_) => ErrorKind::Io,
            ToolError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Output the tool produced before failing, if any
    pub fn partial_payload(&self) -> Option<&Value> {
        match self {
            ToolError::Timeout { partial, .. } => Some(partial),
            ToolError::ExecutionFailed { payload, .. } => Some(payload),
            _ => None,
        }
    }

    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.kind(), self.to_string())
    }
}

impl From<SandboxError> for ToolError {
    fn from(e: SandboxError) -> Self {
        match e {
            SandboxError::Unavailable(msg) => ToolError::SandboxUnavailable(msg),
            SandboxError::InvalidSpec(msg) => ToolError::InvalidArguments(msg),
            SandboxError::Setup(msg) => ToolError::Other(format!("Sandbox setup failed: {}", msg)),
        }
    }
}
