//! Reasoning service errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors that can occur while talking to a reasoning service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BackendError {
    /// API request failed with the given message
    ApiError {
        message: String,
        status_code: Option<u16>,
    },

    /// Authentication failed or credentials are invalid
    AuthenticationError { message: String },

    /// Request timed out after the specified duration (in seconds)
    TimeoutError { seconds: u64 },

    /// Rate limit exceeded, retry after the specified duration (in seconds)
    RateLimitError { retry_after: Option<u64> },

    /// Invalid or malformed response from the service
    InvalidResponse {
        message: String,
        raw_response: Option<String>,
    },

    /// Configuration error (unknown provider, missing model, etc.)
    ConfigurationError { message: String },

    /// Network-related error
    NetworkError { message: String },

    /// Generic error for other cases
    Other { message: String },
}

impl BackendError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::TimeoutError { .. }
            | BackendError::RateLimitError { .. }
            | BackendError::NetworkError { .. } => true,
            BackendError::ApiError {
                status_code: Some(code),
                ..
            } => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    /// Suggested wait before the next attempt, when the service gave one
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            BackendError::RateLimitError { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::ApiError {
                message,
                status_code,
            } => {
                if let Some(code) = status_code {
                    write!(f, "API error ({}): {}", code, message)
                } else {
                    write!(f, "API error: {}", message)
                }
            }
            BackendError::AuthenticationError { message } => {
                write!(f, "Authentication failed: {}", message)
            }
            BackendError::TimeoutError { seconds } => {
                write!(f, "Request timed out after {} seconds", seconds)
            }
            BackendError::RateLimitError { retry_after } => {
                if let Some(seconds) = retry_after {
                    write!(f, "Rate limit exceeded, retry after {} seconds", seconds)
                } else {
                    write!(f, "Rate limit exceeded")
                }
            }
            BackendError::InvalidResponse { message, .. } => {
                write!(f, "Invalid response from LLM: {}", message)
            }
            BackendError::ConfigurationError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            BackendError::NetworkError { message } => {
                write!(f, "Network error: {}", message)
            }
            BackendError::Other { message } => {
                write!(f, "Error: {}", message)
            }
        }
    }
}

impl std::error::Error for BackendError {}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        timeout = { BackendError::TimeoutError { seconds: 30 }, true },
        rate_limit = { BackendError::RateLimitError { retry_after: Some(2) }, true },
        network = { BackendError::NetworkError { message: "reset".into() }, true },
        server_error = { BackendError::ApiError { message: "boom".into(), status_code: Some(503) }, true },
        client_error = { BackendError::ApiError { message: "bad".into(), status_code: Some(400) }, false },
        auth = { BackendError::AuthenticationError { message: "key".into() }, false },
        invalid = { BackendError::InvalidResponse { message: "x".into(), raw_response: None }, false },
    )]
    fn test_transient_classification(error: BackendError, expected: bool) {
        assert_eq!(error.is_transient(), expected);
    }

    #[test]
    fn test_display() {
        let err = BackendError::RateLimitError {
            retry_after: Some(5),
        };
        assert_eq!(err.to_string(), "Rate limit exceeded, retry after 5 seconds");
    }
}
