//! Generation backend seam.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use scriptgen_models::ErrorCode;

/// Shape the caller expects the backend to answer in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Unavailable(String),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend returned no text")]
    Empty,

    #[error("backend response could not be decoded: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Stable code reported in failed results.
    pub fn code(&self) -> ErrorCode {
        match self {
            BackendError::Unavailable(_) | BackendError::Status { .. } => {
                ErrorCode::BackendUnavailable
            }
            BackendError::Timeout(_) => ErrorCode::BackendTimeout,
            BackendError::Empty => ErrorCode::EmptyOutput,
            BackendError::InvalidResponse(_) => ErrorCode::MalformedOutput,
        }
    }
}

/// Generative-text backend: a prompt in, text out.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, prompt: &str, format: ResponseFormat) -> Result<String, BackendError>;

    /// Name used in logs and metrics.
    fn name(&self) -> &str {
        "backend"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            BackendError::Status {
                status: 503,
                body: String::new()
            }
            .code(),
            ErrorCode::BackendUnavailable
        );
        assert_eq!(
            BackendError::Timeout(Duration::from_secs(60)).code(),
            ErrorCode::BackendTimeout
        );
        assert_eq!(BackendError::Empty.code(), ErrorCode::EmptyOutput);
        assert_eq!(
            BackendError::InvalidResponse("eof".into()).code(),
            ErrorCode::MalformedOutput
        );
    }
}
