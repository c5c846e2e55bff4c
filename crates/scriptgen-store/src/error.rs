//! Store error types.

use scriptgen_models::{JobId, JobStage};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("Rate limited, retry after {0}ms")]
    RateLimited(u64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStage,
        to: JobStage,
    },

    #[error("Invalid segment set: {0}")]
    InvalidSegments(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn auth_error(msg: impl Into<String>) -> Self {
        Self::AuthError(msg.into())
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    /// Map an HTTP status from the REST API to an error.
    pub fn from_http_status(status: u16, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match status {
            401 => Self::AuthError(msg),
            403 => Self::PermissionDenied(msg),
            404 => Self::NotFound(msg),
            409 => Self::AlreadyExists(msg),
            412 => Self::PreconditionFailed(msg),
            429 => Self::RateLimited(1000),
            500..=599 => Self::ServerError(status, msg),
            _ => Self::RequestFailed(msg),
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            StoreError::AuthError(_) => Some(401),
            StoreError::PermissionDenied(_) => Some(403),
            StoreError::NotFound(_) => Some(404),
            StoreError::AlreadyExists(_) => Some(409),
            StoreError::PreconditionFailed(_) => Some(412),
            StoreError::RateLimited(_) => Some(429),
            StoreError::ServerError(status, _) => Some(*status),
            StoreError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            StoreError::RateLimited(ms) => Some(*ms),
            _ => None,
        }
    }

    /// Transient failure worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Network(_) | StoreError::RateLimited(_) | StoreError::ServerError(..)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, StoreError::PreconditionFailed(_))
            || matches!(
                self,
                StoreError::RequestFailed(msg)
                if msg.contains("FAILED_PRECONDITION")
            )
    }

    /// The store could not be reached or did not answer usefully.
    ///
    /// Logical errors (missing documents, invalid transitions) are not
    /// infrastructure faults.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Network(_)
                | StoreError::RateLimited(_)
                | StoreError::ServerError(..)
                | StoreError::AuthError(_)
                | StoreError::PermissionDenied(_)
                | StoreError::InvalidResponse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_http_status() {
        assert!(matches!(
            StoreError::from_http_status(429, "slow down"),
            StoreError::RateLimited(_)
        ));
        assert!(matches!(
            StoreError::from_http_status(503, "unavailable"),
            StoreError::ServerError(503, _)
        ));
        assert!(matches!(
            StoreError::from_http_status(404, "missing"),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            StoreError::from_http_status(400, "bad"),
            StoreError::RequestFailed(_)
        ));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::from_http_status(500, "boom").is_retryable());
        assert!(StoreError::RateLimited(10).is_retryable());
        assert!(!StoreError::from_http_status(404, "missing").is_retryable());
        assert!(!StoreError::from_http_status(409, "exists").is_retryable());
    }

    #[test]
    fn test_http_status_round_trip() {
        assert_eq!(StoreError::from_http_status(502, "x").http_status(), Some(502));
        assert_eq!(StoreError::RateLimited(2000).retry_after_ms(), Some(2000));
        assert_eq!(StoreError::not_found("jobs/J1").http_status(), Some(404));
    }

    #[test]
    fn test_unavailable_excludes_logical_errors() {
        let transition = StoreError::InvalidTransition {
            job_id: JobId::from("J1"),
            from: JobStage::Delivered,
            to: JobStage::Failed,
        };
        assert!(!transition.is_unavailable());
        assert!(!StoreError::not_found("jobs/J1").is_unavailable());
        assert!(StoreError::from_http_status(503, "x").is_unavailable());
    }
}
