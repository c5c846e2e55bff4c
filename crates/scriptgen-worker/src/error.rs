//! Worker error types.

use thiserror::Error;

use crate::delivery::DeliveryError;
use crate::stages::StageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Store error: {0}")]
    Store(#[from] scriptgen_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] scriptgen_queue::QueueError),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// The store or the broker could not be reached.
    ///
    /// Messages hit by these errors stay unacknowledged so the pending-claim
    /// sweep picks them up again.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            WorkerError::Store(e) => e.is_unavailable(),
            WorkerError::Queue(e) => e.is_connection(),
            WorkerError::Stage(StageError::Store(e)) => e.is_unavailable(),
            WorkerError::Delivery(DeliveryError::Store(e)) => e.is_unavailable(),
            _ => false,
        }
    }
}
