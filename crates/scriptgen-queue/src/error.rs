//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("Publish to {stream} failed: {message}")]
    PublishFailed { stream: String, message: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn enqueue_failed(msg: impl Into<String>) -> Self {
        Self::EnqueueFailed(msg.into())
    }

    pub fn publish_failed(stream: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::PublishFailed {
            stream: stream.into(),
            message: msg.into(),
        }
    }

    /// True when the broker itself could not be reached.
    pub fn is_connection(&self) -> bool {
        match self {
            QueueError::ConnectionFailed(_) => true,
            QueueError::Redis(e) => {
                e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() || e.is_timeout()
            }
            _ => false,
        }
    }
}
