//! Downstream publishing seam.

use async_trait::async_trait;

use scriptgen_models::DownstreamRequest;

use crate::error::QueueResult;
use crate::queue::JobQueue;

/// Publishes follow-on requests to the image and voice stages.
#[async_trait]
pub trait DownstreamPublisher: Send + Sync {
    /// Publish one request; returns the broker message id.
    async fn publish(&self, request: &DownstreamRequest) -> QueueResult<String>;
}

#[async_trait]
impl DownstreamPublisher for JobQueue {
    async fn publish(&self, request: &DownstreamRequest) -> QueueResult<String> {
        JobQueue::publish(self, request).await
    }
}
