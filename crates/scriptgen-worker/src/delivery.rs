//! Result delivery.
//!
//! The result is written to the job record first, then pushed to whichever
//! channel is registered for the job. When nobody is listening the push is
//! retried on a fixed schedule and finally given up on; the client can
//! still fetch the stored result or receive it when it registers.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use scriptgen_models::{ChannelId, JobId, JobResult, MalformedResult, WsMessage};
use scriptgen_store::{DocumentStore, StoreError};

use crate::metrics::record_delivery;
use crate::registry::ConnectionRegistry;
use crate::retry::{RetryOutcome, RetryPolicy};

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Never retried.
    #[error(transparent)]
    MalformedResult(#[from] MalformedResult),

    #[error("failed to persist result: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { channel: ChannelId, attempts: u32 },
    /// No channel took the result before the policy ran out.
    Missed { attempts: u32 },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Persists and pushes job results.
#[derive(Clone)]
pub struct ResultDelivery {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn DocumentStore>,
    policy: RetryPolicy,
}

impl ResultDelivery {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn DocumentStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            store,
            policy,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Persist `result` on its job, then push it to the job's channel.
    pub async fn deliver(
        &self,
        job_id: &JobId,
        result: &JobResult,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        if &result.job_id != job_id {
            return Err(MalformedResult("job id does not match the result").into());
        }
        result.validate()?;

        self.store.save_result(result).await?;

        let outcome = self.push_with_retry(job_id, result).await;
        match &outcome {
            DeliveryOutcome::Delivered { channel, attempts } => {
                record_delivery("delivered");
                info!(job_id = %job_id, channel = %channel, attempts, "Result delivered");
            }
            DeliveryOutcome::Missed { attempts } => {
                record_delivery("missed");
                info!(job_id = %job_id, attempts, "No channel registered, result kept for later");
            }
        }
        Ok(outcome)
    }

    async fn push_with_retry(&self, job_id: &JobId, result: &JobResult) -> DeliveryOutcome {
        let registry = &self.registry;
        let outcome = self
            .policy
            .run("deliver_result", |attempt| async move {
                debug!(job_id = %job_id, attempt, "Pushing result");
                registry
                    .push(job_id, WsMessage::ScriptResult(result.clone()))
                    .await
            })
            .await;

        match outcome {
            RetryOutcome::Success { value, attempts } => DeliveryOutcome::Delivered {
                channel: value,
                attempts,
            },
            RetryOutcome::Exhausted { attempts, .. } => DeliveryOutcome::Missed { attempts },
        }
    }

    /// Push the stored result of a finished job once, e.g. right after a
    /// client registers late. Returns false when there is nothing to send
    /// or no channel took it.
    pub async fn push_stored(&self, job_id: &JobId) -> Result<bool, DeliveryError> {
        let Some(result) = self.store.get_job(job_id).await?.and_then(|job| job.result) else {
            return Ok(false);
        };
        let pushed = self
            .registry
            .push(job_id, WsMessage::ScriptResult(result))
            .await
            .is_ok();
        if pushed {
            record_delivery("replayed");
        }
        Ok(pushed)
    }
}
