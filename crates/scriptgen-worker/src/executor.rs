//! Queue consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use scriptgen_queue::{JobQueue, StreamMessage};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::pipeline::{Disposition, JobPipeline};

/// Pulls job messages off the stream and runs each one as its own task.
pub struct JobConsumer {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    pipeline: Arc<JobPipeline>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    /// Set by a job task that hit an infrastructure fault
    fault: Arc<AtomicBool>,
    consumer_name: String,
}

impl JobConsumer {
    pub fn new(config: WorkerConfig, queue: Arc<JobQueue>, pipeline: Arc<JobPipeline>) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("scriptgen-{}", Uuid::new_v4());

        Self {
            config,
            queue,
            pipeline,
            job_semaphore,
            shutdown,
            fault: Arc::new(AtomicBool::new(false)),
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Receiver that flips to `true` on shutdown.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Run until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting consumer '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        let mut shutdown_rx = self.shutdown.subscribe();

        // The broker may not be up yet
        loop {
            match self.queue.init().await {
                Ok(()) => break,
                Err(e) => {
                    error!("Failed to initialize queue: {}", e);
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                return Ok(());
                            }
                        }
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        let claim_task = self.spawn_claim_task();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping consumer");
                        break;
                    }
                }
                result = self.consume_batch() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::time::sleep(self.config.error_backoff).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!("Shutdown timeout reached with jobs still running");
        }

        info!("Consumer stopped");
        Ok(())
    }

    fn spawn_claim_task(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let pipeline = Arc::clone(&self.pipeline);
        let semaphore = Arc::clone(&self.job_semaphore);
        let fault = Arc::clone(&self.fault);
        let consumer_name = self.consumer_name.clone();
        let claim_interval = self.config.claim_interval;
        let min_idle = self.config.claim_min_idle;
        let batch = self.config.consume_batch;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match queue.claim_pending(&consumer_name, min_idle, batch).await {
                            Ok(messages) if !messages.is_empty() => {
                                info!("Claimed {} pending message(s)", messages.len());
                                for message in messages {
                                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                        break;
                                    };
                                    let pipeline = Arc::clone(&pipeline);
                                    let queue = Arc::clone(&queue);
                                    let fault = Arc::clone(&fault);
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute(pipeline, queue, fault, message).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Failed to claim pending messages: {}", e),
                        }
                    }
                }
            }
        })
    }

    /// Read up to as many messages as there are free job slots.
    async fn consume_batch(&self) -> WorkerResult<()> {
        if self.fault.swap(false, Ordering::SeqCst) {
            return Err(WorkerError::job_failed(
                "a job hit an infrastructure fault, backing off",
            ));
        }

        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let messages = self
            .queue
            .consume(
                &self.consumer_name,
                self.config.consume_block.as_millis() as u64,
                available.min(self.config.consume_batch),
            )
            .await?;

        if messages.is_empty() {
            return Ok(());
        }
        debug!("Consumed {} message(s)", messages.len());

        for message in messages {
            let permit = self
                .job_semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;
            let pipeline = Arc::clone(&self.pipeline);
            let queue = Arc::clone(&self.queue);
            let fault = Arc::clone(&self.fault);

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute(pipeline, queue, fault, message).await;
            });
        }

        Ok(())
    }

    /// Run one message through the pipeline and settle it on the broker.
    async fn execute(
        pipeline: Arc<JobPipeline>,
        queue: Arc<JobQueue>,
        fault: Arc<AtomicBool>,
        message: StreamMessage,
    ) {
        let message_id = message.message_id;
        match pipeline.handle(message.payload.as_deref()).await {
            Disposition::Ack => {
                if let Err(e) = queue.ack(&message_id).await {
                    error!("Failed to ack message {}: {}", message_id, e);
                    if e.is_connection() {
                        fault.store(true, Ordering::SeqCst);
                    }
                }
            }
            Disposition::Retain => {
                warn!("Message {} left pending for redelivery", message_id);
                fault.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        while self.job_semaphore.available_permits() < self.config.max_concurrent_jobs {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
