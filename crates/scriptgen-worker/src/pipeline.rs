//! Per-message job pipeline.
//!
//! `received -> validated -> stage-executed -> fanned-out/delivered -> acked`,
//! with a `failed -> acked` escape. Validation and stage failures are
//! recorded and acknowledged; only infrastructure faults leave a message
//! pending for redelivery.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn, Instrument};

use scriptgen_models::{
    ErrorCode, ErrorDetail, Job, JobId, JobResult, JobStage, ScriptJobMessage, ScriptPayload,
    ValidatedJob,
};
use scriptgen_store::DocumentStore;

use crate::delivery::{DeliveryOutcome, ResultDelivery};
use crate::error::{WorkerError, WorkerResult};
use crate::fanout::{FanoutDispatcher, FanoutParams};
use crate::logging::JobLogger;
use crate::metrics::record_job;
use crate::stages::{SegmentationOutcome, StageError, StageExecutor};

/// What to do with the broker message once the pipeline returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Leave pending; the pending-claim sweep redelivers it.
    Retain,
}

/// How a processed message ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobReport {
    /// Payload missing or unreadable with no job id to record against.
    Dropped,
    /// Failed validation; a rejection was recorded.
    Rejected(JobId),
    /// The job had already finished; its stored result was sent again.
    Replayed(JobId),
    /// The pipeline ran to a terminal result.
    Finished {
        result: JobResult,
        delivery: DeliveryOutcome,
    },
}

/// Everything one job needs, shared across job tasks.
#[derive(Clone)]
pub struct JobPipeline {
    store: Arc<dyn DocumentStore>,
    stages: StageExecutor,
    fanout: FanoutDispatcher,
    delivery: ResultDelivery,
}

impl JobPipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        stages: StageExecutor,
        fanout: FanoutDispatcher,
        delivery: ResultDelivery,
    ) -> Self {
        Self {
            store,
            stages,
            fanout,
            delivery,
        }
    }

    pub fn delivery(&self) -> &ResultDelivery {
        &self.delivery
    }

    pub fn stages(&self) -> &StageExecutor {
        &self.stages
    }

    /// Process one broker payload and decide whether to ack it.
    pub async fn handle(&self, payload: Option<&str>) -> Disposition {
        match self.process(payload).await {
            Ok(report) => {
                debug!(?report, "Message processed");
                Disposition::Ack
            }
            Err(e) if e.is_infrastructure() => {
                warn!("Infrastructure fault, leaving message pending: {}", e);
                Disposition::Retain
            }
            Err(e) => {
                warn!("Message could not be processed, dropping: {}", e);
                Disposition::Ack
            }
        }
    }

    pub async fn process(&self, payload: Option<&str>) -> WorkerResult<JobReport> {
        let Some(payload) = payload else {
            warn!("Stream entry has no job payload");
            return Ok(JobReport::Dropped);
        };

        let message: ScriptJobMessage = match serde_json::from_str(payload) {
            Ok(message) => message,
            Err(e) => {
                let detail =
                    ErrorDetail::new(ErrorCode::ValidationFailed, format!("invalid JSON: {}", e));
                return match job_id_from_raw(payload) {
                    Some(job_id) => self.reject(job_id, String::new(), detail).await,
                    None => {
                        warn!("Unreadable job message without job_id: {}", e);
                        Ok(JobReport::Dropped)
                    }
                };
            }
        };

        match message.validate() {
            Ok(validated) => self.run(validated).await,
            Err(detail) => match message.job_id() {
                Some(job_id) => {
                    let user_id = message.user_id.clone().unwrap_or_default();
                    self.reject(job_id, user_id, detail).await
                }
                None => {
                    warn!("Rejected job message without job_id: {}", detail.message);
                    record_job("rejected", None);
                    Ok(JobReport::Dropped)
                }
            },
        }
    }

    async fn reject(
        &self,
        job_id: JobId,
        user_id: String,
        detail: ErrorDetail,
    ) -> WorkerResult<JobReport> {
        let logger = JobLogger::new(&job_id, "script_generation");
        logger.log_warning(&format!("rejected: {}", detail.message));

        if let Some(existing) = self.store.get_job(&job_id).await? {
            if existing.is_terminal() {
                return self.replay(existing).await;
            }
        }

        self.store
            .put_job(&Job::rejected(job_id.clone(), user_id, detail.clone()))
            .await?;
        let result = JobResult::rejected(job_id.clone(), detail);
        self.delivery.deliver(&job_id, &result).await?;
        record_job("rejected", None);
        Ok(JobReport::Rejected(job_id))
    }

    /// Resend the stored result of a job that already finished.
    async fn replay(&self, job: Job) -> WorkerResult<JobReport> {
        let job_id = job.job_id.clone();
        match job.result {
            Some(result) => {
                debug!(job_id = %job_id, "Job already finished, replaying stored result");
                self.delivery.deliver(&job_id, &result).await?;
            }
            None => {
                warn!(job_id = %job_id, stage = %job.stage, "Finished job has no stored result");
            }
        }
        record_job("replayed", None);
        Ok(JobReport::Replayed(job_id))
    }

    async fn run(&self, validated: ValidatedJob) -> WorkerResult<JobReport> {
        let ValidatedJob {
            job_id,
            user_id,
            params,
        } = validated;

        let logger = JobLogger::new(&job_id, "script_generation");
        let span = logger.create_span();

        async move {
            let mut job = Job::new(job_id.clone(), user_id, params);
            if let Some(existing) = self.store.get_job(&job_id).await? {
                if existing.is_terminal() {
                    return self.replay(existing).await;
                }
                // Queued is the record the API wrote on submit; anything later
                // is an interrupted attempt that starts over
                if existing.stage != JobStage::Queued {
                    logger.log_warning(&format!("restarting from stage {}", existing.stage));
                }
                job.created_at = existing.created_at;
            }

            let started = Instant::now();
            match self.execute(&logger, &job, started).await {
                Err(e) if !e.is_infrastructure() => {
                    self.fail_after_error(&logger, &job_id, e, started).await
                }
                outcome => outcome,
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        logger: &JobLogger,
        job: &Job,
        started: Instant,
    ) -> WorkerResult<JobReport> {
        let job_id = &job.job_id;
        let Some(params) = job.params.as_ref() else {
            return Err(WorkerError::job_failed("job has no generation parameters"));
        };

        logger.log_start(&format!("topic \"{}\"", params.topic));
        self.store.put_job(job).await?;

        self.advance(logger, job_id, JobStage::Generating).await?;
        let text = match self.stages.run_text_stage(job, params).await {
            Ok(outcome) => outcome,
            Err(StageError::Contract(msg)) => {
                return self.fail(logger, job_id, internal(msg), None, started).await;
            }
            Err(e) => return Err(e.into()),
        };
        self.store
            .attach_script(job_id, &text.script.script_id)
            .await?;

        if let Some(failure) = text.failure.clone() {
            let data = ScriptPayload::from_record(&text.script);
            return self.fail(logger, job_id, failure, Some(data), started).await;
        }

        self.advance(logger, job_id, JobStage::Segmenting).await?;
        let segments = match self
            .stages
            .run_segmentation_stage(&text.script.script_id, text.text())
            .await
        {
            Ok(SegmentationOutcome::Segments(segments)) => segments,
            Ok(SegmentationOutcome::Failed(detail)) => {
                let data = ScriptPayload::from_record(&text.script);
                return self.fail(logger, job_id, detail, Some(data), started).await;
            }
            Err(StageError::Contract(msg)) => {
                let data = ScriptPayload::from_record(&text.script);
                return self
                    .fail(logger, job_id, internal(msg), Some(data), started)
                    .await;
            }
            Err(e) => return Err(e.into()),
        };
        logger.log_progress(&format!("{} segments", segments.len()));

        let report = self
            .fanout
            .dispatch(job_id, &segments, &FanoutParams::from_params(params))
            .await;
        let summary = report.summary();
        if !report.is_complete() {
            logger.log_warning(&format!(
                "{} of {} downstream requests failed to publish",
                report.failed.len(),
                report.failed.len() + report.published.len()
            ));
        }
        self.store.attach_fanout(job_id, &summary).await?;
        self.advance(logger, job_id, JobStage::FannedOut).await?;

        let data = ScriptPayload::from_record(&text.script)
            .with_segments(segments.len() as u32)
            .with_fanout(summary);
        let result = JobResult::success(job_id.clone(), data);
        let delivery = self.delivery.deliver(job_id, &result).await?;

        record_job("delivered", Some(started.elapsed().as_secs_f64()));
        logger.log_completion(&format!("delivered={}", delivery.is_delivered()));
        Ok(JobReport::Finished { result, delivery })
    }

    async fn advance(&self, logger: &JobLogger, job_id: &JobId, stage: JobStage) -> WorkerResult<()> {
        self.store.update_stage(job_id, stage, None).await?;
        logger.log_stage(stage);
        Ok(())
    }

    /// Turn an error that redelivery would not cure into a failed result.
    ///
    /// If even that result cannot be stored, the job is still moved to
    /// `failed` and the original error is returned.
    async fn fail_after_error(
        &self,
        logger: &JobLogger,
        job_id: &JobId,
        error: WorkerError,
        started: Instant,
    ) -> WorkerResult<JobReport> {
        let detail = internal(error.to_string());
        match self.fail(logger, job_id, detail.clone(), None, started).await {
            Err(e) if !e.is_infrastructure() => {
                logger.log_warning(&format!("could not record failed result: {}", e));
                self.store
                    .update_stage(job_id, JobStage::Failed, Some(detail))
                    .await?;
                Err(error)
            }
            outcome => outcome,
        }
    }

    async fn fail(
        &self,
        logger: &JobLogger,
        job_id: &JobId,
        error: ErrorDetail,
        data: Option<ScriptPayload>,
        started: Instant,
    ) -> WorkerResult<JobReport> {
        logger.log_error(&format!("{}: {}", error.code, error.message));
        let result = JobResult::failure(job_id.clone(), error, data);
        let delivery = self.delivery.deliver(job_id, &result).await?;
        record_job("failed", Some(started.elapsed().as_secs_f64()));
        Ok(JobReport::Finished { result, delivery })
    }
}

fn internal(message: String) -> ErrorDetail {
    ErrorDetail::new(ErrorCode::Internal, message)
}

/// Best-effort job id from a payload that is not a valid job message.
fn job_id_from_raw(payload: &str) -> Option<JobId> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    value
        .get("job_id")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(JobId::from)
}
