//! Per-job log context.
//!
//! Every line a job emits carries `job_id` and `operation`; completion and
//! failure lines also carry the elapsed time since the logger was created.

use std::time::Instant;

use tracing::{error, info, info_span, warn, Span};

use scriptgen_models::{JobId, JobStage};

#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    operation: &'static str,
    started: Instant,
}

impl JobLogger {
    /// `operation` names the kind of work, e.g. `script_generation` or `split`.
    pub fn new(job_id: &JobId, operation: &'static str) -> Self {
        Self {
            job_id: job_id.clone(),
            operation,
            started: Instant::now(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    /// Span that scopes the whole job, so library logs inherit the job id.
    pub fn create_span(&self) -> Span {
        info_span!("job", job_id = %self.job_id, operation = self.operation)
    }

    pub fn log_start(&self, detail: &str) {
        info!(job_id = %self.job_id, operation = self.operation, "Job started: {}", detail);
    }

    pub fn log_stage(&self, stage: JobStage) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            stage = stage.as_str(),
            elapsed_ms = self.elapsed_ms() as u64,
            "Entered stage {}", stage
        );
    }

    pub fn log_progress(&self, detail: &str) {
        info!(job_id = %self.job_id, operation = self.operation, "{}", detail);
    }

    pub fn log_warning(&self, detail: &str) {
        warn!(job_id = %self.job_id, operation = self.operation, "{}", detail);
    }

    pub fn log_error(&self, detail: &str) {
        error!(
            job_id = %self.job_id,
            operation = self.operation,
            elapsed_ms = self.elapsed_ms() as u64,
            "Job failed: {}", detail
        );
    }

    pub fn log_completion(&self, detail: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            elapsed_ms = self.elapsed_ms() as u64,
            "Job finished: {}", detail
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_keeps_job_context() {
        let logger = JobLogger::new(&JobId::from("J1"), "script_generation");
        assert_eq!(logger.job_id(), &JobId::from("J1"));
        assert_eq!(logger.operation(), "script_generation");
        assert!(logger.elapsed_ms() < 60_000);
    }
}
