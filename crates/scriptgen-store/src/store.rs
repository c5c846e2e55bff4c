//! Document store abstraction.

use async_trait::async_trait;

use scriptgen_models::{
    ErrorDetail, FanoutSummary, Job, JobId, JobResult, JobStage, ScriptId, ScriptRecord,
    ScriptStatus, Segment,
};

use crate::error::{StoreError, StoreResult};

/// Keyed persistence for jobs, scripts and their segments.
///
/// Stage updates are checked against [`JobStage::can_transition_to`], so a
/// terminal job never moves again.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create or overwrite a job record.
    async fn put_job(&self, job: &Job) -> StoreResult<()>;

    async fn get_job(&self, job_id: &JobId) -> StoreResult<Option<Job>>;

    /// Move a job to `stage`, recording `error` when given.
    async fn update_stage(
        &self,
        job_id: &JobId,
        stage: JobStage,
        error: Option<ErrorDetail>,
    ) -> StoreResult<Job>;

    async fn attach_script(&self, job_id: &JobId, script_id: &ScriptId) -> StoreResult<()>;

    async fn attach_fanout(&self, job_id: &JobId, fanout: &FanoutSummary) -> StoreResult<()>;

    /// Persist the final result; the job stage follows the result status.
    async fn save_result(&self, result: &JobResult) -> StoreResult<()>;

    async fn put_script(&self, script: &ScriptRecord) -> StoreResult<()>;

    async fn get_script(&self, script_id: &ScriptId) -> StoreResult<Option<ScriptRecord>>;

    async fn list_scripts_by_user(&self, user_id: &str) -> StoreResult<Vec<ScriptRecord>>;

    async fn update_script_status(
        &self,
        script_id: &ScriptId,
        status: ScriptStatus,
    ) -> StoreResult<ScriptRecord>;

    /// Replace the script text; the script returns to `generated`.
    async fn update_script_text(&self, script_id: &ScriptId, text: &str)
        -> StoreResult<ScriptRecord>;

    /// Delete a script and its segments. Returns false if it did not exist.
    async fn delete_script(&self, script_id: &ScriptId) -> StoreResult<bool>;

    /// Replace every segment of a script with `segments`.
    ///
    /// Readers observe either the old set or the new set, never a mix.
    async fn replace_segments(&self, script_id: &ScriptId, segments: &[Segment])
        -> StoreResult<()>;

    /// Segments ordered by index.
    async fn list_segments(&self, script_id: &ScriptId) -> StoreResult<Vec<Segment>>;

    /// Cheap reachability probe for readiness checks.
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Segments must belong to `script_id` and be indexed `0..N-1` in order.
pub fn check_segment_order(script_id: &ScriptId, segments: &[Segment]) -> StoreResult<()> {
    for (expected, segment) in segments.iter().enumerate() {
        if &segment.script_id != script_id {
            return Err(StoreError::InvalidSegments(format!(
                "segment {} belongs to script {}",
                segment.segment_id, segment.script_id
            )));
        }
        if segment.order as usize != expected {
            return Err(StoreError::InvalidSegments(format!(
                "expected order {}, found {}",
                expected, segment.order
            )));
        }
    }
    Ok(())
}

/// Shared transition check for store implementations.
pub(crate) fn apply_stage(job: &mut Job, stage: JobStage) -> StoreResult<()> {
    if !job.stage.can_transition_to(stage) {
        return Err(StoreError::InvalidTransition {
            job_id: job.job_id.clone(),
            from: job.stage,
            to: stage,
        });
    }
    job.stage = stage;
    job.updated_at = chrono::Utc::now();
    Ok(())
}

/// Apply a result to its job record.
pub(crate) fn apply_result(job: &mut Job, result: &JobResult) -> StoreResult<()> {
    apply_stage(job, result.status)?;
    if result.error.is_some() {
        job.error = result.error.clone();
    }
    if let Some(data) = &result.data {
        job.script_id = Some(data.script_id.clone());
    }
    job.result = Some(result.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_order_must_be_dense() {
        let script = ScriptId::from("s1");
        let good = vec![
            Segment::new(&script, 0, "a", "pa"),
            Segment::new(&script, 1, "b", "pb"),
        ];
        assert!(check_segment_order(&script, &good).is_ok());

        let gap = vec![
            Segment::new(&script, 0, "a", "pa"),
            Segment::new(&script, 2, "c", "pc"),
        ];
        assert!(matches!(
            check_segment_order(&script, &gap),
            Err(StoreError::InvalidSegments(_))
        ));

        let foreign = vec![Segment::new(&ScriptId::from("s2"), 0, "a", "pa")];
        assert!(check_segment_order(&script, &foreign).is_err());
    }
}
