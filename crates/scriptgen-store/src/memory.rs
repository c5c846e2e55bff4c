//! In-memory document store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use scriptgen_models::{
    ErrorDetail, FanoutSummary, Job, JobId, JobResult, JobStage, ScriptId, ScriptRecord,
    ScriptStatus, Segment,
};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_segments_replaced;
use crate::store::{apply_result, apply_stage, check_segment_order, DocumentStore};

#[derive(Default)]
struct Tables {
    jobs: HashMap<JobId, Job>,
    scripts: HashMap<ScriptId, ScriptRecord>,
    segments: HashMap<ScriptId, Vec<Segment>>,
}

/// Process-local store. Every operation runs under one lock, so multi-record
/// updates such as segment replacement are atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing_job(job_id: &JobId) -> StoreError {
    StoreError::not_found(format!("jobs/{}", job_id))
}

fn missing_script(script_id: &ScriptId) -> StoreError {
    StoreError::not_found(format!("scripts/{}", script_id))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn put_job(&self, job: &Job) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &JobId) -> StoreResult<Option<Job>> {
        Ok(self.tables.read().await.jobs.get(job_id).cloned())
    }

    async fn update_stage(
        &self,
        job_id: &JobId,
        stage: JobStage,
        error: Option<ErrorDetail>,
    ) -> StoreResult<Job> {
        let mut tables = self.tables.write().await;
        let job = tables.jobs.get_mut(job_id).ok_or_else(|| missing_job(job_id))?;
        apply_stage(job, stage)?;
        if error.is_some() {
            job.error = error;
        }
        Ok(job.clone())
    }

    async fn attach_script(&self, job_id: &JobId, script_id: &ScriptId) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let job = tables.jobs.get_mut(job_id).ok_or_else(|| missing_job(job_id))?;
        job.script_id = Some(script_id.clone());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn attach_fanout(&self, job_id: &JobId, fanout: &FanoutSummary) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let job = tables.jobs.get_mut(job_id).ok_or_else(|| missing_job(job_id))?;
        job.fanout = Some(fanout.clone());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn save_result(&self, result: &JobResult) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let job = tables
            .jobs
            .get_mut(&result.job_id)
            .ok_or_else(|| missing_job(&result.job_id))?;
        apply_result(job, result)
    }

    async fn put_script(&self, script: &ScriptRecord) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.scripts.insert(script.script_id.clone(), script.clone());
        Ok(())
    }

    async fn get_script(&self, script_id: &ScriptId) -> StoreResult<Option<ScriptRecord>> {
        Ok(self.tables.read().await.scripts.get(script_id).cloned())
    }

    async fn list_scripts_by_user(&self, user_id: &str) -> StoreResult<Vec<ScriptRecord>> {
        let tables = self.tables.read().await;
        let mut scripts: Vec<ScriptRecord> = tables
            .scripts
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        scripts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(scripts)
    }

    async fn update_script_status(
        &self,
        script_id: &ScriptId,
        status: ScriptStatus,
    ) -> StoreResult<ScriptRecord> {
        let mut tables = self.tables.write().await;
        let script = tables
            .scripts
            .get_mut(script_id)
            .ok_or_else(|| missing_script(script_id))?;
        script.status = status;
        script.updated_at = Utc::now();
        Ok(script.clone())
    }

    async fn update_script_text(
        &self,
        script_id: &ScriptId,
        text: &str,
    ) -> StoreResult<ScriptRecord> {
        let mut tables = self.tables.write().await;
        let script = tables
            .scripts
            .get_mut(script_id)
            .ok_or_else(|| missing_script(script_id))?;
        script.text = text.to_string();
        script.status = ScriptStatus::Generated;
        script.error = None;
        script.updated_at = Utc::now();
        Ok(script.clone())
    }

    async fn delete_script(&self, script_id: &ScriptId) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        tables.segments.remove(script_id);
        Ok(tables.scripts.remove(script_id).is_some())
    }

    async fn replace_segments(
        &self,
        script_id: &ScriptId,
        segments: &[Segment],
    ) -> StoreResult<()> {
        check_segment_order(script_id, segments)?;
        let mut tables = self.tables.write().await;
        let previous = tables
            .segments
            .insert(script_id.clone(), segments.to_vec())
            .map(|old| old.len())
            .unwrap_or(0);
        debug!(
            script_id = %script_id,
            previous,
            current = segments.len(),
            "Replaced segments"
        );
        record_segments_replaced("memory", segments.len());
        Ok(())
    }

    async fn list_segments(&self, script_id: &ScriptId) -> StoreResult<Vec<Segment>> {
        let tables = self.tables.read().await;
        let mut segments = tables.segments.get(script_id).cloned().unwrap_or_default();
        segments.sort_by_key(|s| s.order);
        Ok(segments)
    }
}
