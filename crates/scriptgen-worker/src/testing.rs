//! Test doubles shared by the worker's unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use scriptgen_models::{
    DownstreamRequest, ErrorDetail, FanoutSummary, Job, JobId, JobResult, JobStage, ScriptId,
    ScriptRecord, ScriptStatus, Segment,
};
use scriptgen_queue::{DownstreamPublisher, QueueError, QueueResult};
use scriptgen_store::{DocumentStore, MemoryStore, StoreError, StoreResult};

use crate::backend::{BackendError, GenerationBackend, ResponseFormat};

pub const SCRIPT_JSON: &str = r#"{
  "title": "Sunlight Snacks",
  "description": "How plants make food from light",
  "script": "Plants catch sunlight with their leaves. They mix it with water and air. That makes sugar, their food. This is photosynthesis."
}"#;

pub const SEGMENTS_JSON: &str = r#"```json
[
  {"text": "Plants catch sunlight with their leaves.", "imagePrompt": "a green leaf glowing in warm sunlight"},
  {"text": "They mix it with water and air.", "imagePrompt": "roots drinking water under a sunny meadow"},
  {"text": "That makes sugar, their food. This is photosynthesis.", "imagePrompt": "a happy cartoon plant eating a sugar cube"}
]
```"#;

type Responder = Box<dyn Fn(&str) -> Result<String, BackendError> + Send + Sync>;

/// Backend answering from a closure, counting calls.
pub struct StubBackend {
    responder: Responder,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StubBackend {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Result<String, BackendError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Script JSON for text prompts, the fenced segment array for split prompts.
    pub fn scripted() -> Self {
        Self::new(|prompt| {
            if prompt.contains("imagePrompt") {
                Ok(SEGMENTS_JSON.to_string())
            } else {
                Ok(SCRIPT_JSON.to_string())
            }
        })
    }

    pub fn failing(error: BackendError) -> Self {
        Self::new(move |_| Err(error.clone()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationBackend for StubBackend {
    async fn generate(&self, prompt: &str, _format: ResponseFormat) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(prompt)
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// Publisher that records requests and fails the ones it is told to.
#[derive(Default)]
pub struct RecordingPublisher {
    fail: HashSet<String>,
    published: Mutex<Vec<DownstreamRequest>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail requests whose label (`image:1`, `voice`) is listed.
    pub fn failing_on(labels: &[&str]) -> Self {
        Self {
            fail: labels.iter().map(|l| l.to_string()).collect(),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn published(&self) -> Vec<DownstreamRequest> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl DownstreamPublisher for RecordingPublisher {
    async fn publish(&self, request: &DownstreamRequest) -> QueueResult<String> {
        let label = request.describe();
        if self.fail.contains(&label) {
            return Err(QueueError::publish_failed(request.kind().as_str(), "forced failure"));
        }
        let mut published = self.published.lock().unwrap();
        published.push(request.clone());
        Ok(format!("0-{}", published.len()))
    }
}

/// Store whose every call fails as if Firestore were down.
pub struct UnavailableStore;

fn down<T>() -> StoreResult<T> {
    Err(StoreError::ServerError(503, "unavailable".into()))
}

#[async_trait]
impl DocumentStore for UnavailableStore {
    async fn put_job(&self, _: &Job) -> StoreResult<()> {
        down()
    }
    async fn get_job(&self, _: &JobId) -> StoreResult<Option<Job>> {
        down()
    }
    async fn update_stage(
        &self,
        _: &JobId,
        _: JobStage,
        _: Option<ErrorDetail>,
    ) -> StoreResult<Job> {
        down()
    }
    async fn attach_script(&self, _: &JobId, _: &ScriptId) -> StoreResult<()> {
        down()
    }
    async fn attach_fanout(&self, _: &JobId, _: &FanoutSummary) -> StoreResult<()> {
        down()
    }
    async fn save_result(&self, _: &JobResult) -> StoreResult<()> {
        down()
    }
    async fn put_script(&self, _: &ScriptRecord) -> StoreResult<()> {
        down()
    }
    async fn get_script(&self, _: &ScriptId) -> StoreResult<Option<ScriptRecord>> {
        down()
    }
    async fn list_scripts_by_user(&self, _: &str) -> StoreResult<Vec<ScriptRecord>> {
        down()
    }
    async fn update_script_status(
        &self,
        _: &ScriptId,
        _: ScriptStatus,
    ) -> StoreResult<ScriptRecord> {
        down()
    }
    async fn update_script_text(&self, _: &ScriptId, _: &str) -> StoreResult<ScriptRecord> {
        down()
    }
    async fn delete_script(&self, _: &ScriptId) -> StoreResult<bool> {
        down()
    }
    async fn replace_segments(&self, _: &ScriptId, _: &[Segment]) -> StoreResult<()> {
        down()
    }
    async fn list_segments(&self, _: &ScriptId) -> StoreResult<Vec<Segment>> {
        down()
    }
}

/// In-memory store that rejects the named operations with a request error,
/// the way Firestore answers an invalid write.
pub struct RejectingStore {
    inner: MemoryStore,
    rejected: HashSet<&'static str>,
}

impl RejectingStore {
    pub fn new(rejected: &[&'static str]) -> Self {
        Self {
            inner: MemoryStore::new(),
            rejected: rejected.iter().copied().collect(),
        }
    }

    fn check(&self, operation: &'static str) -> StoreResult<()> {
        if self.rejected.contains(operation) {
            return Err(StoreError::request_failed(format!(
                "{}: 400 INVALID_ARGUMENT",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for RejectingStore {
    async fn put_job(&self, job: &Job) -> StoreResult<()> {
        self.check("put_job")?;
        self.inner.put_job(job).await
    }
    async fn get_job(&self, job_id: &JobId) -> StoreResult<Option<Job>> {
        self.inner.get_job(job_id).await
    }
    async fn update_stage(
        &self,
        job_id: &JobId,
        stage: JobStage,
        error: Option<ErrorDetail>,
    ) -> StoreResult<Job> {
        self.check("update_stage")?;
        self.inner.update_stage(job_id, stage, error).await
    }
    async fn attach_script(&self, job_id: &JobId, script_id: &ScriptId) -> StoreResult<()> {
        self.check("attach_script")?;
        self.inner.attach_script(job_id, script_id).await
    }
    async fn attach_fanout(&self, job_id: &JobId, fanout: &FanoutSummary) -> StoreResult<()> {
        self.check("attach_fanout")?;
        self.inner.attach_fanout(job_id, fanout).await
    }
    async fn save_result(&self, result: &JobResult) -> StoreResult<()> {
        self.check("save_result")?;
        self.inner.save_result(result).await
    }
    async fn put_script(&self, script: &ScriptRecord) -> StoreResult<()> {
        self.check("put_script")?;
        self.inner.put_script(script).await
    }
    async fn get_script(&self, script_id: &ScriptId) -> StoreResult<Option<ScriptRecord>> {
        self.inner.get_script(script_id).await
    }
    async fn list_scripts_by_user(&self, user_id: &str) -> StoreResult<Vec<ScriptRecord>> {
        self.inner.list_scripts_by_user(user_id).await
    }
    async fn update_script_status(
        &self,
        script_id: &ScriptId,
        status: ScriptStatus,
    ) -> StoreResult<ScriptRecord> {
        self.inner.update_script_status(script_id, status).await
    }
    async fn update_script_text(&self, script_id: &ScriptId, text: &str) -> StoreResult<ScriptRecord> {
        self.inner.update_script_text(script_id, text).await
    }
    async fn delete_script(&self, script_id: &ScriptId) -> StoreResult<bool> {
        self.inner.delete_script(script_id).await
    }
    async fn replace_segments(&self, script_id: &ScriptId, segments: &[Segment]) -> StoreResult<()> {
        self.check("replace_segments")?;
        self.inner.replace_segments(script_id, segments).await
    }
    async fn list_segments(&self, script_id: &ScriptId) -> StoreResult<Vec<Segment>> {
        self.inner.list_segments(script_id).await
    }
}
