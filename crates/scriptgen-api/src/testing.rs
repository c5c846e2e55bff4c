//! Test state wired to in-memory doubles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use scriptgen_models::{
    Audience, GenerationParams, Job, JobId, Language, ScriptId, ScriptLength, ScriptRecord,
    ScriptStatus, ScriptStyle,
};
use scriptgen_queue::{JobQueue, QueueConfig};
use scriptgen_store::{DocumentStore, MemoryStore};
use scriptgen_worker::{
    BackendError, ConnectionRegistry, GenerationBackend, ResponseFormat, ResultDelivery,
    RetryPolicy, StageExecutor,
};

use crate::config::{ApiConfig, StoreBackend};
use crate::state::AppState;

const SEGMENTS: &str = r#"[
  {"text": "Leaves catch light.", "imagePrompt": "a leaf in sunlight"},
  {"text": "Plants grow.", "imagePrompt": "a sprout growing tall"}
]"#;

/// Answers every prompt with the same two segments.
struct SplitBackend;

#[async_trait]
impl GenerationBackend for SplitBackend {
    async fn generate(&self, _prompt: &str, _format: ResponseFormat) -> Result<String, BackendError> {
        Ok(SEGMENTS.to_string())
    }

    fn name(&self) -> &str {
        "split-stub"
    }
}

/// State over a memory store; the broker URL points at a closed port.
pub fn memory_state() -> (AppState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let shared: Arc<dyn DocumentStore> = store.clone();

    let queue = JobQueue::new(QueueConfig {
        redis_url: "redis://127.0.0.1:1".to_string(),
        ..QueueConfig::default()
    })
    .unwrap();

    let config = ApiConfig {
        store_backend: StoreBackend::Memory,
        ..ApiConfig::default()
    };
    let delivery = ResultDelivery::new(
        Arc::new(ConnectionRegistry::new()),
        shared.clone(),
        RetryPolicy::none(),
    );
    let stages = StageExecutor::new(Arc::new(SplitBackend), shared.clone(), Duration::from_secs(5));

    let state = AppState::new(config, shared, Arc::new(queue), delivery, stages);
    (state, store)
}

pub async fn seed_job(store: &MemoryStore, job_id: &str) {
    let params = GenerationParams::new(
        "photosynthesis",
        Audience::Kids,
        ScriptStyle::Educational,
        ScriptLength::Short,
    );
    store
        .put_job(&Job::new(JobId::from(job_id), "u1", params))
        .await
        .unwrap();
}

pub async fn seed_script(store: &MemoryStore, script_id: &str, user_id: &str) {
    let now = Utc::now();
    store
        .put_script(&ScriptRecord {
            script_id: ScriptId::from(script_id),
            job_id: JobId::from("J1"),
            user_id: user_id.to_string(),
            topic: "photosynthesis".to_string(),
            audience: Audience::Kids,
            style: ScriptStyle::Educational,
            language: Language::English,
            title: "Sunlight Snacks".to_string(),
            description: String::new(),
            text: "Leaves catch light. Plants grow.".to_string(),
            status: ScriptStatus::Generated,
            error: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
}
