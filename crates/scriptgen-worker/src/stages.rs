//! Pipeline stage executor.
//!
//! Runs the text and segmentation stages against the generation backend
//! and turns what comes back into persisted records. Foreseeable backend
//! trouble (errors, timeouts, empty or malformed output) becomes a failure
//! outcome with a stable code; only broken inputs and store faults are
//! returned as errors.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use scriptgen_models::{
    ErrorCode, ErrorDetail, GenerationParams, Job, ScriptId, ScriptRecord, ScriptStatus, Segment,
};
use scriptgen_store::{DocumentStore, StoreError};

use crate::backend::{BackendError, GenerationBackend, ResponseFormat};
use crate::metrics::record_stage_failure;
use crate::prompt::{script_prompt, split_prompt};

#[derive(Debug, Error)]
pub enum StageError {
    /// The caller broke the stage's input contract.
    #[error("stage contract violated: {0}")]
    Contract(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StageError {
    pub fn contract(msg: impl Into<String>) -> Self {
        Self::Contract(msg.into())
    }
}

/// Result of the text stage. The script record is always persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStageOutcome {
    pub script: ScriptRecord,
    pub failure: Option<ErrorDetail>,
}

impl TextStageOutcome {
    pub fn text(&self) -> &str {
        &self.script.text
    }

    pub fn status(&self) -> ScriptStatus {
        self.script.status
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Result of the segmentation stage.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentationOutcome {
    /// Segments ordered `0..N-1`, already persisted as the script's full set.
    Segments(Vec<Segment>),
    /// Nothing was persisted.
    Failed(ErrorDetail),
}

#[derive(Debug, Deserialize)]
struct ScriptDraft {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "text")]
    script: String,
}

#[derive(Debug, Deserialize)]
struct RawSegment {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "imagePrompt", alias = "image_prompt")]
    image_prompt: Option<String>,
}

/// Strip a surrounding markdown code fence, with or without a language tag.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`, `JSON`, ...) up to the first newline
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Decode a text-stage reply: a `{title, description, script}` object (the
/// body may also be named `text`), or freeform text when the reply is not
/// such an object.
fn parse_script(raw: &str) -> Result<ScriptDraft, ErrorDetail> {
    let body = strip_code_fences(raw);
    let draft = match serde_json::from_str::<ScriptDraft>(body) {
        Ok(draft) => draft,
        Err(_) => ScriptDraft {
            title: String::new(),
            description: String::new(),
            script: body.to_string(),
        },
    };
    if draft.script.trim().is_empty() {
        return Err(ErrorDetail::new(
            ErrorCode::EmptyOutput,
            "backend returned an empty script",
        ));
    }
    Ok(ScriptDraft {
        title: draft.title.trim().to_string(),
        description: draft.description.trim().to_string(),
        script: draft.script.trim().to_string(),
    })
}

/// Decode a segmentation reply into ordered segments.
pub fn parse_segments(script_id: &ScriptId, raw: &str) -> Result<Vec<Segment>, ErrorDetail> {
    let body = strip_code_fences(raw);
    let parsed: Vec<RawSegment> = serde_json::from_str(body).map_err(|e| {
        ErrorDetail::new(
            ErrorCode::MalformedOutput,
            format!("segmentation output is not a JSON array of segments: {}", e),
        )
    })?;

    if parsed.is_empty() {
        return Err(ErrorDetail::new(
            ErrorCode::EmptyOutput,
            "segmentation returned no segments",
        ));
    }

    parsed
        .into_iter()
        .enumerate()
        .map(|(idx, raw)| {
            let text = raw.text.as_deref().map(str::trim).unwrap_or_default();
            let prompt = raw.image_prompt.as_deref().map(str::trim).unwrap_or_default();
            if text.is_empty() || prompt.is_empty() {
                return Err(ErrorDetail::new(
                    ErrorCode::InvalidSegment,
                    format!("segment {} is missing its text or imagePrompt", idx),
                ));
            }
            Ok(Segment::new(script_id, idx as u32, text, prompt))
        })
        .collect()
}

/// Invokes the backend for one stage at a time.
#[derive(Clone)]
pub struct StageExecutor {
    backend: Arc<dyn GenerationBackend>,
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl StageExecutor {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        store: Arc<dyn DocumentStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            store,
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    async fn call_backend(&self, prompt: &str, format: ResponseFormat) -> Result<String, BackendError> {
        match tokio::time::timeout(self.timeout, self.backend.generate(prompt, format)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.timeout)),
        }
    }

    /// Generate the script text for `job` and persist a script record.
    ///
    /// On failure the record is still written, with status `failed` and the
    /// error, so a later result query never points at nothing.
    pub async fn run_text_stage(
        &self,
        job: &Job,
        params: &GenerationParams,
    ) -> Result<TextStageOutcome, StageError> {
        if job.job_id.is_blank() {
            return Err(StageError::contract("job id is required"));
        }
        if params.topic.trim().is_empty() {
            return Err(StageError::contract("topic is required"));
        }

        let prompt = script_prompt(params);
        let drafted = match self.call_backend(&prompt, ResponseFormat::Json).await {
            Ok(raw) => parse_script(&raw),
            Err(e) => Err(ErrorDetail::new(e.code(), e.to_string())),
        };

        let now = Utc::now();
        let mut script = ScriptRecord {
            script_id: ScriptId::new(),
            job_id: job.job_id.clone(),
            user_id: job.user_id.clone(),
            topic: params.topic.clone(),
            audience: params.audience,
            style: params.style,
            language: params.language,
            title: String::new(),
            description: String::new(),
            text: String::new(),
            status: ScriptStatus::Generated,
            error: None,
            created_at: now,
            updated_at: now,
        };

        let failure = match drafted {
            Ok(draft) => {
                script.title = draft.title;
                script.description = draft.description;
                script.text = draft.script;
                None
            }
            Err(detail) => {
                warn!(
                    job_id = %job.job_id,
                    code = detail.code.as_str(),
                    "Text stage failed: {}",
                    detail.message
                );
                record_stage_failure("text", detail.code.as_str());
                script.text = format!("Script generation failed: {}", detail.message);
                script.status = ScriptStatus::Failed;
                script.error = Some(detail.clone());
                Some(detail)
            }
        };

        self.store.put_script(&script).await?;
        debug!(job_id = %job.job_id, script_id = %script.script_id, "Script record written");

        Ok(TextStageOutcome { script, failure })
    }

    /// Split `text` into segments and replace the script's segment set.
    pub async fn run_segmentation_stage(
        &self,
        script_id: &ScriptId,
        text: &str,
    ) -> Result<SegmentationOutcome, StageError> {
        if text.trim().is_empty() {
            return Err(StageError::contract("cannot segment empty text"));
        }

        let parsed = match self
            .call_backend(&split_prompt(text), ResponseFormat::Json)
            .await
        {
            Ok(raw) => parse_segments(script_id, &raw),
            Err(e) => Err(ErrorDetail::new(e.code(), e.to_string())),
        };

        match parsed {
            Ok(segments) => {
                self.store.replace_segments(script_id, &segments).await?;
                debug!(script_id = %script_id, count = segments.len(), "Segments written");
                Ok(SegmentationOutcome::Segments(segments))
            }
            Err(detail) => {
                warn!(
                    script_id = %script_id,
                    code = detail.code.as_str(),
                    "Segmentation failed: {}",
                    detail.message
                );
                record_stage_failure("segmentation", detail.code.as_str());
                Ok(SegmentationOutcome::Failed(detail))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubBackend, SEGMENTS_JSON};
    use scriptgen_models::{Audience, JobId, ScriptLength, ScriptStyle};
    use scriptgen_store::MemoryStore;

    fn params() -> GenerationParams {
        GenerationParams::new(
            "photosynthesis",
            Audience::Kids,
            ScriptStyle::Educational,
            ScriptLength::Short,
        )
    }

    fn job() -> Job {
        Job::new(JobId::from("J1"), "u1", params())
    }

    fn executor(backend: StubBackend) -> (StageExecutor, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let executor = StageExecutor::new(Arc::new(backend), store.clone(), Duration::from_secs(60));
        (executor, store)
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("```\n{}\n```  "), "{}");
        assert_eq!(strip_code_fences("```json[2]```"), "[2]");
        assert_eq!(strip_code_fences("  plain  "), "plain");
    }

    #[test]
    fn test_parse_segments_validation() {
        let script = ScriptId::from("s1");
        let segments = parse_segments(&script, SEGMENTS_JSON).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[2].segment_id, "s1-2");

        let err = parse_segments(&script, "not json").unwrap_err();
        assert_eq!(err.code, ErrorCode::MalformedOutput);

        let err = parse_segments(&script, "[]").unwrap_err();
        assert_eq!(err.code, ErrorCode::EmptyOutput);

        let err = parse_segments(&script, r#"[{"text":"a","imagePrompt":"b"},{"text":"c"}]"#)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidSegment);
        assert!(err.message.contains("segment 1"));
    }

    #[tokio::test]
    async fn test_text_stage_persists_generated_script() {
        let (executor, store) = executor(StubBackend::scripted());

        let outcome = executor.run_text_stage(&job(), &params()).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.status(), ScriptStatus::Generated);
        assert_eq!(outcome.script.title, "Sunlight Snacks");
        assert!(outcome.text().starts_with("Plants catch sunlight"));

        let stored = store.get_script(&outcome.script.script_id).await.unwrap();
        assert_eq!(stored, Some(outcome.script));
    }

    #[tokio::test]
    async fn test_text_stage_accepts_freeform_reply() {
        let (executor, _) = executor(StubBackend::new(|_| Ok("Just a plain script.".into())));
        let outcome = executor.run_text_stage(&job(), &params()).await.unwrap();
        assert_eq!(outcome.text(), "Just a plain script.");
        assert!(outcome.script.title.is_empty());
    }

    #[test]
    fn test_parse_script_accepts_text_field() {
        let draft =
            parse_script(r#"{"title":"Leaves","description":"d","text":" Plants eat light. "}"#)
                .unwrap();
        assert_eq!(draft.title, "Leaves");
        assert_eq!(draft.description, "d");
        assert_eq!(draft.script, "Plants eat light.");
    }

    #[tokio::test]
    async fn test_text_stage_failure_writes_failed_record() {
        let (executor, store) = executor(StubBackend::failing(BackendError::Status {
            status: 503,
            body: "overloaded".into(),
        }));

        let outcome = executor.run_text_stage(&job(), &params()).await.unwrap();
        let failure = outcome.failure.clone().unwrap();
        assert_eq!(failure.code, ErrorCode::BackendUnavailable);
        assert_eq!(outcome.status(), ScriptStatus::Failed);
        assert!(outcome.text().starts_with("Script generation failed: "));

        let stored = store
            .get_script(&outcome.script.script_id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_failed());
        assert_eq!(stored.error, Some(failure));
    }

    #[tokio::test]
    async fn test_text_stage_empty_output() {
        let (executor, _) = executor(StubBackend::new(|_| Ok(r#"{"title":"x","script":"  "}"#.into())));
        let outcome = executor.run_text_stage(&job(), &params()).await.unwrap();
        assert_eq!(outcome.failure.unwrap().code, ErrorCode::EmptyOutput);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_timeout_is_a_stage_failure() {
        let backend = StubBackend::scripted().with_delay(Duration::from_secs(120));
        let (executor, _) = executor(backend);

        let outcome = executor.run_text_stage(&job(), &params()).await.unwrap();
        assert_eq!(outcome.failure.unwrap().code, ErrorCode::BackendTimeout);
    }

    #[tokio::test]
    async fn test_contract_violations_are_errors() {
        let (executor, _) = executor(StubBackend::scripted());
        let mut blank = params();
        blank.topic = " ".into();
        assert!(matches!(
            executor.run_text_stage(&job(), &blank).await,
            Err(StageError::Contract(_))
        ));
        assert!(matches!(
            executor.run_segmentation_stage(&ScriptId::from("s1"), "").await,
            Err(StageError::Contract(_))
        ));
    }

    #[tokio::test]
    async fn test_segmentation_is_deterministic_for_identical_input() {
        let (executor, store) = executor(StubBackend::scripted());
        let script_id = ScriptId::from("s1");

        let first = match executor.run_segmentation_stage(&script_id, "Plants eat light.").await.unwrap() {
            SegmentationOutcome::Segments(s) => s,
            other => panic!("unexpected {:?}", other),
        };
        let second = match executor.run_segmentation_stage(&script_id, "Plants eat light.").await.unwrap() {
            SegmentationOutcome::Segments(s) => s,
            other => panic!("unexpected {:?}", other),
        };

        let orders = |s: &[Segment]| s.iter().map(|x| x.order).collect::<Vec<_>>();
        assert_eq!(first.len(), second.len());
        assert_eq!(orders(&first), orders(&second));
        assert_eq!(orders(&store.list_segments(&script_id).await.unwrap()), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failed_segmentation_keeps_previous_set() {
        let store = Arc::new(MemoryStore::new());
        let script_id = ScriptId::from("s1");
        let good = StageExecutor::new(
            Arc::new(StubBackend::scripted()),
            store.clone(),
            Duration::from_secs(60),
        );
        good.run_segmentation_stage(&script_id, "text").await.unwrap();

        let bad = StageExecutor::new(
            Arc::new(StubBackend::new(|_| Ok(r#"[{"text":"only text"}]"#.into()))),
            store.clone(),
            Duration::from_secs(60),
        );
        let outcome = bad.run_segmentation_stage(&script_id, "text").await.unwrap();
        assert!(matches!(
            outcome,
            SegmentationOutcome::Failed(ref d) if d.code == ErrorCode::InvalidSegment
        ));
        assert_eq!(store.list_segments(&script_id).await.unwrap().len(), 3);
    }
}
