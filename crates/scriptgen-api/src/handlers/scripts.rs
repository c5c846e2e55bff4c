//! Script handlers.
//!
//! Generation is asynchronous: `POST /generate` records the job, enqueues it
//! and returns the job id. The result arrives over `/ws` or can be fetched
//! from `GET /result/:job_id`. The remaining routes manage stored scripts and
//! their segments.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use scriptgen_models::{
    Audience, ErrorCode, ErrorDetail, FanoutSummary, GenerationParams, Job, JobId, JobResult,
    JobStage, Language, ScriptId, ScriptJobMessage, ScriptLength, ScriptRecord, ScriptStatus,
    ScriptStyle, Segment, SourceMaterial,
};
use scriptgen_worker::SegmentationOutcome;

use crate::error::{ApiError, ApiResult};
use crate::metrics::record_job_enqueued;
use crate::state::AppState;

// ============================================================================
// Types
// ============================================================================

/// Body of `POST /api/scripts/generate`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[validate(length(min = 1, max = 128, message = "userId is required"))]
    pub user_id: String,
    #[validate(length(min = 1, max = 500, message = "topic must be 1-500 characters"))]
    pub topic: String,
    pub audience: String,
    pub style: String,
    #[serde(default)]
    pub language: Option<String>,
    pub length: String,
    #[serde(default)]
    #[validate(length(max = 50, message = "at most 50 source documents"))]
    pub sources: Vec<SourceMaterial>,
}

impl GenerateRequest {
    fn into_params(self) -> ApiResult<(String, GenerationParams)> {
        let audience: Audience = self.audience.parse().map_err(bad_param)?;
        let style: ScriptStyle = self.style.parse().map_err(bad_param)?;
        let length: ScriptLength = self.length.parse().map_err(bad_param)?;
        let language: Language = match self.language.as_deref() {
            Some(lang) if !lang.trim().is_empty() => lang.parse().map_err(bad_param)?,
            _ => Language::default(),
        };

        let params = GenerationParams::new(self.topic.trim(), audience, style, length)
            .with_language(language)
            .with_sources(self.sources);
        params.validate()?;
        Ok((self.user_id, params))
    }
}

fn bad_param(e: impl std::fmt::Display) -> ApiError {
    ApiError::bad_request(e.to_string())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub job_id: JobId,
    pub status: JobStage,
}

/// Job status for clients that missed the pushed result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub stage: JobStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_id: Option<ScriptId>,
    /// Identical to the `scriptResult` frame pushed over `/ws`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fanout: Option<FanoutSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.job_id,
            stage: job.stage,
            script_id: job.script_id,
            result: job.result,
            error: job.error,
            fanout: job.fanout,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptResponse {
    pub script_id: ScriptId,
    pub job_id: JobId,
    pub user_id: String,
    pub topic: String,
    pub title: String,
    pub description: String,
    pub script: String,
    pub audience: Audience,
    pub style: ScriptStyle,
    pub language: Language,
    pub status: ScriptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ScriptRecord> for ScriptResponse {
    fn from(record: ScriptRecord) -> Self {
        Self {
            script_id: record.script_id,
            job_id: record.job_id,
            user_id: record.user_id,
            topic: record.topic,
            title: record.title,
            description: record.description,
            script: record.text,
            audience: record.audience,
            style: record.style,
            language: record.language,
            status: record.status,
            error: record.error,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateScriptRequest {
    pub script: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptStatusResponse {
    pub script_id: ScriptId,
    pub status: ScriptStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitResponse {
    pub script_id: ScriptId,
    pub segments: Vec<Segment>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/scripts/generate
///
/// Returns 202 with the job id. The job record is written before the
/// message is enqueued so the result route never races the worker.
pub async fn generate_script(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<(StatusCode, Json<GenerateResponse>)> {
    request.validate()?;
    let (user_id, params) = request.into_params()?;

    let job_id = JobId::new();
    state
        .store
        .put_job(&Job::new(job_id.clone(), user_id.clone(), params.clone()))
        .await?;

    let message = ScriptJobMessage::from_params(&job_id, &user_id, &params);
    if let Err(e) = state.queue.enqueue(&message).await {
        warn!(job_id = %job_id, "Failed to enqueue job: {}", e);
        let detail = ErrorDetail::new(ErrorCode::Internal, format!("enqueue failed: {}", e));
        if let Err(store_err) = state
            .store
            .update_stage(&job_id, JobStage::Failed, Some(detail))
            .await
        {
            warn!(job_id = %job_id, "Failed to mark job failed: {}", store_err);
        }
        return Err(e.into());
    }

    record_job_enqueued();
    info!(job_id = %job_id, user_id = %user_id, topic = %params.topic, "Script job enqueued");

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateResponse {
            job_id,
            status: JobStage::Queued,
        }),
    ))
}

/// GET /api/scripts/result/:job_id
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job_id = JobId::from_string(job_id);
    let job = state
        .store
        .get_job(&job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {}", job_id)))?;
    Ok(Json(job.into()))
}

/// GET /api/scripts/:script_id
pub async fn get_script(
    State(state): State<AppState>,
    Path(script_id): Path<String>,
) -> ApiResult<Json<ScriptResponse>> {
    let script = load_script(&state, &ScriptId::from_string(script_id)).await?;
    Ok(Json(script.into()))
}

/// GET /api/scripts/user/:user_id
pub async fn list_user_scripts(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<ScriptResponse>>> {
    let scripts = state.store.list_scripts_by_user(&user_id).await?;
    Ok(Json(scripts.into_iter().map(ScriptResponse::from).collect()))
}

/// PUT /api/scripts/:script_id
///
/// Replaces the text; the script goes back to `generated`.
pub async fn update_script(
    State(state): State<AppState>,
    Path(script_id): Path<String>,
    Json(request): Json<UpdateScriptRequest>,
) -> ApiResult<Json<ScriptStatusResponse>> {
    if request.script.trim().is_empty() {
        return Err(ApiError::bad_request("Missing required field: script"));
    }
    let script_id = ScriptId::from_string(script_id);
    let updated = state
        .store
        .update_script_text(&script_id, &request.script)
        .await?;

    Ok(Json(ScriptStatusResponse {
        script_id,
        status: updated.status,
        message: "Script updated".to_string(),
    }))
}

/// DELETE /api/scripts/:script_id
pub async fn delete_script(
    State(state): State<AppState>,
    Path(script_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let script_id = ScriptId::from_string(script_id);
    if !state.store.delete_script(&script_id).await? {
        return Err(ApiError::not_found(format!("script {}", script_id)));
    }
    info!(script_id = %script_id, "Script deleted");
    Ok(Json(serde_json::json!({ "message": "Script deleted" })))
}

/// POST /api/scripts/:script_id/finalize
pub async fn finalize_script(
    State(state): State<AppState>,
    Path(script_id): Path<String>,
) -> ApiResult<Json<ScriptStatusResponse>> {
    let script_id = ScriptId::from_string(script_id);
    let script = load_script(&state, &script_id).await?;
    if script.is_failed() {
        return Err(ApiError::bad_request("A failed script cannot be finalized"));
    }

    let updated = state
        .store
        .update_script_status(&script_id, ScriptStatus::Finalized)
        .await?;

    Ok(Json(ScriptStatusResponse {
        script_id,
        status: updated.status,
        message: "Script finalized".to_string(),
    }))
}

/// POST /api/scripts/:script_id/split
///
/// Re-runs segmentation synchronously and replaces the stored segments.
pub async fn split_script(
    State(state): State<AppState>,
    Path(script_id): Path<String>,
) -> ApiResult<Json<SplitResponse>> {
    let script_id = ScriptId::from_string(script_id);
    let script = load_script(&state, &script_id).await?;
    if script.is_failed() {
        return Err(ApiError::bad_request("A failed script cannot be split"));
    }

    match state
        .stages
        .run_segmentation_stage(&script_id, &script.text)
        .await?
    {
        SegmentationOutcome::Segments(segments) => {
            info!(script_id = %script_id, count = segments.len(), "Script split");
            Ok(Json(SplitResponse {
                script_id,
                segments,
            }))
        }
        SegmentationOutcome::Failed(detail) => Err(ApiError::Generation(detail.message)),
    }
}

/// GET /api/scripts/:script_id/split
pub async fn get_segments(
    State(state): State<AppState>,
    Path(script_id): Path<String>,
) -> ApiResult<Json<SplitResponse>> {
    let script_id = ScriptId::from_string(script_id);
    let segments = state.store.list_segments(&script_id).await?;
    Ok(Json(SplitResponse {
        script_id,
        segments,
    }))
}

async fn load_script(state: &AppState, script_id: &ScriptId) -> ApiResult<ScriptRecord> {
    state
        .store
        .get_script(script_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("script {}", script_id)))
}
