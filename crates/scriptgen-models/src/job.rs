//! Job definitions and lifecycle stages.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{DownstreamKind, GenerationParams, JobResult, ScriptId};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the identifier is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Pipeline stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "kebab-case")]
pub enum JobStage {
    /// Consumed off the broker, nothing executed yet
    #[default]
    Queued,
    /// Script text is being generated
    Generating,
    /// Script is being split into segments
    Segmenting,
    /// Downstream image/voice requests have been published
    FannedOut,
    /// Result persisted (and pushed if a channel was bound)
    Delivered,
    /// Terminal failure, error detail is set
    Failed,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Queued => "queued",
            JobStage::Generating => "generating",
            JobStage::Segmenting => "segmenting",
            JobStage::FannedOut => "fanned-out",
            JobStage::Delivered => "delivered",
            JobStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Delivered | JobStage::Failed)
    }

    /// Whether moving from `self` to `next` respects stage ordering.
    ///
    /// Any non-terminal stage may fail. Terminal stages never move again,
    /// except that re-persisting the same terminal stage is allowed.
    pub fn can_transition_to(&self, next: JobStage) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        if next == JobStage::Failed {
            return true;
        }
        next.rank() > self.rank()
    }

    fn rank(&self) -> u8 {
        match self {
            JobStage::Queued => 0,
            JobStage::Generating => 1,
            JobStage::Segmenting => 2,
            JobStage::FannedOut => 3,
            JobStage::Delivered => 4,
            JobStage::Failed => 5,
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stable error codes surfaced in failed results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Inbound message was malformed or missing required parameters
    ValidationFailed,
    /// Backend request failed or returned a non-success status
    BackendUnavailable,
    /// Backend call exceeded its time budget
    BackendTimeout,
    /// Backend returned no usable text
    EmptyOutput,
    /// Backend output could not be decoded into the expected shape
    MalformedOutput,
    /// Decoded segment is missing its text or directive
    InvalidSegment,
    /// Unexpected internal failure
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::BackendUnavailable => "BACKEND_UNAVAILABLE",
            ErrorCode::BackendTimeout => "BACKEND_TIMEOUT",
            ErrorCode::EmptyOutput => "EMPTY_OUTPUT",
            ErrorCode::MalformedOutput => "MALFORMED_OUTPUT",
            ErrorCode::InvalidSegment => "INVALID_SEGMENT",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error detail attached to failed jobs, scripts and results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorDetail {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One downstream request that could not be published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FanoutFailure {
    pub kind: DownstreamKind,
    /// Short description of the request (e.g. `image:3`)
    pub request: String,
    pub error: String,
}

/// Fan-out outcome recorded on the job.
///
/// `published` and `failed` count the per-segment image requests; the single
/// aggregate voice request is reported by `voice_published`. `failures`
/// lists every request that did not make it, voice included.
///
/// Informational only: it never decides whether a job is delivered or failed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct FanoutSummary {
    pub published: u32,
    pub failed: u32,
    #[serde(default)]
    pub voice_published: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FanoutFailure>,
}

impl FanoutSummary {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A generation job tracked end-to-end.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub job_id: JobId,

    /// Submitter identity
    pub user_id: String,

    /// Generation parameters (absent when the inbound message was rejected)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<GenerationParams>,

    /// Current stage
    #[serde(default)]
    pub stage: JobStage,

    /// Error detail when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,

    /// Script record produced by the text stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_id: Option<ScriptId>,

    /// Persisted result, identical to the pushed payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,

    /// Fan-out metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fanout: Option<FanoutSummary>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a queued job from validated parameters.
    pub fn new(job_id: JobId, user_id: impl Into<String>, params: GenerationParams) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            user_id: user_id.into(),
            params: Some(params),
            stage: JobStage::Queued,
            error: None,
            script_id: None,
            result: None,
            fanout: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a placeholder record for a job whose message failed validation.
    pub fn rejected(job_id: JobId, user_id: impl Into<String>, error: ErrorDetail) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            user_id: user_id.into(),
            params: None,
            stage: JobStage::Failed,
            error: Some(error),
            script_id: None,
            result: None,
            fanout: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_serialization_is_kebab_case() {
        let json = serde_json::to_string(&JobStage::FannedOut).unwrap();
        assert_eq!(json, "\"fanned-out\"");
        assert_eq!(JobStage::FannedOut.as_str(), "fanned-out");
    }

    #[test]
    fn test_stage_transitions() {
        assert!(JobStage::Queued.can_transition_to(JobStage::Generating));
        assert!(JobStage::Generating.can_transition_to(JobStage::Failed));
        assert!(JobStage::Segmenting.can_transition_to(JobStage::Delivered));
        assert!(!JobStage::Segmenting.can_transition_to(JobStage::Generating));
        assert!(!JobStage::Delivered.can_transition_to(JobStage::Failed));
        assert!(!JobStage::Failed.can_transition_to(JobStage::Delivered));
        assert!(JobStage::Failed.can_transition_to(JobStage::Failed));
    }

    #[test]
    fn test_error_code_is_stable() {
        let json = serde_json::to_string(&ErrorCode::MalformedOutput).unwrap();
        assert_eq!(json, "\"MALFORMED_OUTPUT\"");
        assert_eq!(ErrorCode::BackendTimeout.to_string(), "BACKEND_TIMEOUT");
    }

    #[test]
    fn test_rejected_job_is_terminal() {
        let job = Job::rejected(
            JobId::from("J9"),
            "",
            ErrorDetail::new(ErrorCode::ValidationFailed, "missing topic"),
        );
        assert!(job.is_terminal());
        assert!(job.params.is_none());
    }
}
