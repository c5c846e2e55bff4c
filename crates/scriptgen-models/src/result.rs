//! Job results, persisted on the job and pushed to the client.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ErrorDetail, FanoutSummary, JobId, JobStage, ScriptId, ScriptRecord, ScriptStatus};

pub const STATUS_CREATED: u16 = 201;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_FAILED: u16 = 500;

/// Reason a result cannot be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed result: {0}")]
pub struct MalformedResult(pub &'static str);

/// Script summary carried in a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScriptPayload {
    pub script_id: ScriptId,
    pub topic: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub script: String,
    pub status: ScriptStatus,
    #[serde(default)]
    pub segment_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fanout: Option<FanoutSummary>,
}

impl ScriptPayload {
    pub fn from_record(record: &ScriptRecord) -> Self {
        Self {
            script_id: record.script_id.clone(),
            topic: record.topic.clone(),
            title: record.title.clone(),
            description: record.description.clone(),
            script: record.text.clone(),
            status: record.status,
            segment_count: 0,
            fanout: None,
        }
    }

    pub fn with_segments(mut self, count: u32) -> Self {
        self.segment_count = count;
        self
    }

    pub fn with_fanout(mut self, fanout: FanoutSummary) -> Self {
        self.fanout = Some(fanout);
        self
    }
}

/// Final outcome of a job.
///
/// The same value is written to the job record and pushed over the channel,
/// so a client that registers late can fetch exactly what it missed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub job_id: JobId,
    pub status: JobStage,
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ScriptPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub timestamp: DateTime<Utc>,
}

impl JobResult {
    pub fn success(job_id: JobId, data: ScriptPayload) -> Self {
        Self {
            job_id,
            status: JobStage::Delivered,
            code: STATUS_CREATED,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Failed result. `data` carries the failed script record when one exists.
    pub fn failure(job_id: JobId, error: ErrorDetail, data: Option<ScriptPayload>) -> Self {
        Self {
            job_id,
            status: JobStage::Failed,
            code: STATUS_FAILED,
            data,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }

    /// Failed result for a message rejected before any stage ran.
    pub fn rejected(job_id: JobId, error: ErrorDetail) -> Self {
        Self {
            code: STATUS_BAD_REQUEST,
            ..Self::failure(job_id, error, None)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStage::Delivered
    }

    pub fn validate(&self) -> Result<(), MalformedResult> {
        if self.job_id.is_blank() {
            return Err(MalformedResult("empty job id"));
        }
        match self.status {
            JobStage::Delivered if self.data.is_none() => {
                Err(MalformedResult("success result without data"))
            }
            JobStage::Failed if self.error.is_none() => {
                Err(MalformedResult("failure result without error"))
            }
            JobStage::Delivered | JobStage::Failed => Ok(()),
            _ => Err(MalformedResult("result status is not terminal")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    fn payload() -> ScriptPayload {
        ScriptPayload {
            script_id: ScriptId::from("s1"),
            topic: "photosynthesis".into(),
            title: String::new(),
            description: String::new(),
            script: "Plants eat light.".into(),
            status: ScriptStatus::Generated,
            segment_count: 3,
            fanout: None,
        }
    }

    #[test]
    fn test_result_wire_shape() {
        let result = JobResult::success(JobId::from("J1"), payload());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["jobId"], "J1");
        assert_eq!(json["status"], "delivered");
        assert_eq!(json["code"], 201);
        assert_eq!(json["data"]["scriptId"], "s1");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_validate_rejects_malformed() {
        assert!(JobResult::success(JobId::from("J1"), payload()).validate().is_ok());

        let mut blank = JobResult::success(JobId::from(" "), payload());
        assert!(blank.validate().is_err());

        blank.job_id = JobId::from("J1");
        blank.data = None;
        assert_eq!(
            blank.validate(),
            Err(MalformedResult("success result without data"))
        );

        let mut failed = JobResult::failure(
            JobId::from("J1"),
            ErrorDetail::new(ErrorCode::EmptyOutput, "empty"),
            None,
        );
        assert!(failed.validate().is_ok());
        failed.error = None;
        assert!(failed.validate().is_err());
    }

    #[test]
    fn test_rejected_uses_bad_request_code() {
        let result = JobResult::rejected(
            JobId::from("J2"),
            ErrorDetail::new(ErrorCode::ValidationFailed, "missing topic"),
        );
        assert_eq!(result.code, STATUS_BAD_REQUEST);
        assert_eq!(result.status, JobStage::Failed);
    }
}
