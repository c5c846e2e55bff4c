//! Script and segment records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{Audience, ErrorDetail, JobId, Language, ScriptStyle};

/// Unique identifier for a generated script.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ScriptId(pub String);

impl ScriptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ScriptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ScriptId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle of a script record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScriptStatus {
    #[default]
    Generated,
    Finalized,
    Failed,
}

impl ScriptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptStatus::Generated => "generated",
            ScriptStatus::Finalized => "finalized",
            ScriptStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ScriptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Generated script text plus the parameters it was produced from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScriptRecord {
    pub script_id: ScriptId,
    pub job_id: JobId,
    pub user_id: String,
    pub topic: String,
    pub audience: Audience,
    pub style: ScriptStyle,
    pub language: Language,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub text: String,
    pub status: ScriptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScriptRecord {
    pub fn is_failed(&self) -> bool {
        self.status == ScriptStatus::Failed
    }
}

/// One ordered span of a script with its visual directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Segment {
    pub segment_id: String,
    pub script_id: ScriptId,
    /// Zero-based, dense and unique within the script
    pub order: u32,
    pub text: String,
    pub image_prompt: String,
    pub created_at: DateTime<Utc>,
}

impl Segment {
    pub fn new(
        script_id: &ScriptId,
        order: u32,
        text: impl Into<String>,
        image_prompt: impl Into<String>,
    ) -> Self {
        Self {
            segment_id: Self::make_id(script_id, order),
            script_id: script_id.clone(),
            order,
            text: text.into(),
            image_prompt: image_prompt.into(),
            created_at: Utc::now(),
        }
    }

    /// Deterministic segment identifier, `{script_id}-{order}`.
    pub fn make_id(script_id: &ScriptId, order: u32) -> String {
        format!("{}-{}", script_id, order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_id_is_deterministic() {
        let script = ScriptId::from("abc");
        let seg = Segment::new(&script, 2, "text", "prompt");
        assert_eq!(seg.segment_id, "abc-2");
        assert_eq!(Segment::make_id(&script, 2), seg.segment_id);
    }

    #[test]
    fn test_script_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ScriptStatus::Finalized).unwrap(),
            "\"finalized\""
        );
    }
}
