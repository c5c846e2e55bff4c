//! Follow-on requests published to the image and voice stages.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Audience, JobId, Language, ScriptId, ScriptStyle};

/// Downstream stage a request is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DownstreamKind {
    Image,
    Voice,
}

impl DownstreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownstreamKind::Image => "image",
            DownstreamKind::Voice => "voice",
        }
    }
}

impl fmt::Display for DownstreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Target image size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    /// Portrait 9:16, the short-video format.
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
        }
    }
}

/// Context copied from the segment into each image request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ImageMetadata {
    pub text: String,
    pub audience: Audience,
    pub language: Language,
}

/// One image to render for one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageRequest {
    pub job_id: JobId,
    pub script_id: ScriptId,
    pub segment_id: String,
    pub prompt: String,
    pub style: ScriptStyle,
    pub resolution: Resolution,
    pub order: u32,
    pub metadata: ImageMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum VoiceGender {
    #[default]
    Female,
    Male,
    Neutral,
}

/// Voice synthesis settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VoiceParams {
    pub style: ScriptStyle,
    pub gender: VoiceGender,
    pub language: Language,
}

/// One narration request covering every segment of a script, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VoiceRequest {
    pub job_id: JobId,
    pub script_id: ScriptId,
    pub voice: VoiceParams,
    pub segments: Vec<String>,
}

/// A request bound for one downstream stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DownstreamRequest {
    Image(ImageRequest),
    Voice(VoiceRequest),
}

impl DownstreamRequest {
    pub fn kind(&self) -> DownstreamKind {
        match self {
            DownstreamRequest::Image(_) => DownstreamKind::Image,
            DownstreamRequest::Voice(_) => DownstreamKind::Voice,
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            DownstreamRequest::Image(req) => &req.job_id,
            DownstreamRequest::Voice(req) => &req.job_id,
        }
    }

    /// Short label used in logs and fan-out failure records, e.g. `image:2`.
    pub fn describe(&self) -> String {
        match self {
            DownstreamRequest::Image(req) => format!("image:{}", req.order),
            DownstreamRequest::Voice(_) => "voice".to_string(),
        }
    }

    /// Wire payload, without the enum tag.
    pub fn to_payload(&self) -> serde_json::Result<String> {
        match self {
            DownstreamRequest::Image(req) => serde_json::to_string(req),
            DownstreamRequest::Voice(req) => serde_json::to_string(req),
        }
    }
}
