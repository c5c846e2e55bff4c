//! Shared data models for the script generation backend.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, pipeline stages and stable error codes
//! - Inbound job messages and their validation
//! - Generation parameters (audience, style, language, length)
//! - Script and segment records
//! - Downstream image/voice requests published during fan-out
//! - Push-channel (WebSocket) message schemas

pub mod downstream;
pub mod job;
pub mod message;
pub mod params;
pub mod result;
pub mod script;
pub mod ws;

// Re-export common types
pub use downstream::{
    DownstreamKind, DownstreamRequest, ImageMetadata, ImageRequest, Resolution, VoiceGender,
    VoiceParams, VoiceRequest,
};
pub use job::{ErrorCode, ErrorDetail, FanoutFailure, FanoutSummary, Job, JobId, JobStage};
pub use message::{ScriptJobMessage, ValidatedJob};
pub use params::{
    Audience, GenerationParams, Language, ParamParseError, ScriptLength, ScriptStyle,
    SourceMaterial,
};
pub use result::{
    JobResult, MalformedResult, ScriptPayload, STATUS_BAD_REQUEST, STATUS_CREATED, STATUS_FAILED,
};
pub use script::{ScriptId, ScriptRecord, ScriptStatus, Segment};
pub use ws::{ChannelId, ClientMessage, WsMessage, WsMessageType};
