//! Push-channel (WebSocket) message types.
//!
//! Frames are JSON text tagged by `event`.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{JobId, JobResult};

/// Identifier of one live push-channel connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Server-to-client event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum WsMessageType {
    #[serde(rename = "registered")]
    Registered,
    #[serde(rename = "scriptResult")]
    ScriptResult,
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "error")]
    Error,
}

impl WsMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WsMessageType::Registered => "registered",
            WsMessageType::ScriptResult => "scriptResult",
            WsMessageType::Heartbeat => "heartbeat",
            WsMessageType::Error => "error",
        }
    }
}

/// Server-to-client message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "event")]
pub enum WsMessage {
    /// Registration accepted
    #[serde(rename = "registered")]
    Registered {
        status: String,
        #[serde(rename = "jobId")]
        job_id: JobId,
        #[serde(rename = "channelHandle")]
        channel: ChannelId,
        timestamp: DateTime<Utc>,
    },

    /// Job outcome
    #[serde(rename = "scriptResult")]
    ScriptResult(JobResult),

    /// Liveness probe, answered with `heartbeat_ack`
    #[serde(rename = "heartbeat")]
    Heartbeat { timestamp: DateTime<Utc> },

    /// Protocol or registration error
    #[serde(rename = "error")]
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl WsMessage {
    pub fn registered(job_id: JobId, channel: ChannelId) -> Self {
        WsMessage::Registered {
            status: "ok".to_string(),
            job_id,
            channel,
            timestamp: Utc::now(),
        }
    }

    pub fn heartbeat() -> Self {
        WsMessage::Heartbeat {
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        WsMessage::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn message_type(&self) -> WsMessageType {
        match self {
            WsMessage::Registered { .. } => WsMessageType::Registered,
            WsMessage::ScriptResult(_) => WsMessageType::ScriptResult,
            WsMessage::Heartbeat { .. } => WsMessageType::Heartbeat,
            WsMessage::Error { .. } => WsMessageType::Error,
        }
    }
}

/// Client-to-server message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "event")]
pub enum ClientMessage {
    #[serde(rename = "register")]
    Register {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },

    #[serde(rename = "unregister")]
    Unregister {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },

    #[serde(rename = "heartbeat_ack")]
    HeartbeatAck,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorCode, ErrorDetail};

    #[test]
    fn test_client_register_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"event":"register","jobId":"J1"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Register {
                job_id: JobId::from("J1")
            }
        );

        let ack: ClientMessage = serde_json::from_str(r#"{"event":"heartbeat_ack"}"#).unwrap();
        assert_eq!(ack, ClientMessage::HeartbeatAck);
    }

    #[test]
    fn test_script_result_frame_is_flat() {
        let result = JobResult::failure(
            JobId::from("J1"),
            ErrorDetail::new(ErrorCode::BackendTimeout, "timed out"),
            None,
        );
        let json = serde_json::to_value(WsMessage::ScriptResult(result)).unwrap();
        assert_eq!(json["event"], "scriptResult");
        assert_eq!(json["jobId"], "J1");
        assert_eq!(json["error"]["code"], "BACKEND_TIMEOUT");
    }

    #[test]
    fn test_registered_frame() {
        let msg = WsMessage::registered(JobId::from("J1"), ChannelId::from("c1"));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["event"], "registered");
        assert_eq!(json["channelHandle"], "c1");
        assert_eq!(msg.message_type().as_str(), "registered");
    }
}
