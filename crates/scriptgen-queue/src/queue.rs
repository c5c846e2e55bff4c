//! Job queue using Redis Streams.

use std::time::Duration;

use redis::AsyncCommands;
use tracing::{debug, info, warn};

use scriptgen_models::{DownstreamKind, DownstreamRequest, ScriptJobMessage};

use crate::error::{QueueError, QueueResult};

/// Field holding the JSON payload on every stream entry.
const PAYLOAD_FIELD: &str = "job";

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Inbound job stream
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Outbound stream for image requests
    pub image_stream: String,
    /// Outbound stream for voice requests
    pub voice_stream: String,
    /// Approximate cap on each outbound stream length
    pub downstream_maxlen: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "script_generate_queue".to_string(),
            consumer_group: "script_generators".to_string(),
            image_stream: "image_generate_queue".to_string(),
            voice_stream: "voice_generate_queue".to_string(),
            downstream_maxlen: 10_000,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            image_stream: std::env::var("QUEUE_IMAGE_STREAM").unwrap_or(defaults.image_stream),
            voice_stream: std::env::var("QUEUE_VOICE_STREAM").unwrap_or(defaults.voice_stream),
            downstream_maxlen: std::env::var("QUEUE_DOWNSTREAM_MAXLEN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.downstream_maxlen),
        }
    }

    pub fn stream_for(&self, kind: DownstreamKind) -> &str {
        match kind {
            DownstreamKind::Image => &self.image_stream,
            DownstreamKind::Voice => &self.voice_stream,
        }
    }
}

/// One entry read off the inbound stream.
///
/// The payload is kept raw so the consumer decides how to treat messages
/// that fail to parse. `None` means the entry had no payload field at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub message_id: String,
    pub payload: Option<String>,
}

impl StreamMessage {
    fn from_entry(entry: &redis::streams::StreamId) -> Self {
        let payload = match entry.map.get(PAYLOAD_FIELD) {
            Some(redis::Value::BulkString(bytes)) => {
                Some(String::from_utf8_lossy(bytes).into_owned())
            }
            Some(redis::Value::SimpleString(s)) => Some(s.clone()),
            _ => None,
        };
        Self {
            message_id: entry.id.clone(),
            payload,
        }
    }
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // "0" so messages enqueued before the first consumer started are not skipped
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Round-trip to the broker, used by readiness checks.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Enqueue a job message on the inbound stream.
    pub async fn enqueue(&self, message: &ScriptJobMessage) -> QueueResult<String> {
        if message.job_id().is_none() {
            return Err(QueueError::enqueue_failed("message has no job_id"));
        }
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(message)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        info!(
            job_id = message.job_id.as_deref().unwrap_or_default(),
            message_id = %message_id,
            "Enqueued script job"
        );
        Ok(message_id)
    }

    /// Publish one downstream request to its stream.
    pub async fn publish(&self, request: &DownstreamRequest) -> QueueResult<String> {
        let stream = self.config.stream_for(request.kind());
        let payload = request.to_payload()?;
        let mut conn = self.connection().await?;

        let message_id: String = redis::cmd("XADD")
            .arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.downstream_maxlen)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::publish_failed(stream, e.to_string()))?;

        debug!(
            job_id = %request.job_id(),
            request = %request.describe(),
            stream = stream,
            "Published downstream request"
        );
        Ok(message_id)
    }

    /// Acknowledge a message and drop it from the stream.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged message: {}", message_id);
        Ok(())
    }

    /// Inbound stream length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Read new messages for this consumer.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<StreamMessage>> {
        let mut conn = self.connection().await?;

        let result: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let messages: Vec<StreamMessage> = result
            .map(|reply| {
                reply
                    .keys
                    .iter()
                    .flat_map(|key| key.ids.iter().map(StreamMessage::from_entry))
                    .collect()
            })
            .unwrap_or_default();

        if !messages.is_empty() {
            debug!("Consumed {} message(s) from {}", messages.len(), self.config.stream_name);
        }
        Ok(messages)
    }

    /// Claim messages left pending by other consumers for at least `min_idle`.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<StreamMessage>> {
        let mut conn = self.connection().await?;

        let pending: redis::streams::StreamPendingReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .query_async(&mut conn)
            .await?;

        if pending.count() == 0 {
            return Ok(Vec::new());
        }

        let result: redis::streams::StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let messages: Vec<StreamMessage> =
            result.claimed.iter().map(StreamMessage::from_entry).collect();

        for message in &messages {
            info!("Claimed pending message {}", message.message_id);
        }
        if !result.deleted_ids.is_empty() {
            warn!(
                "{} pending message(s) were deleted before they could be claimed",
                result.deleted_ids.len()
            );
        }

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_stream_names() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_name, "script_generate_queue");
        assert_eq!(config.stream_for(DownstreamKind::Image), "image_generate_queue");
        assert_eq!(config.stream_for(DownstreamKind::Voice), "voice_generate_queue");
    }

    #[test]
    #[serial]
    fn test_config_from_env_overrides() {
        std::env::set_var("QUEUE_IMAGE_STREAM", "images_test");
        std::env::set_var("QUEUE_DOWNSTREAM_MAXLEN", "not-a-number");
        let config = QueueConfig::from_env();
        assert_eq!(config.image_stream, "images_test");
        assert_eq!(config.downstream_maxlen, 10_000);
        std::env::remove_var("QUEUE_IMAGE_STREAM");
        std::env::remove_var("QUEUE_DOWNSTREAM_MAXLEN");
    }

    #[test]
    fn test_stream_message_without_payload() {
        let entry = redis::streams::StreamId {
            id: "1-0".to_string(),
            map: Default::default(),
        };
        let message = StreamMessage::from_entry(&entry);
        assert_eq!(message.message_id, "1-0");
        assert!(message.payload.is_none());
    }
}
