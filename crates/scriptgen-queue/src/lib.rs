//! Redis Streams broker.
//!
//! This crate provides:
//! - The inbound job stream, read through a consumer group with manual ack
//! - Reclaiming of messages left pending by crashed consumers
//! - Publishing of image and voice requests to their downstream streams

pub mod error;
pub mod publisher;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use publisher::DownstreamPublisher;
pub use queue::{JobQueue, QueueConfig, StreamMessage};
