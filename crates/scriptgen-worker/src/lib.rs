//! Script generation worker.
//!
//! This crate provides:
//! - Connection registry binding job ids to client channels, with heartbeats
//! - Two-stage generation pipeline (script text, then segments with image prompts)
//! - Fan-out of image and voice requests to downstream streams
//! - Result delivery with bounded retry and late-registration replay
//! - Queue consumer with bounded concurrency and graceful shutdown

pub mod backend;
pub mod config;
pub mod delivery;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod gemini;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod prompt;
pub mod registry;
pub mod retry;
pub mod stages;

#[cfg(test)]
mod testing;

pub use backend::{BackendError, GenerationBackend, ResponseFormat};
pub use config::WorkerConfig;
pub use delivery::{DeliveryError, DeliveryOutcome, ResultDelivery};
pub use error::{WorkerError, WorkerResult};
pub use executor::JobConsumer;
pub use fanout::{FanoutDispatcher, FanoutParams, FanoutReport};
pub use gemini::{GeminiClient, GeminiConfig};
pub use logging::JobLogger;
pub use pipeline::{Disposition, JobPipeline, JobReport};
pub use registry::{
    ChannelHandle, ConnectionRegistry, PushError, RegisterAck, RegistryError, SweepReport,
};
pub use retry::{RetryOutcome, RetryPolicy};
pub use stages::{SegmentationOutcome, StageError, StageExecutor, TextStageOutcome};
