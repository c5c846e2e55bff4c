//! Application state.

use std::sync::Arc;

use scriptgen_queue::JobQueue;
use scriptgen_store::DocumentStore;
use scriptgen_worker::{ConnectionRegistry, ResultDelivery, StageExecutor};

use crate::config::ApiConfig;

/// Shared application state.
///
/// The registry and delivery are the same instances the consumer's job
/// tasks use, so a result pushed by a job reaches sockets served here.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn DocumentStore>,
    pub queue: Arc<JobQueue>,
    pub registry: Arc<ConnectionRegistry>,
    pub delivery: ResultDelivery,
    /// Used by the synchronous split route
    pub stages: StageExecutor,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn DocumentStore>,
        queue: Arc<JobQueue>,
        delivery: ResultDelivery,
        stages: StageExecutor,
    ) -> Self {
        Self {
            config,
            store,
            queue,
            registry: Arc::clone(delivery.registry()),
            delivery,
            stages,
        }
    }
}
