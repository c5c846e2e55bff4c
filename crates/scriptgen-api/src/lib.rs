//! Axum HTTP/WebSocket API server.
//!
//! This crate provides:
//! - Script generation submission and script/segment management routes
//! - The `/ws` push channel that binds clients to jobs
//! - Health, readiness and Prometheus metrics endpoints

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod ws;

#[cfg(test)]
mod testing;

pub use config::{ApiConfig, StoreBackend};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
