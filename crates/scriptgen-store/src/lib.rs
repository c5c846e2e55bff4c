//! Document store for the script generation backend.
//!
//! This crate provides:
//! - The `DocumentStore` trait used by the pipeline and the HTTP API
//! - A Firestore REST adapter (service account auth, token caching, retry,
//!   atomic commits for segment replacement)
//! - An in-memory adapter for local runs and tests

pub mod client;
pub mod error;
pub mod firestore;
pub mod memory;
pub mod metrics;
pub mod retry;
pub mod store;
pub mod token_cache;
pub mod types;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{StoreError, StoreResult};
pub use firestore::FirestoreStore;
pub use memory::MemoryStore;
pub use store::{check_segment_order, DocumentStore};
pub use types::{Document, ToFirestoreValue, Value};
