//! Store metrics.

use metrics::{counter, histogram};

pub mod names {
    /// Firestore REST calls by operation and HTTP status.
    pub const REQUESTS_TOTAL: &str = "scriptgen_store_requests_total";

    /// Firestore REST call latency in seconds.
    pub const LATENCY_SECONDS: &str = "scriptgen_store_latency_seconds";

    /// Retried Firestore calls by operation.
    pub const RETRIES_TOTAL: &str = "scriptgen_store_retries_total";

    /// Segments written by whole-set replacement.
    pub const SEGMENTS_REPLACED_TOTAL: &str = "scriptgen_store_segments_replaced_total";
}

pub fn record_request(operation: &str, status: u16, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(names::LATENCY_SECONDS, "operation" => operation.to_string())
        .record(latency_ms / 1000.0);
}

pub fn record_retry(operation: &str) {
    counter!(names::RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

pub fn record_segments_replaced(backend: &'static str, count: usize) {
    counter!(names::SEGMENTS_REPLACED_TOTAL, "backend" => backend).increment(count as u64);
}
