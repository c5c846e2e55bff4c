//! Orchestrator metrics.

use metrics::{counter, gauge, histogram};

pub mod names {
    /// Jobs finished by outcome (`delivered`, `failed`, `rejected`, `replayed`).
    pub const JOBS_TOTAL: &str = "scriptgen_jobs_total";

    /// End-to-end pipeline duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "scriptgen_job_duration_seconds";

    /// Stage failures by stage and error code.
    pub const STAGE_FAILURES_TOTAL: &str = "scriptgen_stage_failures_total";

    /// Generation backend call latency in seconds.
    pub const BACKEND_LATENCY_SECONDS: &str = "scriptgen_backend_latency_seconds";

    /// Downstream publishes by kind and outcome.
    pub const FANOUT_PUBLISHES_TOTAL: &str = "scriptgen_fanout_publishes_total";

    /// Result deliveries by outcome (`delivered`, `missed`).
    pub const DELIVERIES_TOTAL: &str = "scriptgen_deliveries_total";

    /// Live job-to-channel bindings.
    pub const REGISTRY_BINDINGS: &str = "scriptgen_registry_bindings";

    /// Channels evicted by the liveness sweep or a failed send.
    pub const REGISTRY_EVICTIONS_TOTAL: &str = "scriptgen_registry_evictions_total";
}

pub fn record_job(outcome: &'static str, duration_secs: Option<f64>) {
    counter!(names::JOBS_TOTAL, "outcome" => outcome).increment(1);
    if let Some(secs) = duration_secs {
        histogram!(names::JOB_DURATION_SECONDS, "outcome" => outcome).record(secs);
    }
}

pub fn record_stage_failure(stage: &'static str, code: &'static str) {
    counter!(names::STAGE_FAILURES_TOTAL, "stage" => stage, "code" => code).increment(1);
}

pub fn record_backend_call(model: &str, latency_secs: f64) {
    histogram!(names::BACKEND_LATENCY_SECONDS, "model" => model.to_string()).record(latency_secs);
}

pub fn record_publish(kind: &'static str, success: bool) {
    let outcome = if success { "published" } else { "failed" };
    counter!(names::FANOUT_PUBLISHES_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn record_delivery(outcome: &'static str) {
    counter!(names::DELIVERIES_TOTAL, "outcome" => outcome).increment(1);
}

pub fn set_registry_bindings(count: usize) {
    gauge!(names::REGISTRY_BINDINGS).set(count as f64);
}

pub fn record_evictions(reason: &'static str, count: usize) {
    if count > 0 {
        counter!(names::REGISTRY_EVICTIONS_TOTAL, "reason" => reason).increment(count as u64);
    }
}
