//! Prometheus metrics for the worker.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the global recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn install_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_CLAIMED_TOTAL: &str = "cap_jobs_claimed_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "cap_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "cap_jobs_failed_total";
    pub const JOBS_INSUFFICIENT_CREDIT_TOTAL: &str = "cap_jobs_insufficient_credit_total";
    pub const UPLOADS_FAILED_TOTAL: &str = "cap_uploads_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "cap_job_duration_seconds";
    pub const STEP_DURATION_SECONDS: &str = "cap_step_duration_seconds";
}

pub fn record_job_claimed(job_type: &str) {
    counter!(names::JOBS_CLAIMED_TOTAL, "job_type" => job_type.to_string()).increment(1);
}

pub fn record_job_completed(job_type: &str, elapsed: Duration) {
    counter!(names::JOBS_COMPLETED_TOTAL, "job_type" => job_type.to_string()).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "job_type" => job_type.to_string())
        .record(elapsed.as_secs_f64());
}

/// Record a failed job, labelled by error kind.
pub fn record_job_failed(job_type: &str, kind: &str) {
    let labels = [
        ("job_type", job_type.to_string()),
        ("kind", kind.to_string()),
    ];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_insufficient_credit(job_type: &str) {
    counter!(names::JOBS_INSUFFICIENT_CREDIT_TOTAL, "job_type" => job_type.to_string())
        .increment(1);
}

pub fn record_upload_failed() {
    counter!(names::UPLOADS_FAILED_TOTAL).increment(1);
}

/// Record how long one pipeline step took, whether or not it succeeded.
pub fn record_step(step: &'static str, elapsed: Duration) {
    histogram!(names::STEP_DURATION_SECONDS, "step" => step).record(elapsed.as_secs_f64());
}
