//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory for downloaded audio and rendered transcripts
    pub work_dir: PathBuf,
    /// Sleep between polls when the queue is empty
    pub poll_interval: Duration,
    /// Sleep after a failed iteration of the run loop
    pub error_backoff: Duration,
    /// Deadline for fetching the source audio
    pub download_timeout: Duration,
    /// Deadline for the transcription request
    pub transcribe_timeout: Duration,
    /// Deadline for the caption upload
    pub upload_timeout: Duration,
    /// Deadline for listing a channel's videos
    pub list_timeout: Duration,
    /// Tries at recording a finished job before it is moved to ERROR instead
    pub finalize_attempts: u32,
    /// Prometheus listener; disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/workflow/video"),
            poll_interval: Duration::from_secs(6),
            error_backoff: Duration::from_secs(5),
            download_timeout: Duration::from_secs(600),
            transcribe_timeout: Duration::from_secs(900),
            upload_timeout: Duration::from_secs(120),
            list_timeout: Duration::from_secs(60),
            finalize_attempts: 5,
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            poll_interval: secs_var("WORKER_POLL_INTERVAL_SECS").unwrap_or(defaults.poll_interval),
            error_backoff: secs_var("WORKER_ERROR_BACKOFF_SECS").unwrap_or(defaults.error_backoff),
            download_timeout: secs_var("WORKER_DOWNLOAD_TIMEOUT_SECS")
                .unwrap_or(defaults.download_timeout),
            transcribe_timeout: secs_var("WORKER_TRANSCRIBE_TIMEOUT_SECS")
                .unwrap_or(defaults.transcribe_timeout),
            upload_timeout: secs_var("WORKER_UPLOAD_TIMEOUT_SECS")
                .unwrap_or(defaults.upload_timeout),
            list_timeout: secs_var("WORKER_LIST_TIMEOUT_SECS").unwrap_or(defaults.list_timeout),
            finalize_attempts: std::env::var("WORKER_FINALIZE_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&n: &u32| n > 0)
                .unwrap_or(defaults.finalize_attempts),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }
}

fn secs_var(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
}
