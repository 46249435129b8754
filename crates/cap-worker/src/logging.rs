//! Structured job logging.
//!
//! Every line emitted while a job is being processed carries the job id, the
//! workflow type and the video it concerns.

use cap_models::{JobId, JobType};
use tracing::{error, info, warn, Span};

/// Job logger with consistent contextual fields.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    job_type: JobType,
    video_uuid: String,
}

impl JobLogger {
    pub fn new(job_id: JobId, job_type: JobType, video_uuid: impl Into<String>) -> Self {
        Self {
            job_id,
            job_type,
            video_uuid: video_uuid.into(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            job_type = self.job_type.as_str(),
            video_uuid = %self.video_uuid,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            job_type = self.job_type.as_str(),
            video_uuid = %self.video_uuid,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            job_type = self.job_type.as_str(),
            video_uuid = %self.video_uuid,
            "Job warning: {}", message
        );
    }

    /// Log a failure together with its error kind.
    pub fn log_error(&self, kind: &str, message: &str) {
        error!(
            job_id = %self.job_id,
            job_type = self.job_type.as_str(),
            video_uuid = %self.video_uuid,
            error_kind = kind,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            job_type = self.job_type.as_str(),
            video_uuid = %self.video_uuid,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn video_uuid(&self) -> &str {
        &self.video_uuid
    }

    /// Span wrapping the whole execution of one job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            job_type = self.job_type.as_str(),
            video_uuid = %self.video_uuid
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_fields() {
        let logger = JobLogger::new(JobId(42), JobType::SingleVideo, "dQw4w9WgXcQ");
        assert_eq!(logger.job_id(), JobId(42));
        assert_eq!(logger.video_uuid(), "dQw4w9WgXcQ");
    }
}
