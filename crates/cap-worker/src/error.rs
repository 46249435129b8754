//! Worker error types.
//!
//! Every pipeline failure is folded into one of a small set of kinds; the kind
//! label is what ends up in logs, metrics and the job's failure reason.

use cap_media::MediaError;
use cap_store::StoreError;
use cap_whisper::WhisperError;
use cap_youtube::YoutubeError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Invalid input that will fail the same way on every attempt
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An external call exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// An external system failed or answered with something unusable
    #[error("Dependency failed: {0}")]
    Dependency(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl WorkerError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::Dependency(msg.into())
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }

    /// Stable label for logs, metrics and stored failure reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::BadRequest(_) => "bad_request",
            WorkerError::Timeout(_) => "timeout",
            WorkerError::Dependency(_) => "dependency",
            WorkerError::Io(_) => "io",
            WorkerError::Store(_) => "store",
            WorkerError::Unknown(_) => "unknown",
        }
    }

    /// Check if a resubmission could succeed. Informational only: jobs are
    /// never retried automatically. Store errors count only when the database
    /// was busy.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Timeout(_) | WorkerError::Dependency(_) | WorkerError::Io(_) => true,
            WorkerError::Store(e) => e.is_busy(),
            WorkerError::BadRequest(_) | WorkerError::Unknown(_) => false,
        }
    }

    /// Reason stored on the failed job.
    pub fn reason(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

impl From<MediaError> for WorkerError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::InvalidRequest(_) | MediaError::ContentUnavailable(_) => {
                WorkerError::BadRequest(e.to_string())
            }
            MediaError::Timeout(_) => WorkerError::Timeout(e.to_string()),
            MediaError::Io(io) => WorkerError::Io(io),
            MediaError::YtDlpNotFound(_)
            | MediaError::DownloadFailed { .. }
            | MediaError::MalformedMetadata(_) => WorkerError::Dependency(e.to_string()),
        }
    }
}

impl From<WhisperError> for WorkerError {
    fn from(e: WhisperError) -> Self {
        match e {
            WhisperError::Timeout => WorkerError::Timeout(format!("transcription: {e}")),
            WhisperError::Io(io) => WorkerError::Io(io),
            other => WorkerError::Dependency(format!("transcription: {other}")),
        }
    }
}

impl From<YoutubeError> for WorkerError {
    fn from(e: YoutubeError) -> Self {
        match e {
            YoutubeError::Timeout => WorkerError::Timeout(format!("youtube: {e}")),
            YoutubeError::MissingCredentials(_) | YoutubeError::ChannelNotFound(_) => {
                WorkerError::BadRequest(e.to_string())
            }
            YoutubeError::Io(io) => WorkerError::Io(io),
            other => WorkerError::Dependency(format!("youtube: {other}")),
        }
    }
}
