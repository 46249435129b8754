//! Error types for media acquisition.

use std::time::Duration;

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while acquiring media.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("yt-dlp not found: {0}")]
    YtDlpNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Content unavailable: {0}")]
    ContentUnavailable(String),

    #[error("Download failed: {message}")]
    DownloadFailed {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a download failure error.
    pub fn download_failed(message: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
            exit_code,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedMetadata(message.into())
    }

    /// Retrying cannot help: the request or the content itself is the problem.
    pub fn is_permanent(&self) -> bool {
        matches!(self, MediaError::InvalidRequest(_) | MediaError::ContentUnavailable(_))
    }
}

/// Check a yt-dlp error message for content that can never be fetched.
///
/// Private, removed, age-gated, region-blocked, copyright-blocked and live
/// content all fail the same way on every attempt.
pub fn is_unavailable_message(message: &str) -> bool {
    let msg = message.to_lowercase();

    if msg.contains("private video") || msg.contains("video is private") {
        return true;
    }

    if msg.contains("video unavailable")
        || msg.contains("video is unavailable")
        || msg.contains("video not available")
    {
        return true;
    }

    if msg.contains("video has been removed") || msg.contains("video was deleted") {
        return true;
    }

    if msg.contains("age") && (msg.contains("restrict") || msg.contains("verif")) {
        return true;
    }

    if msg.contains("copyright") && msg.contains("block") {
        return true;
    }

    if msg.contains("not available in your country") || msg.contains("blocked in your country") {
        return true;
    }

    // Live streams and premieres have no finished audio yet
    if msg.contains("live stream") || msg.contains("live event") {
        return true;
    }
    msg.contains("premiere") && msg.contains("will begin")
}
