//! Transcription client error types.

use thiserror::Error;

pub type WhisperResult<T> = Result<T, WhisperError>;

#[derive(Debug, Error)]
pub enum WhisperError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WhisperError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WhisperError::Timeout => true,
            WhisperError::Http(e) => e.is_timeout() || e.is_connect(),
            WhisperError::Api { status, .. } => *status == 429 || *status >= 500,
            WhisperError::Config(_) | WhisperError::Io(_) => false,
        }
    }
}
