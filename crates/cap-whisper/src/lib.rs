//! Client for a Whisper-compatible speech-to-text API.

pub mod client;
pub mod error;

pub use client::{TranscriptionRequest, WhisperClient, WhisperConfig};
pub use error::{WhisperError, WhisperResult};
