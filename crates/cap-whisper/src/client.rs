//! Whisper transcription client.

use std::path::Path;
use std::time::Duration;

use cap_models::TranscriptFormat;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{WhisperError, WhisperResult};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// API key sent as a bearer token
    pub api_key: String,
    /// API base URL, without a trailing slash
    pub base_url: String,
    /// Transcription model
    pub model: String,
    /// Whole-request timeout
    pub timeout: Duration,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "whisper-1".to_string(),
            timeout: Duration::from_secs(900),
        }
    }
}

impl WhisperConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            base_url: std::env::var("OPENAI_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            model: std::env::var("WHISPER_MODEL").unwrap_or(defaults.model),
            timeout: std::env::var("WHISPER_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }
}

/// A single transcription call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionRequest<'a> {
    pub audio_path: &'a Path,
    pub language: Option<&'a str>,
    pub prompt: Option<&'a str>,
    pub format: TranscriptFormat,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// HTTP client for the `audio/transcriptions` endpoint.
#[derive(Clone)]
pub struct WhisperClient {
    http: Client,
    config: WhisperConfig,
}

impl WhisperClient {
    pub fn new(config: WhisperConfig) -> WhisperResult<Self> {
        if config.api_key.is_empty() {
            return Err(WhisperError::config("OPENAI_API_KEY is not set"));
        }

        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> WhisperResult<Self> {
        Self::new(WhisperConfig::from_env())
    }

    /// Upload the audio file and return the transcript body as produced in
    /// `request.format` (raw text for srt/vtt/text, the JSON document otherwise).
    pub async fn transcribe(&self, request: &TranscriptionRequest<'_>) -> WhisperResult<String> {
        let url = format!("{}/audio/transcriptions", self.config.base_url);
        let bytes = tokio::fs::read(request.audio_path).await?;
        let file_name = request
            .audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        info!(
            path = %request.audio_path.display(),
            size_bytes = bytes.len(),
            format = %request.format,
            language = request.language.unwrap_or("auto"),
            "Requesting transcription"
        );

        let mut form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name))
            .text("model", self.config.model.clone())
            .text("response_format", request.format.as_str());
        if let Some(language) = request.language {
            form = form.text("language", language.to_string());
        }
        if let Some(prompt) = request.prompt.filter(|p| !p.is_empty()) {
            form = form.text("prompt", prompt.to_string());
        }

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(map_transport)?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            warn!(status = status.as_u16(), error = %message, "Transcription rejected");
            return Err(WhisperError::api(status.as_u16(), message));
        }

        debug!(chars = body.len(), "Transcription received");
        Ok(body)
    }
}

fn map_transport(e: reqwest::Error) -> WhisperError {
    if e.is_timeout() {
        WhisperError::Timeout
    } else {
        WhisperError::Http(e)
    }
}
