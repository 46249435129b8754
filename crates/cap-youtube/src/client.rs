//! YouTube Data API v3 caption upload.
//!
//! Captions are inserted with a `multipart/related` request: a JSON snippet
//! part followed by the caption file.

use std::path::Path;
use std::time::Duration;

use cap_models::Credentials;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{YoutubeError, YoutubeResult};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct YoutubeConfig {
    /// Upload API base, without a trailing slash
    pub upload_base: String,
    /// Data API base used for search, without a trailing slash
    pub api_base: String,
    /// Data API key; channel listing needs one
    pub api_key: Option<String>,
    /// OAuth token endpoint used when the stored credentials name none
    pub token_uri: String,
    /// Caption language when the job did not specify one
    pub default_language: String,
    /// Whole-request timeout
    pub timeout: Duration,
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            upload_base: "https://www.googleapis.com/upload/youtube/v3".to_string(),
            api_base: "https://www.googleapis.com/youtube/v3".to_string(),
            api_key: None,
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            default_language: "en".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl YoutubeConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            upload_base: std::env::var("YOUTUBE_UPLOAD_BASE")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.upload_base),
            api_base: std::env::var("YOUTUBE_API_BASE")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            api_key: std::env::var("YOUTUBE_API_KEY").ok().filter(|k| !k.is_empty()),
            token_uri: std::env::var("GOOGLE_TOKEN_URI").unwrap_or(defaults.token_uri),
            default_language: std::env::var("YOUTUBE_DEFAULT_LANGUAGE")
                .unwrap_or(defaults.default_language),
            timeout: std::env::var("YOUTUBE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }
}

/// One caption track to attach to a video.
#[derive(Debug, Clone)]
pub struct CaptionUpload<'a> {
    pub transcript_path: &'a Path,
    pub video_id: &'a str,
    pub language: Option<&'a str>,
    pub credentials: &'a Credentials,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct CaptionResource {
    id: String,
}

/// Caption upload client.
#[derive(Clone)]
pub struct CaptionClient {
    http: Client,
    config: YoutubeConfig,
}

impl CaptionClient {
    pub fn new(config: YoutubeConfig) -> YoutubeResult<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> YoutubeResult<Self> {
        Self::new(YoutubeConfig::from_env())
    }

    /// Obtain a bearer token: exchange the refresh token when possible,
    /// otherwise fall back to the stored access token.
    pub async fn access_token(&self, credentials: &Credentials) -> YoutubeResult<String> {
        if let (Some(refresh_token), Some(client_id), Some(client_secret)) = (
            credentials.refresh_token.as_deref(),
            credentials.client_id.as_deref(),
            credentials.client_secret.as_deref(),
        ) {
            let token_uri = credentials
                .token_uri
                .as_deref()
                .unwrap_or(self.config.token_uri.as_str());

            let response = self
                .http
                .post(token_uri)
                .form(&[
                    ("client_id", client_id),
                    ("client_secret", client_secret),
                    ("refresh_token", refresh_token),
                    ("grant_type", "refresh_token"),
                ])
                .send()
                .await
                .map_err(map_transport)?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(YoutubeError::TokenRefresh(format!("{}: {}", status.as_u16(), body)));
            }

            let token: TokenResponse = response.json().await.map_err(map_transport)?;
            debug!("Refreshed OAuth access token");
            return Ok(token.access_token);
        }

        credentials
            .access_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| YoutubeError::missing_credentials("no access or refresh token"))
    }

    /// Insert a caption track and return the caption id YouTube assigned.
    pub async fn upload_caption(&self, upload: &CaptionUpload<'_>) -> YoutubeResult<String> {
        let token = self.access_token(upload.credentials).await?;
        let caption = tokio::fs::read(upload.transcript_path).await?;
        let language = upload.language.unwrap_or(self.config.default_language.as_str());

        let mut url = Url::parse(&format!("{}/captions", self.config.upload_base))?;
        url.query_pairs_mut()
            .append_pair("uploadType", "multipart")
            .append_pair("part", "snippet");

        let snippet = json!({
            "snippet": {
                "videoId": upload.video_id,
                "language": language,
                "name": "",
                "isDraft": false,
            }
        });
        let boundary = format!("caption-{}", Uuid::new_v4().simple());
        let body = related_body(&boundary, &serde_json::to_vec(&snippet)?, &caption);

        info!(
            video_id = %upload.video_id,
            language = %language,
            size_bytes = caption.len(),
            "Uploading caption track"
        );

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, format!("multipart/related; boundary={boundary}"))
            .body(body)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), video_id = %upload.video_id, "Caption upload rejected");
            return Err(YoutubeError::api(status.as_u16(), message));
        }

        let resource: CaptionResource = response.json().await.map_err(map_transport)?;
        info!(video_id = %upload.video_id, caption_id = %resource.id, "Caption uploaded");
        Ok(resource.id)
    }
}

fn related_body(boundary: &str, metadata: &[u8], media: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(metadata.len() + media.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata);
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

pub(crate) fn map_transport(e: reqwest::Error) -> YoutubeError {
    if e.is_timeout() {
        YoutubeError::Timeout
    } else {
        YoutubeError::Http(e)
    }
}
