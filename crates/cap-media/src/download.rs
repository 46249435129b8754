//! Audio acquisition using yt-dlp.
//!
//! yt-dlp is run with `--print-json`, so a successful run prints the info
//! dictionary of the downloaded item on stdout. The subprocess is killed if
//! the deadline passes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{is_unavailable_message, MediaError, MediaResult};

/// Smallest files first: only the audio track is transcribed.
pub const DEFAULT_FORMAT: &str = "worstaudio/worst/bestaudio";

/// yt-dlp configuration.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Binary name or path
    pub binary: String,
    /// yt-dlp `--format` selector
    pub format: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            format: DEFAULT_FORMAT.to_string(),
        }
    }
}

impl DownloadConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            binary: std::env::var("YTDLP_BIN").unwrap_or_else(|_| "yt-dlp".to_string()),
            format: std::env::var("YTDLP_FORMAT").unwrap_or_else(|_| DEFAULT_FORMAT.to_string()),
        }
    }
}

/// What to fetch and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub content_id: String,
    pub dest_dir: PathBuf,
    pub timeout: Duration,
}

/// A downloaded artifact and the metadata reported for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedMedia {
    pub path: PathBuf,
    pub extension: String,
    pub title: String,
    pub description: String,
    pub duration_seconds: u64,
}

/// Fields of the yt-dlp info dictionary that are used.
#[derive(Debug, Deserialize)]
struct InfoJson {
    id: Option<String>,
    ext: Option<String>,
    title: Option<String>,
    description: Option<String>,
    duration: Option<f64>,
}

/// yt-dlp runner.
#[derive(Debug, Clone, Default)]
pub struct YtDlp {
    config: DownloadConfig,
}

impl YtDlp {
    pub fn new(config: DownloadConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Self {
        Self::new(DownloadConfig::from_env())
    }

    /// Resolve the configured binary on `PATH`.
    pub fn check_available(&self) -> MediaResult<PathBuf> {
        which::which(&self.config.binary)
            .map_err(|e| MediaError::YtDlpNotFound(format!("{}: {}", self.config.binary, e)))
    }

    /// Download the audio of `request.content_id` into `request.dest_dir`.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for an empty content id or destination
    /// - `ContentUnavailable` when yt-dlp reports private/removed/blocked content
    /// - `Timeout` when the deadline passes (the process is killed)
    /// - `DownloadFailed` for any other nonzero exit
    /// - `MalformedMetadata` when stdout has no usable info JSON
    pub async fn download(&self, request: &DownloadRequest) -> MediaResult<DownloadedMedia> {
        let content_id = request.content_id.trim();
        if content_id.is_empty() {
            return Err(MediaError::invalid_request("content id is empty"));
        }
        if request.dest_dir.as_os_str().is_empty() {
            return Err(MediaError::invalid_request("destination directory is empty"));
        }

        tokio::fs::create_dir_all(&request.dest_dir).await?;
        let template = request.dest_dir.join("%(id)s.%(ext)s");

        info!(
            content_id = %content_id,
            dest = %request.dest_dir.display(),
            timeout_secs = request.timeout.as_secs(),
            "Downloading audio"
        );

        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("--format")
            .arg(&self.config.format)
            .arg("--output")
            .arg(&template)
            .arg("--print-json")
            .arg("--no-progress")
            .arg("--")
            .arg(content_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MediaError::YtDlpNotFound(self.config.binary.clone())
            } else {
                MediaError::Io(e)
            }
        })?;

        // Dropping the child on timeout kills it.
        let output = match tokio::time::timeout(request.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(content_id = %content_id, "yt-dlp timed out, killed");
                return Err(MediaError::Timeout(request.timeout));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp stderr: {}", stderr);

            let error_msg = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("Unknown error")
                .to_string();

            if is_unavailable_message(&stderr) {
                return Err(MediaError::ContentUnavailable(error_msg));
            }
            return Err(MediaError::download_failed(
                format!("yt-dlp failed: {}", error_msg),
                output.status.code(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let media = parse_info(&stdout, content_id, &request.dest_dir)?;

        info!(
            content_id = %content_id,
            path = %media.path.display(),
            duration_secs = media.duration_seconds,
            "Downloaded audio"
        );

        Ok(media)
    }
}

/// Build the result from yt-dlp's stdout. The info JSON is the last line that
/// looks like an object.
fn parse_info(stdout: &str, content_id: &str, dest_dir: &Path) -> MediaResult<DownloadedMedia> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.starts_with('{'))
        .ok_or_else(|| MediaError::malformed("no info JSON on stdout"))?;

    let info: InfoJson =
        serde_json::from_str(line).map_err(|e| MediaError::malformed(e.to_string()))?;

    let extension = info
        .ext
        .filter(|e| !e.is_empty())
        .ok_or_else(|| MediaError::malformed("missing ext"))?;

    let duration = info
        .duration
        .ok_or_else(|| MediaError::malformed("missing duration"))?;
    if !duration.is_finite() || duration < 0.0 {
        return Err(MediaError::malformed(format!("invalid duration {duration}")));
    }

    let title = info.title.unwrap_or_else(|| {
        warn!(content_id = %content_id, "yt-dlp reported no title");
        String::new()
    });
    let description = info.description.unwrap_or_else(|| {
        warn!(content_id = %content_id, "yt-dlp reported no description");
        String::new()
    });

    let id = info.id.unwrap_or_else(|| content_id.to_string());

    Ok(DownloadedMedia {
        path: dest_dir.join(format!("{id}.{extension}")),
        extension,
        title,
        description,
        duration_seconds: duration.ceil() as u64,
    })
}
