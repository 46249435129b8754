//! Media acquisition for caption jobs.
//!
//! Wraps yt-dlp to fetch the audio track of a video along with the metadata
//! (title, description, duration) the pipeline needs.

pub mod download;
pub mod error;

pub use download::{DownloadConfig, DownloadRequest, DownloadedMedia, YtDlp, DEFAULT_FORMAT};
pub use error::{is_unavailable_message, MediaError, MediaResult};
