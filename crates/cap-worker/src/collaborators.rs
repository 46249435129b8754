//! External collaborators of the caption pipeline.
//!
//! The handlers only talk to these traits, so tests can substitute any of
//! them. The production implementations wrap the media, transcription, YouTube
//! and store crates.

use std::path::PathBuf;

use async_trait::async_trait;
use cap_media::{DownloadRequest, DownloadedMedia, YtDlp};
use cap_models::{Credentials, JobId, TranscriptFormat, User, VideoRecord, WorkflowArgs};
use cap_store::{JobStore, UserRepository, VideoRepository};
use cap_whisper::{TranscriptionRequest, WhisperClient};
use cap_youtube::{CaptionClient, CaptionUpload, ChannelClient, ChannelVideo};

use crate::error::WorkerResult;

/// One transcription call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionJob {
    pub audio_path: PathBuf,
    pub language: Option<String>,
    pub prompt: Option<String>,
    pub format: TranscriptFormat,
}

/// One caption upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionJob {
    pub transcript_path: PathBuf,
    pub video_uuid: String,
    pub language: Option<String>,
    pub credentials: Credentials,
}

/// Fetches the audio of a video.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Acquirer: Send + Sync {
    async fn download(&self, request: DownloadRequest) -> WorkerResult<DownloadedMedia>;
}

/// Turns audio into a transcript document.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, job: TranscriptionJob) -> WorkerResult<String>;
}

/// Attaches a transcript to the video as captions; returns the caption id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CaptionUploader: Send + Sync {
    async fn upload(&self, job: CaptionJob) -> WorkerResult<String>;
}

/// Finds the latest videos of a channel by its title.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoLister: Send + Sync {
    async fn list_videos(&self, channel_title: &str, max_videos: u32) -> WorkerResult<Vec<ChannelVideo>>;
}

/// Queues follow-up jobs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit(&self, user_id: i64, args: WorkflowArgs) -> WorkerResult<JobId>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserProvider: Send + Sync {
    async fn get_user(&self, user_id: i64) -> WorkerResult<Option<User>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn save(&self, record: VideoRecord) -> WorkerResult<()>;
}

/// Debits credit minutes; returns the remaining balance.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CreditStore: Send + Sync {
    async fn charge(&self, user_id: i64, minutes: i64) -> WorkerResult<i64>;
}

#[async_trait]
impl Acquirer for YtDlp {
    async fn download(&self, request: DownloadRequest) -> WorkerResult<DownloadedMedia> {
        Ok(YtDlp::download(self, &request).await?)
    }
}

#[async_trait]
impl Transcriber for WhisperClient {
    async fn transcribe(&self, job: TranscriptionJob) -> WorkerResult<String> {
        let request = TranscriptionRequest {
            audio_path: &job.audio_path,
            language: job.language.as_deref(),
            prompt: job.prompt.as_deref(),
            format: job.format,
        };
        Ok(WhisperClient::transcribe(self, &request).await?)
    }
}

#[async_trait]
impl CaptionUploader for CaptionClient {
    async fn upload(&self, job: CaptionJob) -> WorkerResult<String> {
        let upload = CaptionUpload {
            transcript_path: &job.transcript_path,
            video_id: &job.video_uuid,
            language: job.language.as_deref(),
            credentials: &job.credentials,
        };
        Ok(self.upload_caption(&upload).await?)
    }
}

#[async_trait]
impl VideoLister for ChannelClient {
    async fn list_videos(&self, channel_title: &str, max_videos: u32) -> WorkerResult<Vec<ChannelVideo>> {
        Ok(self.list_channel_videos(channel_title, max_videos).await?)
    }
}

#[async_trait]
impl JobSubmitter for JobStore {
    async fn submit(&self, user_id: i64, args: WorkflowArgs) -> WorkerResult<JobId> {
        Ok(self.enqueue(user_id, &args).await?)
    }
}

#[async_trait]
impl UserProvider for UserRepository {
    async fn get_user(&self, user_id: i64) -> WorkerResult<Option<User>> {
        Ok(self.get_by_id(user_id).await?)
    }
}

#[async_trait]
impl CreditStore for UserRepository {
    async fn charge(&self, user_id: i64, minutes: i64) -> WorkerResult<i64> {
        Ok(UserRepository::charge(self, user_id, minutes).await?)
    }
}

#[async_trait]
impl VideoStore for VideoRepository {
    async fn save(&self, record: VideoRecord) -> WorkerResult<()> {
        Ok(VideoRepository::save(self, &record).await?)
    }
}
