//! Single-video caption pipeline.
//!
//! Download the audio, check the owner's credit, transcribe, persist the
//! record, charge, and optionally upload the captions back to the video.
//! Every step up to the charge aborts the job on error; upload failures are
//! reported in the outcome instead.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cap_media::{DownloadRequest, DownloadedMedia};
use cap_models::{
    credit_minutes, JobId, JobType, SingleVideoArgs, Snippet, TranscriptFormat, User, VideoRecord,
    WorkflowArgs,
};
use tokio::time::Instant;
use tracing::{debug, warn};
use validator::Validate;

use crate::collaborators::{
    Acquirer, CaptionJob, CaptionUploader, CreditStore, Transcriber, TranscriptionJob, VideoStore,
};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::handler::{JobHandler, JobOutcome, UploadStatus};
use crate::logging::JobLogger;
use crate::metrics;

/// Longest prompt forwarded to the transcriber.
const MAX_PROMPT_CHARS: usize = 1000;

/// Everything the pipeline calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub acquirer: Arc<dyn Acquirer>,
    pub transcriber: Arc<dyn Transcriber>,
    pub uploader: Arc<dyn CaptionUploader>,
    pub videos: Arc<dyn VideoStore>,
    pub credits: Arc<dyn CreditStore>,
}

/// Handler for [`JobType::SingleVideo`].
pub struct SingleVideoHandler {
    config: WorkerConfig,
    deps: Collaborators,
}

impl SingleVideoHandler {
    pub fn new(config: WorkerConfig, deps: Collaborators) -> Self {
        Self { config, deps }
    }

    async fn run(&self, job_id: JobId, user: &User, args: SingleVideoArgs) -> WorkerResult<JobOutcome> {
        args.validate()
            .map_err(|e| WorkerError::bad_request(format!("invalid arguments: {e}")))?;

        let logger = JobLogger::new(job_id, JobType::SingleVideo, &args.video_uuid);
        if args.transcript_fmts.len() > 1 {
            logger.log_warning("several transcript formats requested, only the first is produced");
        }

        let request = DownloadRequest {
            content_id: args.video_uuid.clone(),
            dest_dir: self.config.work_dir.clone(),
            timeout: self.config.download_timeout,
        };
        let media = with_deadline(
            "download",
            self.config.download_timeout,
            self.deps.acquirer.download(request),
        )
        .await?;
        logger.log_progress(&format!(
            "downloaded {} ({}s)",
            media.path.display(),
            media.duration_seconds
        ));

        let result = self.process(job_id, user, &args, &media, &logger).await;
        remove_artifact(&media.path).await;
        result
    }

    async fn process(
        &self,
        job_id: JobId,
        user: &User,
        args: &SingleVideoArgs,
        media: &DownloadedMedia,
        logger: &JobLogger,
    ) -> WorkerResult<JobOutcome> {
        let minutes = credit_minutes(media.duration_seconds);
        if !user.can_afford(minutes) {
            return Ok(JobOutcome::InsufficientCredit {
                required: minutes,
                available: user.credit,
            });
        }

        let format = args.transcript_fmt();
        let transcription = TranscriptionJob {
            audio_path: media.path.clone(),
            language: args.language.clone(),
            prompt: build_prompt(args.prompt.as_deref(), &media.title, &media.description),
            format,
        };
        let transcript = with_deadline(
            "transcribe",
            self.config.transcribe_timeout,
            self.deps.transcriber.transcribe(transcription),
        )
        .await?;
        logger.log_progress(&format!("transcribed as {}", format.as_str()));

        let mut record = VideoRecord::new(job_id, user.id, &args.video_uuid);
        record.path = Some(media.path.clone());
        record.snippet = Snippet {
            title: media.title.clone(),
            description: media.description.clone(),
            duration_seconds: media.duration_seconds,
        };
        record.transcript.insert(format, transcript);

        let started = Instant::now();
        let saved = self.deps.videos.save(record.clone()).await;
        metrics::record_step("persist", started.elapsed());
        saved?;

        if minutes > 0 {
            let remaining = self.deps.credits.charge(user.id, minutes).await?;
            logger.log_progress(&format!("charged {minutes} minutes, {remaining} remaining"));
        } else {
            logger.log_warning("zero-length video, nothing charged");
        }

        let upload = if args.auto_upload {
            match self.upload(job_id, user, args, &record).await {
                Ok(caption_id) => {
                    logger.log_progress(&format!("captions uploaded as {caption_id}"));
                    UploadStatus::Uploaded { caption_id }
                }
                Err(e) => {
                    metrics::record_upload_failed();
                    logger.log_warning(&format!("caption upload failed: {e}"));
                    UploadStatus::Failed { reason: e.reason() }
                }
            }
        } else {
            UploadStatus::NotRequested
        };

        Ok(JobOutcome::Completed { upload })
    }

    async fn upload(
        &self,
        job_id: JobId,
        user: &User,
        args: &SingleVideoArgs,
        record: &VideoRecord,
    ) -> WorkerResult<String> {
        let credentials = user
            .credentials
            .clone()
            .ok_or_else(|| WorkerError::bad_request("user has no upload credentials"))?;
        let srt = record
            .transcript(TranscriptFormat::Srt)
            .ok_or_else(|| WorkerError::bad_request("no srt transcript to upload"))?;

        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let transcript_path = self.config.work_dir.join(format!("{job_id}.srt"));
        tokio::fs::write(&transcript_path, srt).await?;

        let job = CaptionJob {
            transcript_path: transcript_path.clone(),
            video_uuid: args.video_uuid.clone(),
            language: args.language.clone(),
            credentials,
        };
        let result = with_deadline("upload", self.config.upload_timeout, self.deps.uploader.upload(job)).await;
        remove_artifact(&transcript_path).await;
        result
    }
}

#[async_trait]
impl JobHandler for SingleVideoHandler {
    fn job_type(&self) -> JobType {
        JobType::SingleVideo
    }

    async fn execute(&self, job_id: JobId, user: &User, args: WorkflowArgs) -> WorkerResult<JobOutcome> {
        match args {
            WorkflowArgs::SingleVideo(args) => self.run(job_id, user, args).await,
            other => Err(WorkerError::bad_request(format!(
                "{} arguments sent to the {} handler",
                other.job_type(),
                JobType::SingleVideo
            ))),
        }
    }
}

/// Run one collaborator call under a deadline and record its duration.
pub(crate) async fn with_deadline<T, F>(step: &'static str, limit: Duration, call: F) -> WorkerResult<T>
where
    F: Future<Output = WorkerResult<T>>,
{
    let started = Instant::now();
    let result = match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(WorkerError::timeout(format!(
            "{step} did not finish within {}s",
            limit.as_secs()
        ))),
    };
    metrics::record_step(step, started.elapsed());
    result
}

/// User prompt, title and description joined with `;`, empty parts skipped.
fn build_prompt(prompt: Option<&str>, title: &str, description: &str) -> Option<String> {
    let joined = [prompt.unwrap_or_default(), title, description]
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(";");

    if joined.is_empty() {
        None
    } else {
        Some(joined.chars().take(MAX_PROMPT_CHARS).collect())
    }
}

async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove artifact"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        MockAcquirer, MockCaptionUploader, MockCreditStore, MockTranscriber, MockVideoStore,
    };
    use cap_models::Credentials;
    use std::path::PathBuf;

    struct Mocks {
        acquirer: MockAcquirer,
        transcriber: MockTranscriber,
        uploader: MockCaptionUploader,
        videos: MockVideoStore,
        credits: MockCreditStore,
    }

    impl Mocks {
        fn new() -> Self {
            Self {
                acquirer: MockAcquirer::new(),
                transcriber: MockTranscriber::new(),
                uploader: MockCaptionUploader::new(),
                videos: MockVideoStore::new(),
                credits: MockCreditStore::new(),
            }
        }

        fn handler(self, work_dir: &Path) -> SingleVideoHandler {
            let config = WorkerConfig {
                work_dir: work_dir.to_path_buf(),
                download_timeout: Duration::from_secs(5),
                ..Default::default()
            };
            SingleVideoHandler::new(
                config,
                Collaborators {
                    acquirer: Arc::new(self.acquirer),
                    transcriber: Arc::new(self.transcriber),
                    uploader: Arc::new(self.uploader),
                    videos: Arc::new(self.videos),
                    credits: Arc::new(self.credits),
                },
            )
        }
    }

    fn media(path: PathBuf, duration_seconds: u64) -> DownloadedMedia {
        DownloadedMedia {
            path,
            extension: "webm".into(),
            title: "Launch day".into(),
            description: "Rocket goes up".into(),
            duration_seconds,
        }
    }

    fn user(credit: i64, credentials: Option<Credentials>) -> User {
        User {
            id: 7,
            name: "alice".into(),
            credit,
            credentials,
        }
    }

    fn args() -> WorkflowArgs {
        SingleVideoArgs::new("dQw4w9WgXcQ").with_prompt("rockets").into()
    }

    #[tokio::test]
    async fn test_completes_and_charges_after_persist() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("dQw4w9WgXcQ.webm");
        std::fs::write(&audio, b"audio").unwrap();

        let mut mocks = Mocks::new();
        let downloaded = media(audio.clone(), 61);
        mocks
            .acquirer
            .expect_download()
            .withf(|req| req.content_id == "dQw4w9WgXcQ")
            .times(1)
            .returning(move |_| Ok(downloaded.clone()));
        mocks
            .transcriber
            .expect_transcribe()
            .withf(|job| {
                job.prompt.as_deref() == Some("rockets;Launch day;Rocket goes up")
                    && job.format == TranscriptFormat::Srt
            })
            .times(1)
            .returning(|_| Ok("1\n00:00:00,000 --> 00:00:02,000\nLiftoff\n".into()));
        mocks
            .videos
            .expect_save()
            .withf(|record| {
                record.snippet.duration_seconds == 61
                    && record.transcript(TranscriptFormat::Srt).is_some()
            })
            .times(1)
            .returning(|_| Ok(()));
        mocks
            .credits
            .expect_charge()
            .withf(|user_id, minutes| *user_id == 7 && *minutes == 2)
            .times(1)
            .returning(|_, _| Ok(8));
        mocks.uploader.expect_upload().times(0);

        let handler = mocks.handler(dir.path());
        let outcome = handler.execute(JobId(1), &user(10, None), args()).await.unwrap();

        assert_eq!(
            outcome,
            JobOutcome::Completed {
                upload: UploadStatus::NotRequested
            }
        );
        assert!(!audio.exists(), "downloaded audio should be cleaned up");
    }

    #[tokio::test]
    async fn test_insufficient_credit_skips_transcription_and_charge() {
        let dir = tempfile::tempdir().unwrap();
        let mut mocks = Mocks::new();
        let downloaded = media(dir.path().join("a.webm"), 361);
        mocks
            .acquirer
            .expect_download()
            .returning(move |_| Ok(downloaded.clone()));
        mocks.transcriber.expect_transcribe().times(0);
        mocks.videos.expect_save().times(0);
        mocks.credits.expect_charge().times(0);

        let handler = mocks.handler(dir.path());
        let outcome = handler.execute(JobId(2), &user(5, None), args()).await.unwrap();

        assert_eq!(
            outcome,
            JobOutcome::InsufficientCredit {
                required: 7,
                available: 5
            }
        );
    }

    #[tokio::test]
    async fn test_upload_failure_does_not_fail_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut mocks = Mocks::new();
        let downloaded = media(dir.path().join("a.webm"), 30);
        mocks
            .acquirer
            .expect_download()
            .returning(move |_| Ok(downloaded.clone()));
        mocks
            .transcriber
            .expect_transcribe()
            .returning(|_| Ok("1\n00:00:00,000 --> 00:00:01,000\nhi\n".into()));
        mocks.videos.expect_save().times(1).returning(|_| Ok(()));
        mocks.credits.expect_charge().times(1).returning(|_, _| Ok(9));
        mocks
            .uploader
            .expect_upload()
            .withf(|job| job.transcript_path.ends_with("3.srt") && job.video_uuid == "dQw4w9WgXcQ")
            .times(1)
            .returning(|_| Err(WorkerError::dependency("youtube: API error (403): forbidden")));

        let creds = Credentials {
            access_token: Some("token".into()),
            ..Default::default()
        };
        let args: WorkflowArgs = SingleVideoArgs::new("dQw4w9WgXcQ").with_auto_upload(true).into();
        let handler = mocks.handler(dir.path());
        let outcome = handler.execute(JobId(3), &user(10, Some(creds)), args).await.unwrap();

        match outcome {
            JobOutcome::Completed {
                upload: UploadStatus::Failed { reason },
            } => assert!(reason.starts_with("dependency:")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!dir.path().join("3.srt").exists());
    }

    #[tokio::test]
    async fn test_upload_without_credentials_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut mocks = Mocks::new();
        let downloaded = media(dir.path().join("a.webm"), 30);
        mocks
            .acquirer
            .expect_download()
            .returning(move |_| Ok(downloaded.clone()));
        mocks.transcriber.expect_transcribe().returning(|_| Ok("srt".into()));
        mocks.videos.expect_save().returning(|_| Ok(()));
        mocks.credits.expect_charge().returning(|_, _| Ok(9));
        mocks.uploader.expect_upload().times(0);

        let args: WorkflowArgs = SingleVideoArgs::new("dQw4w9WgXcQ").with_auto_upload(true).into();
        let handler = mocks.handler(dir.path());
        let outcome = handler.execute(JobId(4), &user(10, None), args).await.unwrap();

        assert!(matches!(
            outcome,
            JobOutcome::Completed {
                upload: UploadStatus::Failed { ref reason }
            } if reason.starts_with("bad_request:")
        ));
    }

    #[tokio::test]
    async fn test_zero_duration_is_not_charged() {
        let dir = tempfile::tempdir().unwrap();
        let mut mocks = Mocks::new();
        let downloaded = media(dir.path().join("a.webm"), 0);
        mocks
            .acquirer
            .expect_download()
            .returning(move |_| Ok(downloaded.clone()));
        mocks.transcriber.expect_transcribe().returning(|_| Ok(String::new()));
        mocks.videos.expect_save().times(1).returning(|_| Ok(()));
        mocks.credits.expect_charge().times(0);

        let handler = mocks.handler(dir.path());
        let outcome = handler.execute(JobId(5), &user(0, None), args()).await.unwrap();
        assert!(matches!(outcome, JobOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_persist_failure_prevents_charge() {
        let dir = tempfile::tempdir().unwrap();
        let mut mocks = Mocks::new();
        let downloaded = media(dir.path().join("a.webm"), 30);
        mocks
            .acquirer
            .expect_download()
            .returning(move |_| Ok(downloaded.clone()));
        mocks.transcriber.expect_transcribe().returning(|_| Ok("srt".into()));
        mocks
            .videos
            .expect_save()
            .returning(|_| Err(WorkerError::unknown("disk gone")));
        mocks.credits.expect_charge().times(0);

        let handler = mocks.handler(dir.path());
        let err = handler.execute(JobId(6), &user(10, None), args()).await.unwrap_err();
        assert_eq!(err.kind(), "unknown");
    }

    #[tokio::test]
    async fn test_transcription_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let mut mocks = Mocks::new();
        let downloaded = media(dir.path().join("a.webm"), 30);
        mocks
            .acquirer
            .expect_download()
            .returning(move |_| Ok(downloaded.clone()));
        mocks
            .transcriber
            .expect_transcribe()
            .returning(|_| Err(WorkerError::dependency("transcription: API error (500): boom")));
        mocks.videos.expect_save().times(0);
        mocks.credits.expect_charge().times(0);

        let handler = mocks.handler(dir.path());
        let err = handler.execute(JobId(7), &user(10, None), args()).await.unwrap_err();
        assert_eq!(err.kind(), "dependency");
    }

    #[tokio::test]
    async fn test_invalid_args_rejected_before_download() {
        let dir = tempfile::tempdir().unwrap();
        let mut mocks = Mocks::new();
        mocks.acquirer.expect_download().times(0);

        let handler = mocks.handler(dir.path());
        let err = handler
            .execute(JobId(8), &user(10, None), SingleVideoArgs::new("").into())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "bad_request");
    }

    #[tokio::test]
    async fn test_channel_args_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut mocks = Mocks::new();
        mocks.acquirer.expect_download().times(0);

        let handler = mocks.handler(dir.path());
        let err = handler
            .execute(JobId(8), &user(10, None), cap_models::ChannelArgs::new("Sophia").into())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::BadRequest(ref m) if m.contains("channel")));
    }

    struct SlowAcquirer;

    #[async_trait]
    impl Acquirer for SlowAcquirer {
        async fn download(&self, request: DownloadRequest) -> WorkerResult<DownloadedMedia> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(media(request.dest_dir.join("late.webm"), 30))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_deadline_fails_before_persist() {
        let dir = tempfile::tempdir().unwrap();
        let mut mocks = Mocks::new();
        mocks.transcriber.expect_transcribe().times(0);
        mocks.videos.expect_save().times(0);
        mocks.credits.expect_charge().times(0);

        let mut handler = mocks.handler(dir.path());
        handler.deps.acquirer = Arc::new(SlowAcquirer);

        let err = handler.execute(JobId(9), &user(10, None), args()).await.unwrap_err();
        assert!(matches!(err, WorkerError::Timeout(ref m) if m.contains("download")));
    }

    #[test]
    fn test_build_prompt() {
        assert_eq!(
            build_prompt(Some("names: Ada"), "Title", "").as_deref(),
            Some("names: Ada;Title")
        );
        assert_eq!(build_prompt(None, "", "  "), None);

        let long = "x".repeat(1500);
        assert_eq!(build_prompt(None, &long, "").map(|p| p.len()), Some(MAX_PROMPT_CHARS));
    }
}
