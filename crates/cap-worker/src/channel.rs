//! Channel fan-out.
//!
//! A channel job lists the latest videos of a channel and queues one
//! single-video job per video for the same user. Nothing is downloaded or
//! charged here.

use std::sync::Arc;

use async_trait::async_trait;
use cap_models::{ChannelArgs, JobId, JobType, User, WorkflowArgs};
use validator::Validate;

use crate::collaborators::{JobSubmitter, VideoLister};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::handler::{JobHandler, JobOutcome};
use crate::logging::JobLogger;
use crate::pipeline::with_deadline;

/// Handler for [`JobType::Channel`].
pub struct ChannelHandler {
    config: WorkerConfig,
    lister: Arc<dyn VideoLister>,
    jobs: Arc<dyn JobSubmitter>,
}

impl ChannelHandler {
    pub fn new(config: WorkerConfig, lister: Arc<dyn VideoLister>, jobs: Arc<dyn JobSubmitter>) -> Self {
        Self { config, lister, jobs }
    }

    async fn run(&self, job_id: JobId, user: &User, args: ChannelArgs) -> WorkerResult<JobOutcome> {
        args.validate()
            .map_err(|e| WorkerError::bad_request(format!("invalid arguments: {e}")))?;

        let logger = JobLogger::new(job_id, JobType::Channel, &args.channel_title);
        let videos = with_deadline(
            "list",
            self.config.list_timeout,
            self.lister.list_videos(&args.channel_title, args.max_videos),
        )
        .await?;

        if videos.is_empty() {
            logger.log_warning("channel has no videos");
        }

        let mut job_ids = Vec::with_capacity(videos.len());
        for video in &videos {
            let child = self
                .jobs
                .submit(user.id, args.video_args(&video.video_id).into())
                .await?;
            logger.log_progress(&format!("queued {} as job {}", video.video_id, child));
            job_ids.push(child);
        }

        Ok(JobOutcome::Enqueued { job_ids })
    }
}

#[async_trait]
impl JobHandler for ChannelHandler {
    fn job_type(&self) -> JobType {
        JobType::Channel
    }

    async fn execute(&self, job_id: JobId, user: &User, args: WorkflowArgs) -> WorkerResult<JobOutcome> {
        match args {
            WorkflowArgs::Channel(args) => self.run(job_id, user, args).await,
            other => Err(WorkerError::bad_request(format!(
                "{} arguments sent to the {} handler",
                other.job_type(),
                JobType::Channel
            ))),
        }
    }
}
