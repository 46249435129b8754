//! Typed job arguments.
//!
//! The workflow table stores arguments as an opaque JSON payload. The job type
//! tag selects the shape the payload is decoded into.

use schemars::JsonSchema;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::ModelResult;
use crate::job::JobType;
use crate::video::TranscriptFormat;

/// Arguments of a claimed job, keyed by its type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowArgs {
    SingleVideo(SingleVideoArgs),
    Channel(ChannelArgs),
}

impl WorkflowArgs {
    /// Decode a stored payload into the shape registered for `job_type`.
    pub fn decode(job_type: JobType, payload: &str) -> ModelResult<Self> {
        match job_type {
            JobType::SingleVideo => Ok(Self::SingleVideo(serde_json::from_str(payload)?)),
            JobType::Channel => Ok(Self::Channel(serde_json::from_str(payload)?)),
        }
    }

    /// Encode into the stored payload format.
    pub fn encode(&self) -> ModelResult<String> {
        let payload = match self {
            Self::SingleVideo(args) => serde_json::to_string(args)?,
            Self::Channel(args) => serde_json::to_string(args)?,
        };
        Ok(payload)
    }

    pub fn job_type(&self) -> JobType {
        match self {
            Self::SingleVideo(_) => JobType::SingleVideo,
            Self::Channel(_) => JobType::Channel,
        }
    }

    /// Video id or channel title the job operates on, used as log context.
    pub fn subject(&self) -> &str {
        match self {
            Self::SingleVideo(args) => &args.video_uuid,
            Self::Channel(args) => &args.channel_title,
        }
    }
}

impl From<SingleVideoArgs> for WorkflowArgs {
    fn from(args: SingleVideoArgs) -> Self {
        Self::SingleVideo(args)
    }
}

impl From<ChannelArgs> for WorkflowArgs {
    fn from(args: ChannelArgs) -> Self {
        Self::Channel(args)
    }
}

fn default_max_videos() -> u32 {
    2
}

fn default_transcript_fmts() -> Vec<TranscriptFormat> {
    vec![TranscriptFormat::Srt]
}

/// Accepts JSON booleans, 0/1 and the strings "true"/"false".
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Int(i) => Ok(i != 0),
        Flag::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            other => Err(de::Error::custom(format!("invalid boolean flag: {other}"))),
        },
    }
}

/// Arguments of a single-video caption job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct SingleVideoArgs {
    /// External content id (YouTube video id)
    #[validate(length(min = 1, max = 64))]
    pub video_uuid: String,

    /// Re-upload the generated captions to the content provider
    #[serde(default, deserialize_with = "lenient_bool")]
    #[schemars(with = "bool")]
    pub auto_upload: bool,

    /// Spoken language hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 16))]
    pub language: Option<String>,

    /// Requested transcript formats; only the first is produced
    #[serde(default = "default_transcript_fmts")]
    pub transcript_fmts: Vec<TranscriptFormat>,

    /// Transcription hint. Older payloads carry it as `promotes`.
    #[serde(default, alias = "promotes", skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 1000))]
    pub prompt: Option<String>,
}

impl SingleVideoArgs {
    pub fn new(video_uuid: impl Into<String>) -> Self {
        Self {
            video_uuid: video_uuid.into(),
            auto_upload: false,
            language: None,
            transcript_fmts: default_transcript_fmts(),
            prompt: None,
        }
    }

    pub fn with_auto_upload(mut self, auto_upload: bool) -> Self {
        self.auto_upload = auto_upload;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_formats(mut self, formats: Vec<TranscriptFormat>) -> Self {
        self.transcript_fmts = formats;
        self
    }

    /// The transcript format that will be produced.
    pub fn transcript_fmt(&self) -> TranscriptFormat {
        self.transcript_fmts
            .first()
            .copied()
            .unwrap_or(TranscriptFormat::Srt)
    }
}

/// Arguments of a channel job: caption the latest videos of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct ChannelArgs {
    /// Channel title as shown on YouTube
    #[validate(length(min = 1, max = 200))]
    pub channel_title: String,

    #[serde(default = "default_max_videos")]
    #[validate(range(min = 1, max = 50))]
    pub max_videos: u32,

    /// Passed on to every spawned single-video job
    #[serde(default, deserialize_with = "lenient_bool")]
    #[schemars(with = "bool")]
    pub auto_upload: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 16))]
    pub language: Option<String>,
}

impl ChannelArgs {
    pub fn new(channel_title: impl Into<String>) -> Self {
        Self {
            channel_title: channel_title.into(),
            max_videos: default_max_videos(),
            auto_upload: false,
            language: None,
        }
    }

    pub fn with_max_videos(mut self, max_videos: u32) -> Self {
        self.max_videos = max_videos;
        self
    }

    pub fn with_auto_upload(mut self, auto_upload: bool) -> Self {
        self.auto_upload = auto_upload;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Single-video job for one of the channel's videos.
    pub fn video_args(&self, video_uuid: impl Into<String>) -> SingleVideoArgs {
        let mut args = SingleVideoArgs::new(video_uuid).with_auto_upload(self.auto_upload);
        args.language = self.language.clone();
        args
    }
}
