//! Video records produced by caption jobs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::job::JobId;

/// Transcript output format, named as the transcription API names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptFormat {
    Json,
    Text,
    #[default]
    Srt,
    VerboseJson,
    Vtt,
}

impl TranscriptFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptFormat::Json => "json",
            TranscriptFormat::Text => "text",
            TranscriptFormat::Srt => "srt",
            TranscriptFormat::VerboseJson => "verbose_json",
            TranscriptFormat::Vtt => "vtt",
        }
    }

    /// File extension used when the transcript is written to disk.
    pub fn extension(&self) -> &'static str {
        match self {
            TranscriptFormat::Json | TranscriptFormat::VerboseJson => "json",
            TranscriptFormat::Text => "txt",
            TranscriptFormat::Srt => "srt",
            TranscriptFormat::Vtt => "vtt",
        }
    }
}

impl fmt::Display for TranscriptFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata reported by the acquisition step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Snippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub duration_seconds: u64,
}

/// Per-job video record, written once after a successful transcription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VideoRecord {
    pub workflow_id: JobId,
    pub user_id: i64,
    /// External content id
    pub uuid: String,
    /// Local artifact path; only meaningful on the worker that downloaded it
    #[serde(skip)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub snippet: Snippet,
    #[serde(default)]
    pub transcript: BTreeMap<TranscriptFormat, String>,
}

impl VideoRecord {
    pub fn new(workflow_id: JobId, user_id: i64, uuid: impl Into<String>) -> Self {
        Self {
            workflow_id,
            user_id,
            uuid: uuid.into(),
            path: None,
            snippet: Snippet::default(),
            transcript: BTreeMap::new(),
        }
    }

    pub fn transcript(&self, format: TranscriptFormat) -> Option<&str> {
        self.transcript.get(&format).map(String::as_str)
    }
}
