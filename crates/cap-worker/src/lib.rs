//! Caption workflow worker.
//!
//! This crate provides:
//! - The claim-and-dispatch runner loop
//! - Handler registry keyed by job type
//! - The single-video caption pipeline
//! - Channel fan-out into single-video jobs
//! - Collaborator traits over the media, transcription and upload clients

pub mod channel;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod runner;

pub use channel::ChannelHandler;
pub use collaborators::{
    Acquirer, CaptionJob, CaptionUploader, CreditStore, JobSubmitter, Transcriber, TranscriptionJob,
    UserProvider, VideoLister, VideoStore,
};
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use handler::{HandlerRegistry, JobHandler, JobOutcome, UploadStatus};
pub use logging::JobLogger;
pub use pipeline::{Collaborators, SingleVideoHandler};
pub use runner::{RunOutcome, WorkflowRunner};
