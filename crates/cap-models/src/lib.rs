//! Shared data models for the caption workflow.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their status codes and type tags
//! - Typed job arguments and their stored payload
//! - Video records and transcript formats
//! - Users, credentials and credit arithmetic

pub mod args;
pub mod error;
pub mod job;
pub mod user;
pub mod video;

// Re-export common types
pub use args::{ChannelArgs, SingleVideoArgs, WorkflowArgs};
pub use error::{ModelError, ModelResult};
pub use job::{Job, JobId, JobStatus, JobType};
pub use user::{credit_minutes, Credentials, User};
pub use video::{Snippet, TranscriptFormat, VideoRecord};
