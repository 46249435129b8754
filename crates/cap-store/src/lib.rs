//! SQLite-backed job store.
//!
//! This crate provides:
//! - An owned [`Database`] handle with schema creation
//! - [`JobStore`]: the workflow table and its exclusive claim protocol
//! - [`UserRepository`]: credit balance and stored upload credentials
//! - [`VideoRepository`]: per-job video records

pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod users;
pub mod videos;

pub use config::StoreConfig;
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use jobs::{ClaimedJob, JobStore};
pub use users::UserRepository;
pub use videos::VideoRepository;
