//! Job definitions for the workflow table.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ModelError, ModelResult};

/// Unique identifier for a job (the `workflow.id` row id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a job, persisted as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed
    #[default]
    Todo = 1,
    /// Selected inside a claim transaction
    Locked = 2,
    /// Owned by exactly one worker
    Claimed = 3,
    /// Handler is running
    Working = 4,
    /// Infrastructure or payload failure
    Error = 5,
    /// Handler failure
    Failed = 6,
    /// Completed successfully
    Done = 7,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Todo,
        JobStatus::Locked,
        JobStatus::Claimed,
        JobStatus::Working,
        JobStatus::Error,
        JobStatus::Failed,
        JobStatus::Done,
    ];

    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    pub fn from_i64(code: i64) -> ModelResult<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.as_i64() == code)
            .ok_or(ModelError::UnknownStatus(code))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Todo => "todo",
            JobStatus::Locked => "locked",
            JobStatus::Claimed => "claimed",
            JobStatus::Working => "working",
            JobStatus::Error => "error",
            JobStatus::Failed => "failed",
            JobStatus::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Error | JobStatus::Failed | JobStatus::Done)
    }

    /// Owned by a worker: at most one worker may hold a job in these states.
    pub fn is_held(&self) -> bool {
        matches!(self, JobStatus::Locked | JobStatus::Claimed | JobStatus::Working)
    }

    /// Forward-only state machine.
    ///
    /// The happy path is TODO -> LOCKED -> CLAIMED -> WORKING -> DONE. ERROR and
    /// FAILED are reachable from any non-terminal state. Terminal states never move.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobStatus::Error | JobStatus::Failed => true,
            JobStatus::Locked => *self == JobStatus::Todo,
            JobStatus::Claimed => *self == JobStatus::Locked,
            JobStatus::Working => *self == JobStatus::Claimed,
            JobStatus::Done => self.is_held(),
            JobStatus::Todo => false,
        }
    }

    /// States a job may be in for a guarded update to `self`.
    pub fn predecessors(self) -> impl Iterator<Item = JobStatus> {
        Self::ALL
            .into_iter()
            .filter(move |from| from.can_transition_to(self))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job type tag, persisted as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Download, transcribe and optionally re-upload captions for one video
    SingleVideo = 1,
    /// List a channel's latest videos and enqueue one single-video job each
    Channel = 2,
}

impl JobType {
    pub const ALL: [JobType; 2] = [JobType::SingleVideo, JobType::Channel];

    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    pub fn from_i64(code: i64) -> ModelResult<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_i64() == code)
            .ok_or(ModelError::UnknownJobType(code))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::SingleVideo => "single_video",
            JobType::Channel => "channel",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of the workflow table.
///
/// `args` is kept as the opaque stored payload; it is only decoded into a typed
/// shape when the job is claimed.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,
    pub user_id: i64,
    pub job_type: JobType,
    pub args: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Diagnostic recorded when the job ended in ERROR or FAILED
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_roundtrip() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::from_i64(status.as_i64()).unwrap(), status);
        }
        assert_eq!(JobStatus::Todo.as_i64(), 1);
        assert_eq!(JobStatus::Done.as_i64(), 7);
        assert!(matches!(JobStatus::from_i64(42), Err(ModelError::UnknownStatus(42))));
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(JobStatus::Todo.can_transition_to(JobStatus::Locked));
        assert!(JobStatus::Locked.can_transition_to(JobStatus::Claimed));
        assert!(JobStatus::Claimed.can_transition_to(JobStatus::Working));
        assert!(JobStatus::Working.can_transition_to(JobStatus::Done));
    }

    #[test]
    fn test_no_backward_or_skipping_transitions() {
        assert!(!JobStatus::Claimed.can_transition_to(JobStatus::Todo));
        assert!(!JobStatus::Todo.can_transition_to(JobStatus::Claimed));
        assert!(!JobStatus::Todo.can_transition_to(JobStatus::Done));
        assert!(!JobStatus::Working.can_transition_to(JobStatus::Locked));
    }

    #[test]
    fn test_failure_reachable_from_non_terminal() {
        for status in JobStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(status.can_transition_to(JobStatus::Error), "{status}");
            assert!(status.can_transition_to(JobStatus::Failed), "{status}");
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for status in [JobStatus::Error, JobStatus::Failed, JobStatus::Done] {
            assert!(status.is_terminal());
            for next in JobStatus::ALL {
                assert!(!status.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_predecessors_follow_state_machine() {
        let done: Vec<_> = JobStatus::Done.predecessors().collect();
        assert_eq!(done, vec![JobStatus::Locked, JobStatus::Claimed, JobStatus::Working]);

        let failed: Vec<_> = JobStatus::Failed.predecessors().collect();
        assert_eq!(
            failed,
            vec![JobStatus::Todo, JobStatus::Locked, JobStatus::Claimed, JobStatus::Working]
        );

        assert_eq!(JobStatus::Todo.predecessors().count(), 0);
    }

    #[test]
    fn test_job_type_codes() {
        assert_eq!(JobType::SingleVideo.as_i64(), 1);
        assert_eq!(JobType::from_i64(1).unwrap(), JobType::SingleVideo);
        assert_eq!(JobType::from_i64(2).unwrap(), JobType::Channel);
        assert!(JobType::from_i64(0).is_err());
    }
}
