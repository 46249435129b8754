//! Workflow handlers and their registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cap_models::{JobId, JobType, User, WorkflowArgs};

use crate::error::WorkerResult;

/// What happened to the optional caption upload of a completed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    NotRequested,
    Uploaded { caption_id: String },
    /// The upload failed; the job still completes
    Failed { reason: String },
}

/// Result of a handler run that did not error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { upload: UploadStatus },
    /// The user cannot pay for the video; nothing was transcribed or charged
    InsufficientCredit { required: i64, available: i64 },
    /// Follow-up jobs were queued; they run and are charged on their own
    Enqueued { job_ids: Vec<JobId> },
}

/// Executes one workflow type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn execute(&self, job_id: JobId, user: &User, args: WorkflowArgs) -> WorkerResult<JobOutcome>;
}

/// Handlers keyed by job type, polled in registration order.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
    order: Vec<JobType>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Register a handler, replacing any previous one for the same type.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let job_type = handler.job_type();
        if self.handlers.insert(job_type, handler).is_none() {
            self.order.push(job_type);
        }
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    pub fn job_types(&self) -> &[JobType] {
        &self.order
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.order)
            .finish()
    }
}
