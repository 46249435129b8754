//! Claim-and-dispatch loop.
//!
//! One runner processes one job at a time. Several runners, in this process
//! or others, may share a store; the store's claim transaction keeps them from
//! taking the same job.

use std::sync::Arc;
use std::time::Duration;

use cap_models::{JobId, JobType};
use cap_store::{ClaimedJob, JobStore, StoreError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::collaborators::UserProvider;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::handler::{HandlerRegistry, JobOutcome, UploadStatus};
use crate::logging::JobLogger;
use crate::metrics;

/// Result of one [`WorkflowRunner::start`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No pending job of any registered type
    Idle,
    Completed {
        job_id: JobId,
        upload: UploadStatus,
    },
    InsufficientCredit {
        job_id: JobId,
        required: i64,
        available: i64,
    },
    /// The job queued follow-up jobs and is done
    Enqueued {
        job_id: JobId,
        children: Vec<JobId>,
    },
    Failed {
        job_id: JobId,
        kind: &'static str,
        reason: String,
    },
}

pub struct WorkflowRunner {
    name: String,
    jobs: JobStore,
    users: Arc<dyn UserProvider>,
    handlers: HandlerRegistry,
    poll_interval: Duration,
    error_backoff: Duration,
    finalize_attempts: u32,
}

/// Final state recorded for a processed job.
#[derive(Debug, Clone, Copy)]
enum Finish<'a> {
    Done,
    Failed(&'a str),
}

impl Finish<'_> {
    fn label(&self) -> &'static str {
        match self {
            Finish::Done => "done",
            Finish::Failed(_) => "failure",
        }
    }
}

impl WorkflowRunner {
    pub fn new(jobs: JobStore, users: Arc<dyn UserProvider>, handlers: HandlerRegistry) -> Self {
        let defaults = WorkerConfig::default();
        Self {
            name: format!("worker-{}", Uuid::new_v4().simple()),
            jobs,
            users,
            handlers,
            poll_interval: defaults.poll_interval,
            error_backoff: defaults.error_backoff,
            finalize_attempts: defaults.finalize_attempts,
        }
    }

    /// Take the loop intervals from `config`.
    pub fn with_config(mut self, config: &WorkerConfig) -> Self {
        self.poll_interval = config.poll_interval;
        self.error_backoff = config.error_backoff;
        self.finalize_attempts = config.finalize_attempts.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Claim and process at most one job.
    ///
    /// Job failures are reported as [`RunOutcome::Failed`]; only store
    /// failures outside a job's own processing are returned as errors.
    pub async fn start(&self) -> WorkerResult<RunOutcome> {
        for &job_type in self.handlers.job_types() {
            match self.jobs.claim(job_type).await {
                Ok(Some(job)) => {
                    metrics::record_job_claimed(job_type.as_str());
                    let logger = JobLogger::new(job.job_id, job_type, job.args.subject());
                    let span = logger.create_span();
                    return self.process(job_type, job, logger).instrument(span).await;
                }
                Ok(None) => continue,
                Err(StoreError::InvalidArgs { job_id, message }) => {
                    metrics::record_job_failed(job_type.as_str(), "bad_request");
                    return Ok(RunOutcome::Failed {
                        job_id,
                        kind: "bad_request",
                        reason: message,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(RunOutcome::Idle)
    }

    async fn process(&self, job_type: JobType, job: ClaimedJob, logger: JobLogger) -> WorkerResult<RunOutcome> {
        let job_id = job.job_id;
        logger.log_start(&format!("claimed by {} for user {}", self.name, job.user_id));
        let started = Instant::now();

        match self.execute(job_type, job).await {
            Ok(JobOutcome::Completed { upload }) => {
                if let Some(reason) = self.finalize(job_id, Finish::Done).await? {
                    return Ok(self.unrecorded(job_type, job_id, reason));
                }
                metrics::record_job_completed(job_type.as_str(), started.elapsed());
                logger.log_completion(&format!("upload {}", upload_label(&upload)));
                Ok(RunOutcome::Completed { job_id, upload })
            }
            Ok(JobOutcome::Enqueued { job_ids }) => {
                if let Some(reason) = self.finalize(job_id, Finish::Done).await? {
                    return Ok(self.unrecorded(job_type, job_id, reason));
                }
                metrics::record_job_completed(job_type.as_str(), started.elapsed());
                logger.log_completion(&format!("queued {} jobs", job_ids.len()));
                Ok(RunOutcome::Enqueued {
                    job_id,
                    children: job_ids,
                })
            }
            Ok(JobOutcome::InsufficientCredit { required, available }) => {
                let reason =
                    format!("insufficient credit: requires {required} minutes, {available} available");
                if let Some(reason) = self.finalize(job_id, Finish::Failed(&reason)).await? {
                    return Ok(self.unrecorded(job_type, job_id, reason));
                }
                metrics::record_insufficient_credit(job_type.as_str());
                logger.log_warning(&reason);
                Ok(RunOutcome::InsufficientCredit {
                    job_id,
                    required,
                    available,
                })
            }
            Err(e) => {
                let kind = e.kind();
                let reason = e.reason();
                logger.log_error(kind, &e.to_string());
                if let Some(reason) = self.finalize(job_id, Finish::Failed(&reason)).await? {
                    return Ok(self.unrecorded(job_type, job_id, reason));
                }
                metrics::record_job_failed(job_type.as_str(), kind);
                Ok(RunOutcome::Failed { job_id, kind, reason })
            }
        }
    }

    /// Record the job's final state, retrying store errors after
    /// `error_backoff`. When every attempt fails the job is moved to ERROR
    /// instead and the returned reason says why.
    async fn finalize(&self, job_id: JobId, finish: Finish<'_>) -> WorkerResult<Option<String>> {
        let mut attempt = 1;
        loop {
            let recorded = match finish {
                Finish::Done => self.jobs.mark_done(job_id).await,
                Finish::Failed(reason) => self.jobs.mark_failed(job_id, reason).await,
            };

            match recorded {
                Ok(true) => return Ok(None),
                Ok(false) => {
                    warn!(job_id = %job_id, "Job was no longer held when recording {}", finish.label());
                    return Ok(None);
                }
                Err(e) if attempt < self.finalize_attempts => {
                    warn!(
                        job_id = %job_id,
                        attempt,
                        busy = e.is_busy(),
                        error = %e,
                        "Failed to record job {}, retrying",
                        finish.label()
                    );
                    attempt += 1;
                    tokio::time::sleep(self.error_backoff).await;
                }
                Err(e) => {
                    let reason = format!("could not record {}: {e}", finish.label());
                    return match self.jobs.mark_error(job_id, &reason).await {
                        Ok(_) => {
                            error!(job_id = %job_id, error = %e, "Job moved to error after {attempt} attempts");
                            Ok(Some(reason))
                        }
                        Err(fallback) => {
                            error!(job_id = %job_id, error = %fallback, "Job could not be moved to error");
                            Err(fallback.into())
                        }
                    };
                }
            }
        }
    }

    fn unrecorded(&self, job_type: JobType, job_id: JobId, reason: String) -> RunOutcome {
        metrics::record_job_failed(job_type.as_str(), "store");
        RunOutcome::Failed {
            job_id,
            kind: "store",
            reason,
        }
    }

    async fn execute(&self, job_type: JobType, job: ClaimedJob) -> WorkerResult<JobOutcome> {
        let handler = self
            .handlers
            .get(job_type)
            .ok_or_else(|| WorkerError::unknown(format!("no handler for {job_type}")))?;

        let user = self
            .users
            .get_user(job.user_id)
            .await?
            .ok_or_else(|| WorkerError::bad_request(format!("user {} not found", job.user_id)))?;

        self.jobs.mark_working(job.job_id).await?;
        handler.execute(job.job_id, &user, job.args).await
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Shutdown is only observed between jobs.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            worker = %self.name,
            job_types = ?self.handlers.job_types(),
            poll_interval_secs = self.poll_interval.as_secs_f64(),
            "Workflow runner started"
        );

        while !*shutdown.borrow() {
            let pause = match self.start().await {
                Ok(RunOutcome::Idle) => {
                    debug!("No pending jobs");
                    self.poll_interval
                }
                Ok(_) => Duration::ZERO,
                Err(e) => {
                    error!(worker = %self.name, error = %e, "Runner iteration failed");
                    self.error_backoff
                }
            };

            if pause.is_zero() {
                continue;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!(worker = %self.name, "Workflow runner stopped");
    }
}

fn upload_label(upload: &UploadStatus) -> &'static str {
    match upload {
        UploadStatus::NotRequested => "not requested",
        UploadStatus::Uploaded { .. } => "succeeded",
        UploadStatus::Failed { .. } => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockUserProvider;
    use crate::handler::JobHandler;
    use async_trait::async_trait;
    use cap_models::{JobStatus, SingleVideoArgs, User, WorkflowArgs};
    use cap_store::{Database, StoreConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    async fn store() -> (TempDir, JobStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(&StoreConfig::for_path(dir.path().join("workflow.db")))
            .await
            .unwrap();
        db.migrate().await.unwrap();
        (dir, JobStore::new(db))
    }

    /// Store whose DONE updates abort while `finalize_gate` has a row.
    async fn gated_store() -> (TempDir, Database, JobStore) {
        let (dir, jobs) = store().await;
        let db = Database::connect(&StoreConfig::for_path(dir.path().join("workflow.db")))
            .await
            .unwrap();
        for statement in [
            "CREATE TABLE finalize_gate (closed INTEGER NOT NULL)",
            "INSERT INTO finalize_gate (closed) VALUES (1)",
            r"
            CREATE TRIGGER hold_done BEFORE UPDATE OF status ON workflow
            WHEN NEW.status = 7 AND EXISTS (SELECT 1 FROM finalize_gate)
            BEGIN
                SELECT RAISE(ABORT, 'finalize gate closed');
            END
            ",
        ] {
            sqlx::query(statement).execute(db.pool()).await.unwrap();
        }
        (dir, db, jobs)
    }

    fn alice() -> User {
        User {
            id: 1,
            name: "alice".into(),
            credit: 10,
            credentials: None,
        }
    }

    fn users_with(user: Option<User>) -> Arc<dyn UserProvider> {
        let mut users = MockUserProvider::new();
        users.expect_get_user().returning(move |_| Ok(user.clone()));
        Arc::new(users)
    }

    struct Scripted {
        outcome: fn() -> WorkerResult<JobOutcome>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(outcome: fn() -> WorkerResult<JobOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl JobHandler for Scripted {
        fn job_type(&self) -> JobType {
            JobType::SingleVideo
        }

        async fn execute(&self, _: JobId, _: &User, _: WorkflowArgs) -> WorkerResult<JobOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn completed() -> WorkerResult<JobOutcome> {
        Ok(JobOutcome::Completed {
            upload: UploadStatus::NotRequested,
        })
    }

    #[tokio::test]
    async fn test_idle_when_queue_empty() {
        let (_dir, jobs) = store().await;
        let runner = WorkflowRunner::new(
            jobs,
            users_with(Some(alice())),
            HandlerRegistry::new().with(Scripted::new(completed)),
        );

        assert_eq!(runner.start().await.unwrap(), RunOutcome::Idle);
    }

    #[tokio::test]
    async fn test_completed_job_is_done() {
        let (_dir, jobs) = store().await;
        let job_id = jobs
            .enqueue(1, &SingleVideoArgs::new("abc").into())
            .await
            .unwrap();
        let handler = Scripted::new(completed);
        let runner = WorkflowRunner::new(
            jobs.clone(),
            users_with(Some(alice())),
            HandlerRegistry::new().with(handler.clone()),
        );

        let outcome = runner.start().await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Completed {
                job_id,
                upload: UploadStatus::NotRequested
            }
        );
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(jobs.get(job_id).await.unwrap().unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_done_is_retried_until_recorded() {
        let (_dir, db, jobs) = gated_store().await;
        let job_id = jobs
            .enqueue(1, &SingleVideoArgs::new("abc").into())
            .await
            .unwrap();
        let runner = WorkflowRunner::new(
            jobs.clone(),
            users_with(Some(alice())),
            HandlerRegistry::new().with(Scripted::new(completed)),
        )
        .with_config(&WorkerConfig {
            error_backoff: Duration::from_millis(100),
            finalize_attempts: 20,
            ..Default::default()
        });

        let opener = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            sqlx::query("DELETE FROM finalize_gate")
                .execute(db.pool())
                .await
                .unwrap();
        });

        let outcome = runner.start().await.unwrap();
        opener.await.unwrap();

        assert!(matches!(outcome, RunOutcome::Completed { job_id: id, .. } if id == job_id));
        assert_eq!(jobs.get(job_id).await.unwrap().unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_unrecordable_done_moves_job_to_error() {
        let (_dir, _db, jobs) = gated_store().await;
        let job_id = jobs
            .enqueue(1, &SingleVideoArgs::new("abc").into())
            .await
            .unwrap();
        let runner = WorkflowRunner::new(
            jobs.clone(),
            users_with(Some(alice())),
            HandlerRegistry::new().with(Scripted::new(completed)),
        )
        .with_config(&WorkerConfig {
            error_backoff: Duration::from_millis(10),
            finalize_attempts: 2,
            ..Default::default()
        });

        let outcome = runner.start().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed { kind: "store", ref reason, .. }
            if reason.contains("finalize gate closed")));

        let job = jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error.unwrap().starts_with("could not record done"));
        assert_eq!(runner.start().await.unwrap(), RunOutcome::Idle);
    }

    #[tokio::test]
    async fn test_enqueued_job_is_done() {
        let (_dir, jobs) = store().await;
        let job_id = jobs
            .enqueue(1, &SingleVideoArgs::new("abc").into())
            .await
            .unwrap();
        let runner = WorkflowRunner::new(
            jobs.clone(),
            users_with(Some(alice())),
            HandlerRegistry::new().with(Scripted::new(|| {
                Ok(JobOutcome::Enqueued {
                    job_ids: vec![JobId(40), JobId(41)],
                })
            })),
        );

        let outcome = runner.start().await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Enqueued {
                job_id,
                children: vec![JobId(40), JobId(41)]
            }
        );
        assert_eq!(jobs.get(job_id).await.unwrap().unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_handler_error_fails_job_with_kind() {
        let (_dir, jobs) = store().await;
        let job_id = jobs
            .enqueue(1, &SingleVideoArgs::new("abc").into())
            .await
            .unwrap();
        let runner = WorkflowRunner::new(
            jobs.clone(),
            users_with(Some(alice())),
            HandlerRegistry::new().with(Scripted::new(|| Err(WorkerError::timeout("download")))),
        );

        let outcome = runner.start().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed { kind: "timeout", .. }));

        let job = jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().starts_with("timeout:"));
    }

    #[tokio::test]
    async fn test_insufficient_credit_outcome() {
        let (_dir, jobs) = store().await;
        let job_id = jobs
            .enqueue(1, &SingleVideoArgs::new("abc").into())
            .await
            .unwrap();
        let runner = WorkflowRunner::new(
            jobs.clone(),
            users_with(Some(alice())),
            HandlerRegistry::new().with(Scripted::new(|| {
                Ok(JobOutcome::InsufficientCredit {
                    required: 7,
                    available: 5,
                })
            })),
        );

        let outcome = runner.start().await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::InsufficientCredit {
                job_id,
                required: 7,
                available: 5
            }
        );
        let job = jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("insufficient credit"));
    }

    #[tokio::test]
    async fn test_missing_user_fails_without_running_handler() {
        let (_dir, jobs) = store().await;
        let job_id = jobs
            .enqueue(99, &SingleVideoArgs::new("abc").into())
            .await
            .unwrap();
        let handler = Scripted::new(completed);
        let runner = WorkflowRunner::new(
            jobs.clone(),
            users_with(None),
            HandlerRegistry::new().with(handler.clone()),
        );

        let outcome = runner.start().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed { kind: "bad_request", .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(jobs.get(job_id).await.unwrap().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_run_drains_queue_and_stops_on_shutdown() {
        let (_dir, jobs) = store().await;
        for uuid in ["a", "b", "c"] {
            jobs.enqueue(1, &SingleVideoArgs::new(uuid).into()).await.unwrap();
        }
        let runner = Arc::new(
            WorkflowRunner::new(
                jobs.clone(),
                users_with(Some(alice())),
                HandlerRegistry::new().with(Scripted::new(completed)),
            )
            .with_config(&WorkerConfig {
                poll_interval: Duration::from_millis(20),
                ..Default::default()
            }),
        );

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn({
            let runner = runner.clone();
            async move { runner.run(rx).await }
        });

        for _ in 0..100 {
            if jobs.count_by_status(JobStatus::Done).await.unwrap() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(jobs.count_by_status(JobStatus::Done).await.unwrap(), 3);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
