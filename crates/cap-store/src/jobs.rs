//! Job table and claim protocol.
//!
//! Workers are independent processes sharing one database file, so mutual
//! exclusion on claim comes from SQLite's `BEGIN EXCLUSIVE`, never from
//! in-process locks.

use cap_models::{Job, JobId, JobStatus, JobType, WorkflowArgs};
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{Connection, FromRow, QueryBuilder, Sqlite, SqliteConnection};
use tracing::{debug, error, info, warn};

use crate::db::{now_millis, Database};
use crate::error::{StoreError, StoreResult};

/// Longest diagnostic kept in `workflow.error`.
const MAX_REASON_CHARS: usize = 512;

/// A job owned by the calling worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    pub job_id: JobId,
    pub user_id: i64,
    pub args: WorkflowArgs,
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: i64,
    user_id: i64,
    #[sqlx(rename = "type")]
    job_type: i64,
    args: String,
    status: i64,
    create_at: i64,
    update_at: i64,
    error: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> StoreResult<Self> {
        Ok(Job {
            id: JobId(row.id),
            user_id: row.user_id,
            job_type: JobType::from_i64(row.job_type)?,
            args: row.args,
            status: JobStatus::from_i64(row.status)?,
            created_at: DateTime::from_timestamp_millis(row.create_at).unwrap_or_default(),
            updated_at: DateTime::from_timestamp_millis(row.update_at).unwrap_or_default(),
            error: row.error,
        })
    }
}

/// Result of the statements run inside one claim transaction.
enum Attempt {
    Empty,
    Claimed(ClaimedJob),
    /// Payload did not decode; the job was moved to ERROR inside the transaction.
    Rejected { job_id: JobId, message: String },
    Failed {
        job_id: Option<JobId>,
        error: StoreError,
    },
}

fn truncate_reason(reason: &str) -> String {
    reason.chars().take(MAX_REASON_CHARS).collect()
}

/// Guarded status update: only moves the row if it is currently in `from`.
async fn transition(
    conn: &mut SqliteConnection,
    job_id: JobId,
    from: JobStatus,
    to: JobStatus,
    reason: Option<&str>,
) -> StoreResult<()> {
    if !from.can_transition_to(to) {
        return Err(StoreError::InvalidTransition {
            job_id,
            to: to.as_str(),
        });
    }

    let result = sqlx::query(
        r"
        UPDATE workflow
        SET status = ?, update_at = ?, error = COALESCE(?, error)
        WHERE id = ? AND status = ?
        ",
    )
    .bind(to.as_i64())
    .bind(now_millis())
    .bind(reason.map(truncate_reason))
    .bind(job_id.as_i64())
    .bind(from.as_i64())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            job_id,
            to: to.as_str(),
        })
    }
}

async fn claim_in_tx(conn: &mut SqliteConnection, job_type: JobType) -> Attempt {
    let row: Option<(i64, i64, String)> = match sqlx::query_as(
        r"
        SELECT id, user_id, args
        FROM workflow
        WHERE status = ? AND type = ?
        ORDER BY create_at ASC, id ASC
        LIMIT 1
        ",
    )
    .bind(JobStatus::Todo.as_i64())
    .bind(job_type.as_i64())
    .fetch_optional(&mut *conn)
    .await
    {
        Ok(row) => row,
        Err(e) => {
            return Attempt::Failed {
                job_id: None,
                error: e.into(),
            }
        }
    };

    let Some((id, user_id, payload)) = row else {
        return Attempt::Empty;
    };
    let job_id = JobId(id);

    if let Err(error) = transition(conn, job_id, JobStatus::Todo, JobStatus::Locked, None).await {
        return Attempt::Failed {
            job_id: Some(job_id),
            error,
        };
    }

    let args = match WorkflowArgs::decode(job_type, &payload) {
        Ok(args) => args,
        Err(e) => {
            let message = e.to_string();
            if let Err(error) =
                transition(conn, job_id, JobStatus::Locked, JobStatus::Error, Some(&message)).await
            {
                return Attempt::Failed {
                    job_id: Some(job_id),
                    error,
                };
            }
            return Attempt::Rejected { job_id, message };
        }
    };

    if let Err(error) = transition(conn, job_id, JobStatus::Locked, JobStatus::Claimed, None).await {
        return Attempt::Failed {
            job_id: Some(job_id),
            error,
        };
    }

    Attempt::Claimed(ClaimedJob {
        job_id,
        user_id,
        args,
    })
}

async fn commit(conn: &mut SqliteConnection) -> StoreResult<()> {
    sqlx::query("COMMIT").execute(&mut *conn).await?;
    Ok(())
}

/// Job table operations.
#[derive(Debug, Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a pending job created now.
    pub async fn enqueue(&self, user_id: i64, args: &WorkflowArgs) -> StoreResult<JobId> {
        self.enqueue_at(user_id, args, Utc::now()).await
    }

    /// Insert a pending job with an explicit creation time (backfills, replays).
    pub async fn enqueue_at(
        &self,
        user_id: i64,
        args: &WorkflowArgs,
        created_at: DateTime<Utc>,
    ) -> StoreResult<JobId> {
        let payload = args.encode()?;
        let id: i64 = sqlx::query_scalar(
            r"
            INSERT INTO workflow (user_id, type, args, status, create_at, update_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            ",
        )
        .bind(user_id)
        .bind(args.job_type().as_i64())
        .bind(payload)
        .bind(JobStatus::Todo.as_i64())
        .bind(created_at.timestamp_millis())
        .bind(now_millis())
        .fetch_one(self.db.pool())
        .await?;

        let job_id = JobId(id);
        info!(job_id = %job_id, user_id, job_type = %args.job_type(), "Job enqueued");
        Ok(job_id)
    }

    /// Claim the oldest pending job of `job_type`.
    ///
    /// Runs TODO -> LOCKED -> CLAIMED inside one exclusive transaction. Returns
    /// `Ok(None)` when nothing is pending. A payload that does not decode moves
    /// the job to ERROR and surfaces [`StoreError::InvalidArgs`]. Any other
    /// failure after a row was selected rolls back and then moves that job to
    /// ERROR before the error is returned.
    ///
    /// The returned future must be driven to completion: dropping it while the
    /// transaction is open would return a connection holding the write lock.
    pub async fn claim(&self, job_type: JobType) -> StoreResult<Option<ClaimedJob>> {
        let mut conn = self.db.pool().acquire().await?;
        sqlx::query("BEGIN EXCLUSIVE").execute(&mut *conn).await?;

        match claim_in_tx(&mut conn, job_type).await {
            Attempt::Empty => match commit(&mut conn).await {
                Ok(()) => Ok(None),
                Err(e) => {
                    self.abandon(conn, None, &e).await;
                    Err(e)
                }
            },
            Attempt::Claimed(job) => match commit(&mut conn).await {
                Ok(()) => {
                    debug!(job_id = %job.job_id, user_id = job.user_id, "Job claimed");
                    Ok(Some(job))
                }
                Err(e) => {
                    self.abandon(conn, Some(job.job_id), &e).await;
                    Err(e)
                }
            },
            Attempt::Rejected { job_id, message } => match commit(&mut conn).await {
                Ok(()) => {
                    warn!(job_id = %job_id, error = %message, "Job arguments rejected");
                    Err(StoreError::InvalidArgs { job_id, message })
                }
                Err(e) => {
                    self.abandon(conn, Some(job_id), &e).await;
                    Err(e)
                }
            },
            Attempt::Failed { job_id, error } => {
                self.abandon(conn, job_id, &error).await;
                Err(error)
            }
        }
    }

    /// Roll back an open claim transaction, then move the selected job (if
    /// any) to ERROR in a follow-up statement.
    async fn abandon(&self, mut conn: PoolConnection<Sqlite>, job_id: Option<JobId>, cause: &StoreError) {
        if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
            error!(error = %e, "Rollback failed, discarding connection");
            if let Err(e) = conn.detach().close().await {
                warn!(error = %e, "Failed to close discarded connection");
            }
        } else {
            drop(conn);
        }

        if let Some(job_id) = job_id {
            match self.mark_error(job_id, &cause.to_string()).await {
                Ok(_) => warn!(job_id = %job_id, error = %cause, "Claim failed, job moved to error"),
                Err(e) => error!(job_id = %job_id, error = %e, "Claim failed and job could not be marked"),
            }
        }
    }

    /// CLAIMED -> WORKING.
    pub async fn mark_working(&self, job_id: JobId) -> StoreResult<()> {
        let mut conn = self.db.pool().acquire().await?;
        transition(&mut conn, job_id, JobStatus::Claimed, JobStatus::Working, None).await
    }

    /// Move a held job to DONE. Returns `false` if the job was not held, which
    /// makes repeated calls no-ops.
    pub async fn mark_done(&self, job_id: JobId) -> StoreResult<bool> {
        self.settle(job_id, JobStatus::Done, None).await
    }

    /// Move a non-terminal job to FAILED with a short diagnostic.
    pub async fn mark_failed(&self, job_id: JobId, reason: &str) -> StoreResult<bool> {
        self.settle(job_id, JobStatus::Failed, Some(reason)).await
    }

    /// Move a non-terminal job to ERROR with a short diagnostic.
    pub async fn mark_error(&self, job_id: JobId, reason: &str) -> StoreResult<bool> {
        self.settle(job_id, JobStatus::Error, Some(reason)).await
    }

    /// Move a job into a terminal state from any state allowed to reach it.
    async fn settle(&self, job_id: JobId, to: JobStatus, reason: Option<&str>) -> StoreResult<bool> {
        let mut query = QueryBuilder::<Sqlite>::new("UPDATE workflow SET status = ");
        query
            .push_bind(to.as_i64())
            .push(", update_at = ")
            .push_bind(now_millis())
            .push(", error = COALESCE(")
            .push_bind(reason.map(truncate_reason))
            .push(", error) WHERE id = ")
            .push_bind(job_id.as_i64())
            .push(" AND status IN (");
        let mut allowed = query.separated(", ");
        for from in to.predecessors() {
            allowed.push_bind(from.as_i64());
        }
        allowed.push_unseparated(")");

        let result = query.build().execute(self.db.pool()).await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, job_id: JobId) -> StoreResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as(
            r"
            SELECT id, user_id, type, args, status, create_at, update_at, error
            FROM workflow
            WHERE id = ?
            ",
        )
        .bind(job_id.as_i64())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(Job::try_from).transpose()
    }

    pub async fn count_by_status(&self, status: JobStatus) -> StoreResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM workflow WHERE status = ?")
            .bind(status.as_i64())
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }
}
