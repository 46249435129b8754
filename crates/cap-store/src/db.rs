//! Database handle and schema.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use tracing::info;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

/// Tables are created on startup if absent. Timestamps are unix milliseconds.
const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS workflow (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        type INTEGER NOT NULL,
        args TEXT NOT NULL,
        status INTEGER NOT NULL DEFAULT 1,
        create_at INTEGER NOT NULL,
        update_at INTEGER NOT NULL,
        error TEXT
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_workflow_claim
        ON workflow (status, type, create_at, id)
    ",
    r"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        credentials TEXT,
        credit INTEGER NOT NULL DEFAULT 0,
        create_at INTEGER NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS video (
        workflow_id INTEGER PRIMARY KEY,
        user_id INTEGER NOT NULL,
        uuid TEXT NOT NULL,
        snippet TEXT NOT NULL,
        transcript TEXT NOT NULL,
        create_at INTEGER NOT NULL
    )
    ",
];

/// Owned handle to the job store.
///
/// Cloning is cheap and shares the underlying pool. Connections are checked
/// out per statement or per claim transaction and never held across external
/// calls.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database described by `config`.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| StoreError::connection_failed(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::connection_failed(e.to_string()))?;

        info!(
            url = %config.database_url,
            max_connections = config.max_connections,
            "Connected to job store"
        );

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and indexes.
    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Job store closed");
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// Fresh migrated database in a temp directory. Keep the `TempDir` alive.
    pub async fn test_db() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            max_connections: 8,
            ..StoreConfig::for_path(dir.path().join("workflow.db"))
        };
        let db = Database::connect(&config).await.unwrap();
        db.migrate().await.unwrap();
        (dir, db)
    }
}
