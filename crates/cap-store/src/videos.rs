//! Video record repository.

use std::collections::BTreeMap;

use cap_models::{JobId, Snippet, TranscriptFormat, VideoRecord};
use sqlx::FromRow;
use tracing::debug;

use crate::db::{now_millis, Database};
use crate::error::StoreResult;

#[derive(Debug, FromRow)]
struct VideoRow {
    workflow_id: i64,
    user_id: i64,
    uuid: String,
    snippet: String,
    transcript: String,
}

impl TryFrom<VideoRow> for VideoRecord {
    type Error = crate::StoreError;

    fn try_from(row: VideoRow) -> StoreResult<Self> {
        let snippet: Snippet = serde_json::from_str(&row.snippet)?;
        let transcript: BTreeMap<TranscriptFormat, String> = serde_json::from_str(&row.transcript)?;
        Ok(VideoRecord {
            workflow_id: JobId(row.workflow_id),
            user_id: row.user_id,
            uuid: row.uuid,
            path: None,
            snippet,
            transcript,
        })
    }
}

/// Repository for the `video` table, keyed by workflow id.
#[derive(Debug, Clone)]
pub struct VideoRepository {
    db: Database,
}

impl VideoRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the record for its workflow.
    pub async fn save(&self, record: &VideoRecord) -> StoreResult<()> {
        let snippet = serde_json::to_string(&record.snippet)?;
        let transcript = serde_json::to_string(&record.transcript)?;

        sqlx::query(
            r"
            INSERT INTO video (workflow_id, user_id, uuid, snippet, transcript, create_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (workflow_id) DO UPDATE
            SET snippet = excluded.snippet,
                transcript = excluded.transcript
            ",
        )
        .bind(record.workflow_id.as_i64())
        .bind(record.user_id)
        .bind(&record.uuid)
        .bind(snippet)
        .bind(transcript)
        .bind(now_millis())
        .execute(self.db.pool())
        .await?;

        debug!(workflow_id = %record.workflow_id, uuid = %record.uuid, "Video record saved");
        Ok(())
    }

    pub async fn get(&self, workflow_id: JobId) -> StoreResult<Option<VideoRecord>> {
        let row: Option<VideoRow> = sqlx::query_as(
            r"
            SELECT workflow_id, user_id, uuid, snippet, transcript
            FROM video
            WHERE workflow_id = ?
            ",
        )
        .bind(workflow_id.as_i64())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(VideoRecord::try_from).transpose()
    }
}
