//! User repository: credit balance and stored upload credentials.

use cap_models::{Credentials, User};
use sqlx::FromRow;
use tracing::{info, warn};

use crate::db::{now_millis, Database};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    name: String,
    credentials: Option<String>,
    credit: i64,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let credentials = row.credentials.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(creds) => Some(creds),
            Err(e) => {
                warn!(user_id = row.id, error = %e, "Stored credentials are unreadable, ignoring");
                None
            }
        });

        User {
            id: row.id,
            name: row.name,
            credit: row.credit,
            credentials,
        }
    }
}

/// Repository for the `users` table.
#[derive(Debug, Clone)]
pub struct UserRepository {
    db: Database,
}

impl UserRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        name: &str,
        credit: i64,
        credentials: Option<&Credentials>,
    ) -> StoreResult<i64> {
        let credentials = credentials.map(serde_json::to_string).transpose()?;
        let id = sqlx::query_scalar(
            r"
            INSERT INTO users (name, credentials, credit, create_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            ",
        )
        .bind(name)
        .bind(credentials)
        .bind(credit)
        .bind(now_millis())
        .fetch_one(self.db.pool())
        .await?;
        Ok(id)
    }

    pub async fn get_by_id(&self, user_id: i64) -> StoreResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            r"
            SELECT id, name, credentials, credit
            FROM users
            WHERE id = ?
            ",
        )
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(User::from))
    }

    /// Deduct `minutes` of credit and return the remaining balance.
    pub async fn charge(&self, user_id: i64, minutes: i64) -> StoreResult<i64> {
        if minutes <= 0 {
            return Err(StoreError::invalid_input(format!(
                "charge must be positive, got {minutes}"
            )));
        }

        let remaining: Option<i64> = sqlx::query_scalar(
            r"
            UPDATE users
            SET credit = credit - ?
            WHERE id = ?
            RETURNING credit
            ",
        )
        .bind(minutes)
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;

        let remaining =
            remaining.ok_or_else(|| StoreError::not_found(format!("user {user_id}")))?;

        info!(
            user_id,
            minutes,
            remaining,
            "Charged credits"
        );

        Ok(remaining)
    }
}
