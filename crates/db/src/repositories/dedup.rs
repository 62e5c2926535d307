use chrono::{DateTime, Duration, Utc};

use bookline_core::domain::message::Channel;

use super::{DedupRepository, RepositoryError};
use crate::DbPool;

/// Create-if-absent message marks backing the gateway's at-most-once
/// delivery contract.
pub struct SqlDedupRepository {
    pool: DbPool,
}

impl SqlDedupRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DedupRepository for SqlDedupRepository {
    async fn mark_seen(
        &self,
        channel: Channel,
        message_id: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        // The conditional upsert only steals a mark whose window has lapsed.
        let result = sqlx::query(
            "INSERT INTO dedup_mark (channel, message_id, seen_at, expires_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (channel, message_id) DO UPDATE SET
                seen_at = excluded.seen_at,
                expires_at = excluded.expires_at
             WHERE dedup_mark.expires_at < ?",
        )
        .bind(channel.as_str())
        .bind(message_id)
        .bind(now.to_rfc3339())
        .bind((now + window).to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM dedup_mark WHERE expires_at < ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
