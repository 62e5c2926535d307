use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use bookline_core::collab::{EnqueueError, OutboundEnqueuer};
use bookline_core::domain::message::{
    Channel, DeliveryStatus, OutboundMessage, OutboundMessageId, Priority,
};

use super::{parse_timestamp, parse_u32, OutboundRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOutboundRepository {
    pool: DbPool,
}

impl SqlOutboundRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn dead_letters(&self, channel: Channel) -> Result<Vec<DeadLetter>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, channel, destination, body, priority, attempt_count, final_error,
                    correlation_id, created_at, dead_lettered_at
             FROM dead_letter WHERE channel = ?
             ORDER BY dead_lettered_at ASC",
        )
        .bind(channel.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(dead_letter_from_row).collect()
    }
}

/// A message that exhausted its retries, with the final error attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetter {
    pub id: OutboundMessageId,
    pub channel: Channel,
    pub destination: String,
    pub body: String,
    pub priority: Priority,
    pub attempt_count: u32,
    pub final_error: String,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

#[async_trait::async_trait]
impl OutboundRepository for SqlOutboundRepository {
    async fn enqueue(&self, message: &OutboundMessage) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO outbound_queue (
                id, channel, destination, body, priority, attempt_count,
                next_attempt_at, status, last_error, correlation_id,
                created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id.0)
        .bind(message.channel.as_str())
        .bind(&message.destination)
        .bind(&message.body)
        .bind(message.priority.as_i64())
        .bind(i64::from(message.attempt_count))
        .bind(message.next_attempt_at.to_rfc3339())
        .bind(message.status.as_str())
        .bind(message.last_error.as_deref())
        .bind(&message.correlation_id)
        .bind(message.created_at.to_rfc3339())
        .bind(message.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn due(
        &self,
        channel: Channel,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OutboundMessage>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, channel, destination, body, priority, attempt_count,
                    next_attempt_at, status, last_error, correlation_id,
                    created_at, updated_at
             FROM outbound_queue
             WHERE channel = ? AND status = 'pending' AND next_attempt_at <= ?
             ORDER BY priority ASC, created_at ASC
             LIMIT ?",
        )
        .bind(channel.as_str())
        .bind(now.to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn mark_sent(
        &self,
        id: &OutboundMessageId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE outbound_queue SET status = 'sent', updated_at = ? WHERE id = ?",
        )
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: &OutboundMessageId,
        attempt_count: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE outbound_queue
             SET attempt_count = ?, next_attempt_at = ?, last_error = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(i64::from(attempt_count))
        .bind(next_attempt_at.to_rfc3339())
        .bind(error)
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dead_letter(
        &self,
        message: &OutboundMessage,
        final_error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO dead_letter (
                id, channel, destination, body, priority, attempt_count,
                final_error, correlation_id, created_at, dead_lettered_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id.0)
        .bind(message.channel.as_str())
        .bind(&message.destination)
        .bind(&message.body)
        .bind(message.priority.as_i64())
        .bind(i64::from(message.attempt_count))
        .bind(final_error)
        .bind(&message.correlation_id)
        .bind(message.created_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM outbound_queue WHERE id = ?")
            .bind(&message.id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn dead_letter_depth(&self) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS depth FROM dead_letter")
            .fetch_one(&self.pool)
            .await?;
        let depth: i64 = row.try_get("depth")?;
        Ok(depth.max(0) as u64)
    }
}

/// The runtime's handle onto the queue: same insert, error flattened to the
/// boundary type.
#[async_trait::async_trait]
impl OutboundEnqueuer for SqlOutboundRepository {
    async fn enqueue(&self, message: OutboundMessage) -> Result<(), EnqueueError> {
        OutboundRepository::enqueue(self, &message)
            .await
            .map_err(|error| EnqueueError(error.to_string()))
    }
}

fn message_from_row(row: SqliteRow) -> Result<OutboundMessage, RepositoryError> {
    let channel_raw = row.try_get::<String, _>("channel")?;
    let channel = Channel::parse(&channel_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown channel `{channel_raw}`")))?;

    let priority_raw = row.try_get::<i64, _>("priority")?;
    let priority = Priority::from_i64(priority_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown priority `{priority_raw}`")))?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = DeliveryStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown status `{status_raw}`")))?;

    Ok(OutboundMessage {
        id: OutboundMessageId(row.try_get("id")?),
        channel,
        destination: row.try_get("destination")?,
        body: row.try_get("body")?,
        priority,
        attempt_count: parse_u32("attempt_count", row.try_get("attempt_count")?)?,
        next_attempt_at: parse_timestamp("next_attempt_at", row.try_get("next_attempt_at")?)?,
        status,
        last_error: row.try_get("last_error")?,
        correlation_id: row.try_get("correlation_id")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn dead_letter_from_row(row: SqliteRow) -> Result<DeadLetter, RepositoryError> {
    let channel_raw = row.try_get::<String, _>("channel")?;
    let channel = Channel::parse(&channel_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown channel `{channel_raw}`")))?;
    let priority_raw = row.try_get::<i64, _>("priority")?;
    let priority = Priority::from_i64(priority_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown priority `{priority_raw}`")))?;

    Ok(DeadLetter {
        id: OutboundMessageId(row.try_get("id")?),
        channel,
        destination: row.try_get("destination")?,
        body: row.try_get("body")?,
        priority,
        attempt_count: parse_u32("attempt_count", row.try_get("attempt_count")?)?,
        final_error: row.try_get("final_error")?,
        correlation_id: row.try_get("correlation_id")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        dead_lettered_at: parse_timestamp("dead_lettered_at", row.try_get("dead_lettered_at")?)?,
    })
}
