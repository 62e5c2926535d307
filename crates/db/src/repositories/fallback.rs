use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use bookline_core::domain::booking::BookingRequest;
use bookline_core::domain::message::Channel;
use bookline_core::domain::session::SessionKey;

use super::{parse_optional_timestamp, parse_timestamp, FallbackRepository, RepositoryError};
use crate::DbPool;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FallbackEntryId(pub String);

/// A preserved booking intent awaiting manual or automatic reconciliation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FallbackEntry {
    pub id: FallbackEntryId,
    pub key: SessionKey,
    pub request: BookingRequest,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

pub struct SqlFallbackRepository {
    pool: DbPool,
}

impl SqlFallbackRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl FallbackRepository for SqlFallbackRepository {
    async fn enqueue(
        &self,
        key: &SessionKey,
        request: &BookingRequest,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let request_json = serde_json::to_string(request)
            .map_err(|error| RepositoryError::Decode(format!("encode request: {error}")))?;

        sqlx::query(
            "INSERT INTO fallback_queue (id, channel, chat_id, request_json, reason, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(key.channel.as_str())
        .bind(&key.chat_id)
        .bind(request_json)
        .bind(reason)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<FallbackEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, channel, chat_id, request_json, reason, created_at, resolved_at
             FROM fallback_queue WHERE resolved_at IS NULL
             ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn pending_depth(&self) -> Result<u64, RepositoryError> {
        let row =
            sqlx::query("SELECT COUNT(*) AS depth FROM fallback_queue WHERE resolved_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        let depth: i64 = row.try_get("depth")?;
        Ok(depth.max(0) as u64)
    }

    async fn resolve(
        &self,
        id: &FallbackEntryId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE fallback_queue SET resolved_at = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn entry_from_row(row: SqliteRow) -> Result<FallbackEntry, RepositoryError> {
    let channel_raw = row.try_get::<String, _>("channel")?;
    let channel = Channel::parse(&channel_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown channel `{channel_raw}`")))?;
    let request: BookingRequest =
        serde_json::from_str(row.try_get::<String, _>("request_json")?.as_str())
            .map_err(|error| RepositoryError::Decode(format!("decode request: {error}")))?;

    Ok(FallbackEntry {
        id: FallbackEntryId(row.try_get("id")?),
        key: SessionKey { channel, chat_id: row.try_get("chat_id")? },
        request,
        reason: row.try_get("reason")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        resolved_at: parse_optional_timestamp("resolved_at", row.try_get("resolved_at")?)?,
    })
}
