use chrono::{DateTime, Duration, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use bookline_core::domain::message::{Channel, InboundMessage};
use bookline_core::domain::session::{ConversationState, HistoryTurn, Session, SessionKey};
use bookline_core::domain::slot::SlotMap;

use super::{parse_timestamp, RepositoryError, SessionRepository};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "channel, chat_id, trace_id, state, slots_json, history_json, \
     resume_state, buffered_json, confirm_nudge_sent, created_at, last_activity_at, \
     state_entered_at, expires_at";

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn find(&self, key: &SessionKey) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM session WHERE channel = ? AND chat_id = ?"
        ))
        .bind(key.channel.as_str())
        .bind(&key.chat_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(session_from_row).transpose()
    }

    async fn upsert(&self, session: &Session) -> Result<(), RepositoryError> {
        let slots_json = serde_json::to_string(&session.slots)
            .map_err(|error| RepositoryError::Decode(format!("encode slots: {error}")))?;
        let history_json = serde_json::to_string(&session.history)
            .map_err(|error| RepositoryError::Decode(format!("encode history: {error}")))?;
        let buffered_json = serde_json::to_string(&session.buffered)
            .map_err(|error| RepositoryError::Decode(format!("encode buffer: {error}")))?;

        sqlx::query(
            "INSERT INTO session (
                channel, chat_id, trace_id, state, slots_json, history_json,
                resume_state, buffered_json, confirm_nudge_sent,
                created_at, last_activity_at, state_entered_at, expires_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (channel, chat_id) DO UPDATE SET
                trace_id = excluded.trace_id,
                state = excluded.state,
                slots_json = excluded.slots_json,
                history_json = excluded.history_json,
                resume_state = excluded.resume_state,
                buffered_json = excluded.buffered_json,
                confirm_nudge_sent = excluded.confirm_nudge_sent,
                last_activity_at = excluded.last_activity_at,
                state_entered_at = excluded.state_entered_at,
                expires_at = excluded.expires_at",
        )
        .bind(session.key.channel.as_str())
        .bind(&session.key.chat_id)
        .bind(session.trace_id.to_string())
        .bind(session.state.as_str())
        .bind(slots_json)
        .bind(history_json)
        .bind(session.resume_state.map(|state| state.as_str()))
        .bind(buffered_json)
        .bind(i64::from(session.confirm_nudge_sent))
        .bind(session.created_at.to_rfc3339())
        .bind(session.last_activity_at.to_rfc3339())
        .bind(session.state_entered_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn acquire_processing_lock(
        &self,
        key: &SessionKey,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        // First contact arrives before any session row exists; seed an idle
        // placeholder so the lock update has a row to claim. The real
        // session upsert later overwrites everything but created_at.
        sqlx::query(
            "INSERT OR IGNORE INTO session (
                channel, chat_id, trace_id, state,
                created_at, last_activity_at, state_entered_at, expires_at
             ) VALUES (?, ?, ?, 'idle', ?, ?, ?, ?)",
        )
        .bind(key.channel.as_str())
        .bind(&key.chat_id)
        .bind(Uuid::new_v4().to_string())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind((now + ttl).to_rfc3339())
        .execute(&self.pool)
        .await?;

        // Conditional update doubles as the atomic check-and-set; it only
        // succeeds when the slot is free, expired, or already ours.
        let result = sqlx::query(
            "UPDATE session
             SET locked_by = ?, lock_expires_at = ?
             WHERE channel = ? AND chat_id = ?
               AND (locked_by IS NULL OR lock_expires_at < ? OR locked_by = ?)",
        )
        .bind(holder)
        .bind((now + ttl).to_rfc3339())
        .bind(key.channel.as_str())
        .bind(&key.chat_id)
        .bind(now.to_rfc3339())
        .bind(holder)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_processing_lock(
        &self,
        key: &SessionKey,
        holder: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE session SET locked_by = NULL, lock_expires_at = NULL
             WHERE channel = ? AND chat_id = ? AND locked_by = ?",
        )
        .bind(key.channel.as_str())
        .bind(&key.chat_id)
        .bind(holder)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_sessions(&self) -> Result<Vec<Session>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM session WHERE state != 'idle'
             ORDER BY state_entered_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(session_from_row).collect()
    }

    async fn expired_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM session WHERE expires_at < ?
             ORDER BY expires_at ASC"
        ))
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(session_from_row).collect()
    }
}

fn session_from_row(row: SqliteRow) -> Result<Session, RepositoryError> {
    let channel_raw = row.try_get::<String, _>("channel")?;
    let channel = Channel::parse(&channel_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown channel `{channel_raw}`")))?;

    let state_raw = row.try_get::<String, _>("state")?;
    let state = ConversationState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown session state `{state_raw}`")))?;

    let resume_state = row
        .try_get::<Option<String>, _>("resume_state")?
        .map(|value| {
            ConversationState::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown resume state `{value}`")))
        })
        .transpose()?;

    let trace_raw = row.try_get::<String, _>("trace_id")?;
    let trace_id = Uuid::parse_str(&trace_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid trace id: {error}")))?;

    let slots: SlotMap = serde_json::from_str(row.try_get::<String, _>("slots_json")?.as_str())
        .map_err(|error| RepositoryError::Decode(format!("decode slots: {error}")))?;
    let history: Vec<HistoryTurn> =
        serde_json::from_str(row.try_get::<String, _>("history_json")?.as_str())
            .map_err(|error| RepositoryError::Decode(format!("decode history: {error}")))?;
    let buffered: Vec<InboundMessage> =
        serde_json::from_str(row.try_get::<String, _>("buffered_json")?.as_str())
            .map_err(|error| RepositoryError::Decode(format!("decode buffer: {error}")))?;

    Ok(Session {
        key: SessionKey { channel, chat_id: row.try_get("chat_id")? },
        trace_id,
        state,
        slots,
        history,
        resume_state,
        buffered,
        confirm_nudge_sent: row.try_get::<i64, _>("confirm_nudge_sent")? != 0,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        last_activity_at: parse_timestamp("last_activity_at", row.try_get("last_activity_at")?)?,
        state_entered_at: parse_timestamp("state_entered_at", row.try_get("state_entered_at")?)?,
        expires_at: parse_timestamp("expires_at", row.try_get("expires_at")?)?,
    })
}
