use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use bookline_core::domain::booking::BookingRequest;
use bookline_core::domain::message::{Channel, OutboundMessage, OutboundMessageId};
use bookline_core::domain::session::{Session, SessionKey};

pub mod dedup;
pub mod fallback;
pub mod idempotency;
pub mod outbound;
pub mod session;

pub use dedup::SqlDedupRepository;
pub use fallback::{FallbackEntry, FallbackEntryId, SqlFallbackRepository};
pub use idempotency::SqlIdempotencyStore;
pub use outbound::{DeadLetter, SqlOutboundRepository};
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for bookline_core::errors::ApplicationError {
    fn from(error: RepositoryError) -> Self {
        Self::Persistence(error.to_string())
    }
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find(&self, key: &SessionKey) -> Result<Option<Session>, RepositoryError>;
    async fn upsert(&self, session: &Session) -> Result<(), RepositoryError>;

    /// Advisory per-session processing lock: true when this holder now owns
    /// the session, false when a live lock belongs to someone else.
    async fn acquire_processing_lock(
        &self,
        key: &SessionKey,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn release_processing_lock(
        &self,
        key: &SessionKey,
        holder: &str,
    ) -> Result<(), RepositoryError>;

    /// Sessions in a non-idle state, for the watchdog sweep.
    async fn active_sessions(&self) -> Result<Vec<Session>, RepositoryError>;

    /// Sessions whose retention expiry has passed.
    async fn expired_sessions(&self, now: DateTime<Utc>)
        -> Result<Vec<Session>, RepositoryError>;
}

#[async_trait]
pub trait OutboundRepository: Send + Sync {
    async fn enqueue(&self, message: &OutboundMessage) -> Result<(), RepositoryError>;

    /// Pending messages due for delivery on a channel, priority-first then
    /// FIFO within a tier.
    async fn due(
        &self,
        channel: Channel,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OutboundMessage>, RepositoryError>;

    async fn mark_sent(
        &self,
        id: &OutboundMessageId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn schedule_retry(
        &self,
        id: &OutboundMessageId,
        attempt_count: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Terminal failure: moves the message out of the active queue into the
    /// dead-letter set.
    async fn dead_letter(
        &self,
        message: &OutboundMessage,
        final_error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn dead_letter_depth(&self) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait FallbackRepository: Send + Sync {
    async fn enqueue(
        &self,
        key: &SessionKey,
        request: &BookingRequest,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn pending(&self) -> Result<Vec<FallbackEntry>, RepositoryError>;
    async fn pending_depth(&self) -> Result<u64, RepositoryError>;
    async fn resolve(
        &self,
        id: &FallbackEntryId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait DedupRepository: Send + Sync {
    /// Create-if-absent mark; true when this is the first sighting inside
    /// the window.
    async fn mark_seen(
        &self,
        channel: Channel,
        message_id: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|value| parse_timestamp(column, value)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("invalid counter in `{column}`: {value}")))
}
