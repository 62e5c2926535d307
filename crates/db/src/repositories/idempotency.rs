use chrono::{DateTime, Utc};
use sqlx::Row;

use bookline_core::errors::ApplicationError;
use bookline_core::idempotency::{
    lock_ttl, AcquireOutcome, Fingerprint, HolderToken, IdempotencyStore,
};

use crate::DbPool;

/// Database-backed booking lock. Acquisition is one atomic upsert that only
/// replaces an expired row; the primary key guarantees a single holder.
pub struct SqlIdempotencyStore {
    pool: DbPool,
}

impl SqlIdempotencyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl IdempotencyStore for SqlIdempotencyStore {
    async fn acquire(
        &self,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome, ApplicationError> {
        let token = HolderToken::generate();
        let result = sqlx::query(
            "INSERT INTO idempotency_lock (fingerprint, holder_token, expires_at, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (fingerprint) DO UPDATE SET
                holder_token = excluded.holder_token,
                expires_at = excluded.expires_at,
                created_at = excluded.created_at
             WHERE idempotency_lock.expires_at < ?",
        )
        .bind(fingerprint.as_str())
        .bind(&token.0)
        .bind((now + lock_ttl()).to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|error| ApplicationError::Persistence(error.to_string()))?;

        if result.rows_affected() == 1 {
            Ok(AcquireOutcome::Acquired { token })
        } else {
            Ok(AcquireOutcome::AlreadyHeld)
        }
    }

    async fn release(
        &self,
        fingerprint: &Fingerprint,
        token: &HolderToken,
    ) -> Result<(), ApplicationError> {
        sqlx::query("DELETE FROM idempotency_lock WHERE fingerprint = ? AND holder_token = ?")
            .bind(fingerprint.as_str())
            .bind(&token.0)
            .execute(&self.pool)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        Ok(())
    }
}

impl SqlIdempotencyStore {
    /// Live lock count, exposed for operational visibility.
    pub async fn live_locks(&self, now: DateTime<Utc>) -> Result<u64, ApplicationError> {
        let row = sqlx::query("SELECT COUNT(*) AS live FROM idempotency_lock WHERE expires_at >= ?")
            .bind(now.to_rfc3339())
            .fetch_one(&self.pool)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        let live: i64 = row
            .try_get("live")
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        Ok(live.max(0) as u64)
    }
}
