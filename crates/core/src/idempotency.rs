//! Exactly-once guard for booking side effects: an exclusive, time-bounded
//! lock keyed by the logical-request fingerprint. Acquire strictly before
//! any CRM-mutating call; expiry alone guarantees eventual availability,
//! so release is best-effort.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::booking::BookingRequest;
use crate::errors::ApplicationError;

/// Lock lifetime. Long enough to cover a slow CRM call and its retries,
/// short enough that a crashed holder frees the slot soon.
pub fn lock_ttl() -> Duration {
    Duration::minutes(10)
}

/// Stable identity of a logical booking request: same phone plus same
/// schedule slot means the same booking, however many times it is sent.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn of(request: &BookingRequest) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(request.client_phone.as_bytes());
        hasher.update(b"\x1f");
        match request.fingerprint_material() {
            Some((_, schedule)) => hasher.update(schedule.as_bytes()),
            // No schedule id yet: fall back to the resolved start time so
            // the fingerprint still pins one target slot.
            None => hasher.update(request.starts_at.to_rfc3339().as_bytes()),
        }
        Self(hex_digest(hasher))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HolderToken(pub String);

impl HolderToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { token: HolderToken },
    AlreadyHeld,
}

/// Atomic create-if-absent lock store. Backed by the database in
/// production and by [`InMemoryIdempotencyStore`] in tests.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn acquire(
        &self,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome, ApplicationError>;

    /// Best-effort: only the holder's own token releases the lock.
    async fn release(
        &self,
        fingerprint: &Fingerprint,
        token: &HolderToken,
    ) -> Result<(), ApplicationError>;
}

#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    locks: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn acquire(
        &self,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome, ApplicationError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| ApplicationError::Persistence("idempotency lock poisoned".to_string()))?;

        if let Some((_, expires_at)) = locks.get(fingerprint.as_str()) {
            if *expires_at > now {
                return Ok(AcquireOutcome::AlreadyHeld);
            }
        }

        let token = HolderToken::generate();
        locks.insert(fingerprint.0.clone(), (token.0.clone(), now + lock_ttl()));
        Ok(AcquireOutcome::Acquired { token })
    }

    async fn release(
        &self,
        fingerprint: &Fingerprint,
        token: &HolderToken,
    ) -> Result<(), ApplicationError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| ApplicationError::Persistence("idempotency lock poisoned".to_string()))?;

        if let Some((holder, _)) = locks.get(fingerprint.as_str()) {
            if *holder == token.0 {
                locks.remove(fingerprint.as_str());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::domain::booking::BookingRequest;
    use crate::domain::crm::ScheduleId;

    use super::{
        AcquireOutcome, Fingerprint, HolderToken, IdempotencyStore, InMemoryIdempotencyStore,
    };

    fn request(phone: &str, schedule: &str) -> BookingRequest {
        BookingRequest {
            group: "salsa".into(),
            starts_at: Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap(),
            client_name: "Anna".into(),
            client_phone: phone.into(),
            schedule_id: Some(ScheduleId(schedule.into())),
            correlation_id: "corr".into(),
        }
    }

    #[test]
    fn same_phone_and_schedule_share_a_fingerprint() {
        let a = Fingerprint::of(&request("+79990001122", "sched-1"));
        let mut other = request("+79990001122", "sched-1");
        other.client_name = "Anya".into();
        assert_eq!(a, Fingerprint::of(&other));

        assert_ne!(a, Fingerprint::of(&request("+79990001122", "sched-2")));
        assert_ne!(a, Fingerprint::of(&request("+79990001123", "sched-1")));
    }

    #[tokio::test]
    async fn second_acquire_is_already_held() {
        let store = InMemoryIdempotencyStore::default();
        let fingerprint = Fingerprint::of(&request("+79990001122", "sched-1"));
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap();

        let first = store.acquire(&fingerprint, now).await.expect("acquire");
        assert!(matches!(first, AcquireOutcome::Acquired { .. }));
        let second = store.acquire(&fingerprint, now).await.expect("acquire");
        assert_eq!(second, AcquireOutcome::AlreadyHeld);
    }

    #[tokio::test]
    async fn expiry_frees_the_lock_without_release() {
        let store = InMemoryIdempotencyStore::default();
        let fingerprint = Fingerprint::of(&request("+79990001122", "sched-1"));
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap();

        store.acquire(&fingerprint, now).await.expect("acquire");
        let later = now + super::lock_ttl() + Duration::seconds(1);
        let retry = store.acquire(&fingerprint, later).await.expect("acquire");
        assert!(matches!(retry, AcquireOutcome::Acquired { .. }));
    }

    #[tokio::test]
    async fn release_honors_only_the_holder_token() {
        let store = InMemoryIdempotencyStore::default();
        let fingerprint = Fingerprint::of(&request("+79990001122", "sched-1"));
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap();

        let AcquireOutcome::Acquired { token } =
            store.acquire(&fingerprint, now).await.expect("acquire")
        else {
            panic!("expected acquisition");
        };

        store
            .release(&fingerprint, &HolderToken("not-the-holder".into()))
            .await
            .expect("release");
        assert_eq!(store.acquire(&fingerprint, now).await.expect("acquire"), AcquireOutcome::AlreadyHeld);

        store.release(&fingerprint, &token).await.expect("release");
        assert!(matches!(
            store.acquire(&fingerprint, now).await.expect("acquire"),
            AcquireOutcome::Acquired { .. }
        ));
    }
}
