//! HTTP client for the studio CRM. Every call runs behind a circuit
//! breaker: after enough consecutive transient failures the breaker opens
//! and calls fail fast until a half-open probe succeeds, which keeps a dead
//! CRM from stalling every conversation on a full timeout.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use bookline_core::collab::{CrmClient, CrmError};
use bookline_core::config::CrmConfig;
use bookline_core::domain::booking::BookingRequest;
use bookline_core::domain::crm::{
    ClientId, ClientRecord, DateRange, Group, GroupId, Reservation, ReservationId, ScheduleEntry,
    ScheduleId,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BreakerState {
    Closed { consecutive_failures: u32 },
    Open { since: DateTime<Utc> },
    HalfOpen,
}

/// Consecutive-failure breaker with a timed half-open probe.
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_after: chrono::Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_after: chrono::Duration) -> Self {
        Self {
            failure_threshold,
            reset_after,
            state: Mutex::new(BreakerState::Closed { consecutive_failures: 0 }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Whether a call may proceed. An open breaker transitions to half-open
    /// once the reset window has passed, admitting a single probe.
    pub fn allows(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        match *state {
            BreakerState::Closed { .. } | BreakerState::HalfOpen => true,
            BreakerState::Open { since } => {
                if now - since >= self.reset_after {
                    *state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        *self.lock() = BreakerState::Closed { consecutive_failures: 0 };
    }

    pub fn record_failure(&self, now: DateTime<Utc>) {
        let mut state = self.lock();
        *state = match *state {
            BreakerState::Closed { consecutive_failures } => {
                let failures = consecutive_failures + 1;
                if failures >= self.failure_threshold {
                    warn!(
                        event_name = "crm_breaker_opened",
                        failures, "crm circuit breaker opened"
                    );
                    BreakerState::Open { since: now }
                } else {
                    BreakerState::Closed { consecutive_failures: failures }
                }
            }
            // A failed probe re-opens for a fresh window.
            BreakerState::HalfOpen | BreakerState::Open { .. } => BreakerState::Open { since: now },
        };
    }
}

pub struct HttpCrmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    breaker: CircuitBreaker,
}

impl HttpCrmClient {
    pub fn new(config: &CrmConfig) -> Result<Self, CrmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| CrmError::Transient { detail: error.to_string() })?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.expose_secret().to_string(),
            breaker: CircuitBreaker::new(
                config.breaker_failure_threshold,
                chrono::Duration::seconds(config.breaker_reset_secs as i64),
            ),
        })
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, CrmError> {
        if !self.breaker.allows(Utc::now()) {
            return Err(CrmError::Transient { detail: "crm circuit open".to_string() });
        }

        let mut request = self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                self.breaker.record_failure(Utc::now());
                return Err(CrmError::Transient { detail: error.to_string() });
            }
        };

        let status = response.status();
        if status.is_success() {
            self.breaker.record_success();
            return response
                .json::<T>()
                .await
                .map_err(|error| CrmError::Transient { detail: error.to_string() });
        }

        let failure: ApiFailure = response.json().await.unwrap_or_default();
        let error = classify(status, &failure.code);
        if error.is_transient() {
            self.breaker.record_failure(Utc::now());
        } else {
            // A categorical refusal is a working CRM.
            self.breaker.record_success();
        }
        debug!(
            event_name = "crm_call_failed",
            status = status.as_u16(),
            code = %failure.code,
            error = %error,
            "crm call failed"
        );
        Err(error)
    }
}

/// Maps the CRM's refusal codes onto the conversation-level categories.
fn classify(status: StatusCode, code: &str) -> CrmError {
    match (status.as_u16(), code) {
        (409, "already_booked") => CrmError::AlreadyBooked,
        (409, "capacity_full") => CrmError::CapacityFull,
        (409, _) => CrmError::NoAvailability,
        (404, _) => CrmError::NotFound,
        (422, "in_past") => CrmError::InPast,
        (422, _) => CrmError::NoAvailability,
        _ => CrmError::Transient { detail: format!("http {status}, code {code}") },
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiFailure {
    #[serde(default)]
    code: String,
}

#[derive(Debug, Deserialize)]
struct ScheduleEntryPayload {
    id: String,
    group_id: String,
    teacher: Option<String>,
    starts_at: DateTime<Utc>,
    duration_minutes: u32,
    capacity: u32,
    booked: u32,
}

impl From<ScheduleEntryPayload> for ScheduleEntry {
    fn from(payload: ScheduleEntryPayload) -> Self {
        Self {
            id: ScheduleId(payload.id),
            group_id: GroupId(payload.group_id),
            teacher: payload.teacher,
            starts_at: payload.starts_at,
            duration_minutes: payload.duration_minutes,
            capacity: payload.capacity,
            booked: payload.booked,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GroupPayload {
    id: String,
    name: String,
    style: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientPayload {
    id: String,
    name: String,
    phone: String,
}

#[derive(Debug, Deserialize)]
struct ReservationPayload {
    id: String,
    client_id: String,
    schedule_id: String,
    created_at: DateTime<Utc>,
}

impl From<ReservationPayload> for Reservation {
    fn from(payload: ReservationPayload) -> Self {
        Self {
            id: ReservationId(payload.id),
            client_id: ClientId(payload.client_id),
            schedule_id: ScheduleId(payload.schedule_id),
            created_at: payload.created_at,
        }
    }
}

#[async_trait]
impl CrmClient for HttpCrmClient {
    async fn schedule(&self, range: DateRange) -> Result<Vec<ScheduleEntry>, CrmError> {
        let entries: Vec<ScheduleEntryPayload> = self
            .request(
                reqwest::Method::GET,
                &format!("/schedule?from={}&to={}", range.from, range.to),
                None,
            )
            .await?;
        Ok(entries.into_iter().map(ScheduleEntry::from).collect())
    }

    async fn groups(&self) -> Result<Vec<Group>, CrmError> {
        let groups: Vec<GroupPayload> =
            self.request(reqwest::Method::GET, "/groups", None).await?;
        Ok(groups
            .into_iter()
            .map(|payload| Group {
                id: GroupId(payload.id),
                name: payload.name,
                style: payload.style,
            })
            .collect())
    }

    async fn find_client_by_phone(&self, phone: &str) -> Result<Option<ClientRecord>, CrmError> {
        let result: Result<ClientPayload, CrmError> = self
            .request(reqwest::Method::GET, &format!("/clients?phone={phone}"), None)
            .await;
        match result {
            Ok(payload) => Ok(Some(ClientRecord {
                id: ClientId(payload.id),
                name: payload.name,
                phone: payload.phone,
            })),
            Err(CrmError::NotFound) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn create_client(&self, name: &str, phone: &str) -> Result<ClientRecord, CrmError> {
        let payload: ClientPayload = self
            .request(
                reqwest::Method::POST,
                "/clients",
                Some(json!({ "name": name, "phone": phone })),
            )
            .await?;
        Ok(ClientRecord { id: ClientId(payload.id), name: payload.name, phone: payload.phone })
    }

    async fn create_booking(&self, request: &BookingRequest) -> Result<Reservation, CrmError> {
        let payload: ReservationPayload = self
            .request(
                reqwest::Method::POST,
                "/reservations",
                Some(json!({
                    "group": request.group,
                    "starts_at": request.starts_at,
                    "client_name": request.client_name,
                    "client_phone": request.client_phone,
                    "schedule_id": request.schedule_id.as_ref().map(|id| id.0.clone()),
                    "correlation_id": request.correlation_id,
                })),
            )
            .await?;
        Ok(payload.into())
    }

    async fn future_bookings(&self, phone: &str) -> Result<Vec<Reservation>, CrmError> {
        let reservations: Vec<ReservationPayload> = self
            .request(reqwest::Method::GET, &format!("/reservations?phone={phone}&future=true"), None)
            .await?;
        Ok(reservations.into_iter().map(Reservation::from).collect())
    }

    async fn cancel_booking(&self, reservation: &Reservation) -> Result<(), CrmError> {
        let _: serde_json::Value = self
            .request(
                reqwest::Method::DELETE,
                &format!("/reservations/{}", reservation.id.0),
                None,
            )
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CrmError> {
        let _: serde_json::Value = self.request(reqwest::Method::GET, "/health", None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use reqwest::StatusCode;

    use bookline_core::collab::CrmError;

    use super::{classify, CircuitBreaker};

    #[test]
    fn breaker_opens_after_threshold_and_probes_after_reset() {
        let breaker = CircuitBreaker::new(3, Duration::seconds(60));
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap();

        breaker.record_failure(start);
        breaker.record_failure(start);
        assert!(breaker.allows(start));
        breaker.record_failure(start);
        assert!(!breaker.allows(start + Duration::seconds(30)));

        // Reset window passed: one probe is admitted.
        assert!(breaker.allows(start + Duration::seconds(61)));
        // Probe fails: open again for a fresh window.
        breaker.record_failure(start + Duration::seconds(61));
        assert!(!breaker.allows(start + Duration::seconds(90)));

        assert!(breaker.allows(start + Duration::seconds(130)));
        breaker.record_success();
        assert!(breaker.allows(start + Duration::seconds(131)));
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let breaker = CircuitBreaker::new(2, Duration::seconds(60));
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap();

        breaker.record_failure(now);
        breaker.record_success();
        breaker.record_failure(now);
        assert!(breaker.allows(now), "streak should have been reset by the success");
    }

    #[test]
    fn refusal_codes_map_to_categories() {
        assert_eq!(classify(StatusCode::CONFLICT, "already_booked"), CrmError::AlreadyBooked);
        assert_eq!(classify(StatusCode::CONFLICT, "capacity_full"), CrmError::CapacityFull);
        assert_eq!(classify(StatusCode::CONFLICT, "slot_taken"), CrmError::NoAvailability);
        assert_eq!(classify(StatusCode::NOT_FOUND, ""), CrmError::NotFound);
        assert_eq!(classify(StatusCode::UNPROCESSABLE_ENTITY, "in_past"), CrmError::InPast);
        assert!(classify(StatusCode::BAD_GATEWAY, "").is_transient());
    }
}
