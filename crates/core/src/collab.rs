//! Narrow interfaces to the external collaborators: CRM, knowledge source,
//! and the outbound queue. Everything behind these traits may fail or time
//! out; callers classify failures instead of propagating raw errors to users.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::booking::BookingRequest;
use crate::domain::crm::{ClientRecord, DateRange, Group, Reservation, ScheduleEntry};
use crate::domain::message::{Channel, OutboundMessage, Priority};

/// CRM failure categories surfaced to the orchestration layer. Each maps to
/// a canned user-facing message; raw details stay in logs.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CrmError {
    #[error("no availability for the requested slot")]
    NoAvailability,
    #[error("client already holds this booking")]
    AlreadyBooked,
    #[error("referenced entity was not found")]
    NotFound,
    #[error("requested slot is in the past")]
    InPast,
    #[error("class is at capacity")]
    CapacityFull,
    #[error("transient CRM failure: {detail}")]
    Transient { detail: String },
}

impl CrmError {
    /// Transient failures feed the degradation controller; the categorical
    /// ones are conversation-level answers, not health signals.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn schedule(&self, range: DateRange) -> Result<Vec<ScheduleEntry>, CrmError>;
    async fn groups(&self) -> Result<Vec<Group>, CrmError>;
    async fn find_client_by_phone(&self, phone: &str) -> Result<Option<ClientRecord>, CrmError>;
    async fn create_client(&self, name: &str, phone: &str) -> Result<ClientRecord, CrmError>;
    async fn create_booking(&self, request: &BookingRequest) -> Result<Reservation, CrmError>;
    async fn future_bookings(&self, phone: &str) -> Result<Vec<Reservation>, CrmError>;
    async fn cancel_booking(&self, reservation: &Reservation) -> Result<(), CrmError>;
    async fn health_check(&self) -> Result<(), CrmError>;
}

/// Key/topic lookup over the studio knowledge base. A price question always
/// defers to this source over any cached CRM value.
pub trait KnowledgeSource: Send + Sync {
    fn lookup(&self, topic: &str) -> Option<String>;
    fn price_of(&self, group: &str) -> Option<u64>;
}

/// Hands a composed reply to the durable outbound queue. Implemented by the
/// dispatcher's repository; the engine never sends directly.
#[async_trait]
pub trait OutboundEnqueuer: Send + Sync {
    async fn enqueue(&self, message: OutboundMessage) -> Result<(), EnqueueError>;
}

#[derive(Debug, Error)]
#[error("could not enqueue outbound message: {0}")]
pub struct EnqueueError(pub String);

/// Convenience constructor used by callers that only have reply text.
pub fn outbound_reply(
    channel: Channel,
    destination: impl Into<String>,
    body: impl Into<String>,
    priority: Priority,
    correlation_id: impl Into<String>,
) -> OutboundMessage {
    OutboundMessage::new(channel, destination.into(), body.into(), priority, correlation_id.into())
}
