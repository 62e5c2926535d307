//! Conversation state machine: events in, state change plus side effects
//! out. Timers are ordinary events injected by the watchdog; external calls
//! are effects executed by the runtime, never performed inline here.

mod engine;

pub use engine::{apply, confirm_nudge_after, state_timeout};

use chrono::{DateTime, Utc};

use crate::collab::CrmError;
use crate::degradation::Level;
use crate::domain::booking::BookingRequest;
use crate::domain::crm::{DateRange, ReservationId};
use crate::domain::message::InboundMessage;
use crate::domain::session::ConversationState;
use crate::domain::slot::{SlotName, SlotPatch};
use crate::replies::ReplyKind;

/// Conversational intents, ranked. When an event implies a topic unrelated
/// to the active flow, rank decides whether it redirects the flow or is
/// answered as a digression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intent {
    Booking,
    Cancel,
    AdminEscalation,
    Schedule,
    Price { group: Option<String> },
    Info { topic: String },
    Lateness,
    Greeting,
    Unknown,
}

impl Intent {
    pub fn rank(&self) -> u8 {
        match self {
            Self::Booking | Self::Cancel | Self::AdminEscalation => 3,
            Self::Schedule | Self::Price { .. } => 2,
            Self::Info { .. } | Self::Lateness => 1,
            Self::Greeting | Self::Unknown => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Booking => "booking",
            Self::Cancel => "cancel",
            Self::AdminEscalation => "admin_escalation",
            Self::Schedule => "schedule",
            Self::Price { .. } => "price",
            Self::Info { .. } => "info",
            Self::Lateness => "lateness",
            Self::Greeting => "greeting",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    /// The state's configured timeout elapsed.
    StateTimeout,
    /// Confirm-booking has been quiet long enough for a single re-prompt.
    ConfirmNudge,
}

/// Result of the outstanding external call that booking-in-progress or
/// cancel-flow is waiting on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExternalOutcome {
    BookingCreated { reservation_id: ReservationId },
    BookingFailed { error: CrmError },
    CancellationCompleted,
    CancellationFailed { error: CrmError },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FsmEvent {
    /// Raw inbound text before intent classification.
    InboundText { message: InboundMessage },
    /// Classified inbound turn; the slot patch has already been merged by
    /// the slot manager before this event reaches the engine.
    IntentUpdate { intent: Intent, patch: SlotPatch },
    /// User restates a slot value; updates the map without changing state.
    SlotCorrection { patch: SlotPatch },
    /// Affirmative or negative answer while a confirmation is pending.
    ConfirmationReply { affirmative: bool },
    TimerFired { kind: TimerKind },
    ExternalCompletion { outcome: ExternalOutcome },
    AdminReply { text: String },
    AdminClose,
}

impl FsmEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InboundText { .. } => "inbound_text",
            Self::IntentUpdate { .. } => "intent_update",
            Self::SlotCorrection { .. } => "slot_correction",
            Self::ConfirmationReply { .. } => "confirmation_reply",
            Self::TimerFired { .. } => "timer_fired",
            Self::ExternalCompletion { .. } => "external_completion",
            Self::AdminReply { .. } => "admin_reply",
            Self::AdminClose => "admin_close",
        }
    }
}

/// Side effects for the runtime to execute after a transition commits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Run intent classification over this message and re-apply the result.
    RequestIntent { message: InboundMessage },
    Reply(ReplyKind),
    /// Acquire the idempotency lock and issue the CRM booking call.
    StartBooking { request: BookingRequest },
    /// Look up and cancel the caller's nearest future booking.
    StartCancellation { phone: String },
    /// Preserve the booking intent durably for manual reconciliation.
    QueueFallback { request: BookingRequest },
    LookupSchedule { range: DateRange },
    /// Answer a price question from the knowledge source.
    AnswerPrice { group: Option<String> },
    /// Answer an informational question from the knowledge source.
    AnswerTopic { topic: String },
    ForwardToAdmin { text: String },
    NotifyAdmin { note: String },
    /// Best-effort release of the booking idempotency lock.
    ReleaseBookingLock { request: BookingRequest },
    /// Replay messages buffered during booking-in-progress, oldest first.
    ReplayBuffered { messages: Vec<InboundMessage> },
}

/// Snapshot of process-wide inputs the engine consults but does not own.
#[derive(Clone, Debug)]
pub struct EngineContext {
    pub now: DateTime<Utc>,
    pub degradation: Level,
    pub budget_shut_down: bool,
    /// Required booking slots still missing, in prompt order, computed
    /// after the event's slot patch was merged.
    pub missing_slots: Vec<SlotName>,
}

/// A committed transition: where the session moved and what to do about it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: ConversationState,
    pub to: ConversationState,
    pub effects: Vec<Effect>,
}

impl Transition {
    pub fn changed_state(&self) -> bool {
        self.from != self.to
    }
}

/// Collecting state that prompts for a given missing slot.
pub fn collecting_state_for(slot: SlotName) -> ConversationState {
    match slot {
        SlotName::Group => ConversationState::CollectingGroup,
        SlotName::DateTime => ConversationState::CollectingDateTime,
        SlotName::ClientName | SlotName::ClientPhone => ConversationState::CollectingContact,
        SlotName::ScheduleId => ConversationState::ConfirmBooking,
    }
}
