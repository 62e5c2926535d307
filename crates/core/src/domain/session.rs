use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::message::{Channel, InboundMessage};
use crate::domain::slot::SlotMap;

/// Session identity: one conversation per (channel, chat).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub channel: Channel,
    pub chat_id: String,
}

impl SessionKey {
    pub fn new(channel: Channel, chat_id: impl Into<String>) -> Self {
        Self { channel, chat_id: chat_id.into() }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.channel, self.chat_id)
    }
}

/// Conversation FSM states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Idle,
    CollectingIntent,
    BrowsingSchedule,
    CollectingGroup,
    CollectingDateTime,
    CollectingContact,
    ConfirmBooking,
    BookingInProgress,
    BookingDone,
    CancelFlow,
    SerialBooking,
    HandoffToAdmin,
    AdminResponding,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CollectingIntent => "collecting_intent",
            Self::BrowsingSchedule => "browsing_schedule",
            Self::CollectingGroup => "collecting_group",
            Self::CollectingDateTime => "collecting_datetime",
            Self::CollectingContact => "collecting_contact",
            Self::ConfirmBooking => "confirm_booking",
            Self::BookingInProgress => "booking_in_progress",
            Self::BookingDone => "booking_done",
            Self::CancelFlow => "cancel_flow",
            Self::SerialBooking => "serial_booking",
            Self::HandoffToAdmin => "handoff_to_admin",
            Self::AdminResponding => "admin_responding",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "idle" => Some(Self::Idle),
            "collecting_intent" => Some(Self::CollectingIntent),
            "browsing_schedule" => Some(Self::BrowsingSchedule),
            "collecting_group" => Some(Self::CollectingGroup),
            "collecting_datetime" => Some(Self::CollectingDateTime),
            "collecting_contact" => Some(Self::CollectingContact),
            "confirm_booking" => Some(Self::ConfirmBooking),
            "booking_in_progress" => Some(Self::BookingInProgress),
            "booking_done" => Some(Self::BookingDone),
            "cancel_flow" => Some(Self::CancelFlow),
            "serial_booking" => Some(Self::SerialBooking),
            "handoff_to_admin" => Some(Self::HandoffToAdmin),
            "admin_responding" => Some(Self::AdminResponding),
            _ => None,
        }
    }

    /// Terminal state that auto-transitions back to idle after a grace delay.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::BookingDone)
    }

    /// Long-lived states owned by the admin handoff path.
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::HandoffToAdmin | Self::AdminResponding)
    }

    /// States that form the active booking flow; a lower-priority digression
    /// arriving in one of these is answered without leaving the flow.
    pub fn in_booking_flow(&self) -> bool {
        matches!(
            self,
            Self::CollectingIntent
                | Self::BrowsingSchedule
                | Self::CollectingGroup
                | Self::CollectingDateTime
                | Self::CollectingContact
                | Self::ConfirmBooking
                | Self::SerialBooking
                | Self::CancelFlow
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: TurnRole,
    pub content: String,
}

/// Most-recent-N turns kept as model context.
pub const HISTORY_CAPACITY: usize = 10;

/// Capacity of the inbound buffer used while a booking call is in flight.
/// Newest message is kept on overflow.
pub const EVENT_BUFFER_CAPACITY: usize = 8;

/// Per-conversation durable state. Mutated only by the FSM engine or by
/// watchdog-injected timer events; reset logically, never deleted before
/// its retention TTL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub trace_id: Uuid,
    pub state: ConversationState,
    pub slots: SlotMap,
    pub history: Vec<HistoryTurn>,
    /// State to offer returning to after answering a digression.
    pub resume_state: Option<ConversationState>,
    /// Inbound messages buffered while booking-in-progress.
    pub buffered: Vec<InboundMessage>,
    /// Set once the confirm-booking nudge has been sent for the current
    /// stale period; keeps the watchdog sweep idempotent.
    pub confirm_nudge_sent: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// When the current state was entered; drives per-state timeouts.
    pub state_entered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(key: SessionKey, trace_id: Uuid, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            key,
            trace_id,
            state: ConversationState::Idle,
            slots: SlotMap::default(),
            history: Vec::new(),
            resume_state: None,
            buffered: Vec::new(),
            confirm_nudge_sent: false,
            created_at: now,
            last_activity_at: now,
            state_entered_at: now,
            expires_at: now + ttl,
        }
    }

    /// Moves to a new state, restarting the state clock. The nudge flag is
    /// scoped to one stay in a state, so it resets here too.
    pub fn enter_state(&mut self, state: ConversationState, now: DateTime<Utc>) {
        self.state = state;
        self.state_entered_at = now;
        self.confirm_nudge_sent = false;
    }

    pub fn touch(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.last_activity_at = now;
        self.expires_at = now + ttl;
    }

    /// Logical reset back to the initial state. Slots, buffers and the
    /// resumption marker are cleared; history survives for model context.
    pub fn reset(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.enter_state(ConversationState::Idle, now);
        self.slots.clear();
        self.resume_state = None;
        self.buffered.clear();
        self.confirm_nudge_sent = false;
        self.touch(now, ttl);
    }

    pub fn push_turn(&mut self, role: TurnRole, content: impl Into<String>) {
        self.history.push(HistoryTurn { role, content: content.into() });
        if self.history.len() > HISTORY_CAPACITY {
            let excess = self.history.len() - HISTORY_CAPACITY;
            self.history.drain(..excess);
        }
    }

    /// Buffer an inbound message while booking-in-progress is active.
    /// Bounded retain-latest: on overflow the oldest entry is dropped.
    pub fn buffer_inbound(&mut self, message: InboundMessage) {
        self.buffered.push(message);
        if self.buffered.len() > EVENT_BUFFER_CAPACITY {
            let excess = self.buffered.len() - EVENT_BUFFER_CAPACITY;
            self.buffered.drain(..excess);
        }
    }

    /// Drain buffered messages oldest-first for replay.
    pub fn drain_buffered(&mut self) -> Vec<InboundMessage> {
        std::mem::take(&mut self.buffered)
    }

    pub fn time_in_state(&self, now: DateTime<Utc>) -> Duration {
        now - self.state_entered_at
    }
}
