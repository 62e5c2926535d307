use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messaging channel a conversation lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Telegram,
    Whatsapp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Whatsapp => "whatsapp",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "telegram" => Some(Self::Telegram),
            "whatsapp" => Some(Self::Whatsapp),
            _ => None,
        }
    }

    pub const ALL: [Channel; 2] = [Channel::Telegram, Channel::Whatsapp];
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Voice,
    Sticker,
    Image,
}

impl MessageKind {
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text)
    }
}

/// Normalized inbound event handed to the core by a channel gateway.
///
/// The gateway guarantees each `message_id` is presented at most once per
/// dedup window; a second delivery is treated as a no-op.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: Channel,
    pub chat_id: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub kind: MessageKind,
    pub sender_phone: Option<String>,
    pub sender_name: Option<String>,
    pub trace_id: Uuid,
}

impl InboundMessage {
    pub fn text_message(
        channel: Channel,
        chat_id: impl Into<String>,
        message_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            chat_id: chat_id.into(),
            message_id: message_id.into(),
            timestamp: Utc::now(),
            text: text.into(),
            kind: MessageKind::Text,
            sender_phone: None,
            sender_name: None,
            trace_id: Uuid::new_v4(),
        }
    }
}

/// Delivery priority tiers; lower value dequeues first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Alert,
    Interactive,
    Reminder,
}

impl Priority {
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Alert => 0,
            Self::Interactive => 1,
            Self::Reminder => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Alert),
            1 => Some(Self::Interactive),
            2 => Some(Self::Reminder),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    DeadLettered,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::DeadLettered => "dead_lettered",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "dead_lettered" => Some(Self::DeadLettered),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutboundMessageId(pub String);

impl OutboundMessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// A message owned by the outbound dispatcher from creation to terminal
/// status. Removed from the active queue on success, moved to the
/// dead-letter set after the retry ladder is exhausted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: OutboundMessageId,
    pub channel: Channel,
    pub destination: String,
    pub body: String,
    pub priority: Priority,
    pub attempt_count: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub last_error: Option<String>,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(
        channel: Channel,
        destination: impl Into<String>,
        body: impl Into<String>,
        priority: Priority,
        correlation_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: OutboundMessageId::generate(),
            channel,
            destination: destination.into(),
            body: body.into(),
            priority,
            attempt_count: 0,
            next_attempt_at: now,
            status: DeliveryStatus::Pending,
            last_error: None,
            correlation_id: correlation_id.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Channel, DeliveryStatus, Priority};

    #[test]
    fn channel_round_trips_through_str() {
        for channel in Channel::ALL {
            assert_eq!(Channel::parse(channel.as_str()), Some(channel));
        }
        assert_eq!(Channel::parse("carrier-pigeon"), None);
    }

    #[test]
    fn priority_orders_alerts_first() {
        assert!(Priority::Alert < Priority::Interactive);
        assert!(Priority::Interactive < Priority::Reminder);
        assert_eq!(Priority::from_i64(Priority::Reminder.as_i64()), Some(Priority::Reminder));
    }

    #[test]
    fn delivery_status_parse_rejects_unknown() {
        assert_eq!(DeliveryStatus::parse("sent"), Some(DeliveryStatus::Sent));
        assert_eq!(DeliveryStatus::parse("lost"), None);
    }
}
