//! Telegram Bot API: outbound sends and webhook update parsing. Webhook
//! authenticity rides on the shared secret token header configured at
//! `setWebhook` time.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use bookline_core::domain::message::{Channel, InboundMessage, MessageKind};

use crate::sender::{fit_to_limit, response_limit, ChannelError, ChannelSender};

pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

pub struct TelegramSender {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
}

impl TelegramSender {
    pub fn new(token: SecretString, timeout: Duration) -> Result<Self, ChannelError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ChannelError::Transport(error.to_string()))?;
        Ok(Self { http, base_url: "https://api.telegram.org".to_string(), token })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn call(&self, method: &str, payload: serde_json::Value) -> Result<(), ChannelError> {
        let url = format!("{}/bot{}/{method}", self.base_url, self.token.expose_secret());
        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|error| ChannelError::Transport(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body: ApiFailure = response.json().await.unwrap_or_default();
        match status.as_u16() {
            429 => Err(ChannelError::RateLimited {
                retry_after_secs: body.parameters.and_then(|p| p.retry_after).unwrap_or(1),
            }),
            400 | 403 => Err(ChannelError::Rejected(body.description)),
            code => Err(ChannelError::Api { status: code, detail: body.description }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiFailure {
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Option<ApiFailureParameters>,
}

#[derive(Debug, Deserialize)]
struct ApiFailureParameters {
    retry_after: Option<u64>,
}

#[async_trait::async_trait]
impl ChannelSender for TelegramSender {
    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    async fn send_text(&self, destination: &str, body: &str) -> Result<(), ChannelError> {
        let body = fit_to_limit(body, response_limit(Channel::Telegram));
        self.call("sendMessage", json!({ "chat_id": destination, "text": body })).await
    }

    async fn send_quick_choices(
        &self,
        destination: &str,
        body: &str,
        choices: &[String],
    ) -> Result<(), ChannelError> {
        let body = fit_to_limit(body, response_limit(Channel::Telegram));
        let keyboard: Vec<Vec<serde_json::Value>> =
            choices.iter().map(|choice| vec![json!({ "text": choice })]).collect();
        self.call(
            "sendMessage",
            json!({
                "chat_id": destination,
                "text": body,
                "reply_markup": {
                    "keyboard": keyboard,
                    "one_time_keyboard": true,
                    "resize_keyboard": true,
                },
            }),
        )
        .await
    }

    async fn send_typing(&self, destination: &str) -> Result<(), ChannelError> {
        self.call("sendChatAction", json!({ "chat_id": destination, "action": "typing" })).await
    }
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    message: Option<UpdateMessage>,
}

#[derive(Debug, Deserialize)]
struct UpdateMessage {
    message_id: i64,
    chat: UpdateChat,
    #[serde(default)]
    from: Option<UpdateUser>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    voice: Option<serde_json::Value>,
    #[serde(default)]
    sticker: Option<serde_json::Value>,
    #[serde(default)]
    photo: Option<serde_json::Value>,
    #[serde(default)]
    contact: Option<UpdateContact>,
}

#[derive(Debug, Deserialize)]
struct UpdateChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct UpdateUser {
    #[serde(default)]
    first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateContact {
    phone_number: String,
}

/// Maps a webhook update onto the normalized inbound shape. Updates that
/// carry no message (edits, channel posts, callbacks) yield `None`.
pub fn parse_update(update: Update) -> Option<InboundMessage> {
    let message = update.message?;

    let kind = if message.text.is_some() || message.contact.is_some() {
        MessageKind::Text
    } else if message.voice.is_some() {
        MessageKind::Voice
    } else if message.sticker.is_some() {
        MessageKind::Sticker
    } else if message.photo.is_some() {
        MessageKind::Image
    } else {
        debug!(
            event_name = "unsupported_update_dropped",
            update_id = update.update_id,
            "update carries no recognizable payload"
        );
        return None;
    };

    // A shared contact doubles as the phone slot; its number becomes the
    // message text so the usual extraction path picks it up.
    let text = match (&message.text, &message.contact) {
        (Some(text), _) => text.clone(),
        (None, Some(contact)) => contact.phone_number.clone(),
        (None, None) => String::new(),
    };

    Some(InboundMessage {
        channel: Channel::Telegram,
        chat_id: message.chat.id.to_string(),
        message_id: message.message_id.to_string(),
        timestamp: chrono::Utc::now(),
        text,
        kind,
        sender_phone: message.contact.map(|contact| contact.phone_number),
        sender_name: message.from.and_then(|user| user.first_name),
        trace_id: Uuid::new_v4(),
    })
}

#[cfg(test)]
mod tests {
    use bookline_core::domain::message::MessageKind;

    use super::{parse_update, Update};

    fn update(json: serde_json::Value) -> Update {
        serde_json::from_value(json).expect("update json")
    }

    #[test]
    fn text_message_parses_to_inbound() {
        let parsed = parse_update(update(serde_json::json!({
            "update_id": 7,
            "message": {
                "message_id": 42,
                "chat": { "id": 1001 },
                "from": { "first_name": "Anna" },
                "text": "book salsa tomorrow",
            }
        })))
        .expect("inbound message");

        assert_eq!(parsed.chat_id, "1001");
        assert_eq!(parsed.message_id, "42");
        assert_eq!(parsed.text, "book salsa tomorrow");
        assert_eq!(parsed.kind, MessageKind::Text);
        assert_eq!(parsed.sender_name.as_deref(), Some("Anna"));
    }

    #[test]
    fn voice_is_flagged_not_dropped() {
        let parsed = parse_update(update(serde_json::json!({
            "update_id": 8,
            "message": {
                "message_id": 43,
                "chat": { "id": 1001 },
                "voice": { "duration": 3 },
            }
        })))
        .expect("inbound message");
        assert_eq!(parsed.kind, MessageKind::Voice);
        assert!(parsed.text.is_empty());
    }

    #[test]
    fn shared_contact_becomes_phone_text() {
        let parsed = parse_update(update(serde_json::json!({
            "update_id": 9,
            "message": {
                "message_id": 44,
                "chat": { "id": 1001 },
                "contact": { "phone_number": "+79990001122" },
            }
        })))
        .expect("inbound message");
        assert_eq!(parsed.kind, MessageKind::Text);
        assert_eq!(parsed.text, "+79990001122");
        assert_eq!(parsed.sender_phone.as_deref(), Some("+79990001122"));
    }

    #[test]
    fn messageless_update_is_none() {
        assert!(parse_update(update(serde_json::json!({ "update_id": 10 }))).is_none());
    }
}
