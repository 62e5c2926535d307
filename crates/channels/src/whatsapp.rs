//! WhatsApp Cloud API: outbound sends and webhook payload parsing. Webhook
//! authenticity is an HMAC-SHA256 signature over the raw body (checked in
//! [`crate::verify`]).

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use bookline_core::domain::message::{Channel, InboundMessage, MessageKind};

use crate::sender::{fit_to_limit, response_limit, ChannelError, ChannelSender};

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Quick-reply buttons are capped by the API; choices beyond the cap get
/// folded into the message body as a numbered list.
const MAX_BUTTONS: usize = 3;

pub struct WhatsAppSender {
    http: reqwest::Client,
    base_url: String,
    phone_number_id: String,
    api_key: SecretString,
}

impl WhatsAppSender {
    pub fn new(
        phone_number_id: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ChannelError::Transport(error.to_string()))?;
        Ok(Self {
            http,
            base_url: "https://graph.facebook.com/v21.0".to_string(),
            phone_number_id: phone_number_id.into(),
            api_key,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn post(&self, payload: serde_json::Value) -> Result<(), ChannelError> {
        let url = format!("{}/{}/messages", self.base_url, self.phone_number_id);
        let response = self
            .http
            .post(url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|error| ChannelError::Transport(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        match status.as_u16() {
            429 => Err(ChannelError::RateLimited { retry_after_secs: 1 }),
            400 | 403 => Err(ChannelError::Rejected(detail)),
            code => Err(ChannelError::Api { status: code, detail }),
        }
    }
}

#[async_trait::async_trait]
impl ChannelSender for WhatsAppSender {
    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    async fn send_text(&self, destination: &str, body: &str) -> Result<(), ChannelError> {
        let body = fit_to_limit(body, response_limit(Channel::Whatsapp));
        self.post(json!({
            "messaging_product": "whatsapp",
            "to": destination,
            "type": "text",
            "text": { "body": body },
        }))
        .await
    }

    async fn send_quick_choices(
        &self,
        destination: &str,
        body: &str,
        choices: &[String],
    ) -> Result<(), ChannelError> {
        if choices.is_empty() || choices.len() > MAX_BUTTONS {
            let mut lines = vec![body.to_string()];
            for (index, choice) in choices.iter().enumerate() {
                lines.push(format!("{}. {choice}", index + 1));
            }
            return self.send_text(destination, &lines.join("\n")).await;
        }

        let buttons: Vec<serde_json::Value> = choices
            .iter()
            .enumerate()
            .map(|(index, choice)| {
                json!({
                    "type": "reply",
                    "reply": { "id": format!("choice-{index}"), "title": choice },
                })
            })
            .collect();
        let body = fit_to_limit(body, 1024);
        self.post(json!({
            "messaging_product": "whatsapp",
            "to": destination,
            "type": "interactive",
            "interactive": {
                "type": "button",
                "body": { "text": body },
                "action": { "buttons": buttons },
            },
        }))
        .await
    }

    async fn send_typing(&self, _destination: &str) -> Result<(), ChannelError> {
        // The Cloud API has no typing indicator.
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    value: ChangeValue,
}

#[derive(Debug, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    contacts: Vec<Contact>,
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct Contact {
    #[serde(default)]
    profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    id: String,
    from: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<MessageText>,
    #[serde(default)]
    button: Option<ButtonReply>,
}

#[derive(Debug, Deserialize)]
struct MessageText {
    body: String,
}

#[derive(Debug, Deserialize)]
struct ButtonReply {
    text: String,
}

/// Flattens the webhook envelope into inbound messages. Statuses-only
/// deliveries produce an empty vec.
pub fn parse_webhook(payload: WebhookPayload) -> Vec<InboundMessage> {
    let mut inbound = Vec::new();
    for entry in payload.entry {
        for change in entry.changes {
            let sender_name = change
                .value
                .contacts
                .first()
                .and_then(|contact| contact.profile.as_ref())
                .map(|profile| profile.name.clone());

            for message in change.value.messages {
                let (kind, text) = match message.kind.as_str() {
                    "text" => (
                        MessageKind::Text,
                        message.text.map(|t| t.body).unwrap_or_default(),
                    ),
                    "button" => (
                        MessageKind::Text,
                        message.button.map(|b| b.text).unwrap_or_default(),
                    ),
                    "audio" | "voice" => (MessageKind::Voice, String::new()),
                    "sticker" => (MessageKind::Sticker, String::new()),
                    "image" => (MessageKind::Image, String::new()),
                    _ => continue,
                };

                inbound.push(InboundMessage {
                    channel: Channel::Whatsapp,
                    chat_id: message.from.clone(),
                    message_id: message.id,
                    timestamp: chrono::Utc::now(),
                    text,
                    kind,
                    sender_phone: Some(message.from),
                    sender_name: sender_name.clone(),
                    trace_id: Uuid::new_v4(),
                });
            }
        }
    }
    inbound
}

#[cfg(test)]
mod tests {
    use bookline_core::domain::message::MessageKind;

    use super::{parse_webhook, WebhookPayload};

    fn payload(json: serde_json::Value) -> WebhookPayload {
        serde_json::from_value(json).expect("payload json")
    }

    #[test]
    fn text_message_flattens_with_sender_identity() {
        let inbound = parse_webhook(payload(serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "contacts": [{ "profile": { "name": "Anna" } }],
                        "messages": [{
                            "id": "wamid.1",
                            "from": "79990001122",
                            "type": "text",
                            "text": { "body": "how much is salsa?" },
                        }],
                    }
                }]
            }]
        })));

        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].chat_id, "79990001122");
        assert_eq!(inbound[0].text, "how much is salsa?");
        assert_eq!(inbound[0].sender_phone.as_deref(), Some("79990001122"));
        assert_eq!(inbound[0].sender_name.as_deref(), Some("Anna"));
    }

    #[test]
    fn media_kinds_are_flagged_and_statuses_skipped() {
        let inbound = parse_webhook(payload(serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [
                            { "id": "wamid.2", "from": "79990001122", "type": "audio" },
                            { "id": "wamid.3", "from": "79990001122", "type": "reaction" },
                        ],
                    }
                }]
            }]
        })));

        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].kind, MessageKind::Voice);
    }

    #[test]
    fn statuses_only_delivery_is_empty() {
        assert!(parse_webhook(payload(serde_json::json!({ "entry": [] }))).is_empty());
    }
}
