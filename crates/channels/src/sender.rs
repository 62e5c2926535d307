//! The outbound side of a messaging channel. The dispatcher talks to every
//! channel through [`ChannelSender`]; the concrete implementations live in
//! the per-channel modules.

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use bookline_core::domain::message::Channel;

/// Hard caps imposed by the channel APIs. A body over the cap is truncated
/// before sending rather than rejected by the remote end.
pub fn response_limit(channel: Channel) -> usize {
    match channel {
        Channel::Telegram => 4096,
        Channel::Whatsapp => 4096,
    }
}

/// Truncates on a char boundary, keeping room for the ellipsis.
pub fn fit_to_limit(body: &str, limit: usize) -> String {
    if body.chars().count() <= limit {
        return body.to_string();
    }
    let mut truncated: String = body.chars().take(limit.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("channel returned {status}: {detail}")]
    Api { status: u16, detail: String },
    #[error("channel transport failure: {0}")]
    Transport(String),
    /// The channel refused the message itself (bad chat id, blocked bot).
    /// Retrying the same payload cannot succeed.
    #[error("message rejected: {0}")]
    Rejected(String),
}

impl ChannelError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transport(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Rejected(_) => false,
        }
    }
}

#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send_text(&self, destination: &str, body: &str) -> Result<(), ChannelError>;

    /// Text plus tappable quick-reply choices where the channel supports
    /// them; falls back to plain text otherwise.
    async fn send_quick_choices(
        &self,
        destination: &str,
        body: &str,
        choices: &[String],
    ) -> Result<(), ChannelError>;

    /// Typing indicator. Cosmetic; failures are swallowed by callers.
    async fn send_typing(&self, destination: &str) -> Result<(), ChannelError>;
}

/// In-memory sender for dispatcher and runtime tests.
pub struct RecordingSender {
    channel: Channel,
    sent: Mutex<Vec<(String, String)>>,
    failures: Mutex<Vec<ChannelError>>,
}

impl RecordingSender {
    pub fn new(channel: Channel) -> Self {
        Self { channel, sent: Mutex::new(Vec::new()), failures: Mutex::new(Vec::new()) }
    }

    /// Queue failures to return before deliveries start succeeding.
    pub fn fail_next(&self, error: ChannelError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(error);
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ChannelSender for RecordingSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send_text(&self, destination: &str, body: &str) -> Result<(), ChannelError> {
        if let Ok(mut failures) = self.failures.lock() {
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((destination.to_string(), body.to_string()));
        }
        Ok(())
    }

    async fn send_quick_choices(
        &self,
        destination: &str,
        body: &str,
        _choices: &[String],
    ) -> Result<(), ChannelError> {
        self.send_text(destination, body).await
    }

    async fn send_typing(&self, _destination: &str) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bookline_core::domain::message::Channel;

    use super::{fit_to_limit, response_limit, ChannelError};

    #[test]
    fn oversized_body_is_truncated_with_ellipsis() {
        let limit = response_limit(Channel::Telegram);
        let body = "x".repeat(limit + 50);
        let fitted = fit_to_limit(&body, limit);
        assert_eq!(fitted.chars().count(), limit);
        assert!(fitted.ends_with('…'));

        let short = fit_to_limit("hello", limit);
        assert_eq!(short, "hello");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let body = "ой".repeat(3000);
        let fitted = fit_to_limit(&body, 4096);
        assert_eq!(fitted.chars().count(), 4096);
    }

    #[test]
    fn retryability_follows_failure_class() {
        assert!(ChannelError::RateLimited { retry_after_secs: 3 }.is_retryable());
        assert!(ChannelError::Transport("reset".into()).is_retryable());
        assert!(ChannelError::Api { status: 502, detail: "bad gateway".into() }.is_retryable());
        assert!(!ChannelError::Api { status: 400, detail: "bad request".into() }.is_retryable());
        assert!(!ChannelError::Rejected("bot blocked".into()).is_retryable());
    }
}
