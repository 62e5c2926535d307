//! Outbound dispatcher: one worker per channel draining the durable queue
//! in (priority, arrival) order. Failures walk a fixed retry ladder; the
//! fourth failed attempt moves the message to the dead-letter set.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use bookline_channels::sender::ChannelSender;
use bookline_db::repositories::{OutboundRepository, RepositoryError};

/// Delay before each re-attempt, indexed by prior failure count.
const RETRY_OFFSETS_SECS: [i64; 3] = [0, 5, 30];

#[derive(Clone, Copy, Debug)]
pub struct DispatcherSettings {
    pub poll_interval: Duration,
    pub batch_size: u32,
    /// Channel-API send ceiling; the worker paces itself under it.
    pub sends_per_second: u32,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(1), batch_size: 16, sends_per_second: 25 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub sent: u32,
    pub retried: u32,
    pub dead_lettered: u32,
}

pub struct ChannelDispatcher {
    queue: Arc<dyn OutboundRepository>,
    sender: Arc<dyn ChannelSender>,
    settings: DispatcherSettings,
}

impl ChannelDispatcher {
    pub fn new(
        queue: Arc<dyn OutboundRepository>,
        sender: Arc<dyn ChannelSender>,
        settings: DispatcherSettings,
    ) -> Self {
        Self { queue, sender, settings }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            event_name = "dispatcher_started",
            channel = %self.sender.channel(),
            "outbound dispatcher worker started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {
                    if let Err(error) = self.sweep_once(Utc::now()).await {
                        warn!(
                            event_name = "dispatcher_sweep_failed",
                            channel = %self.sender.channel(),
                            error = %error,
                            "dispatcher sweep failed, will retry next interval"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    info!(
                        event_name = "dispatcher_stopped",
                        channel = %self.sender.channel(),
                        "outbound dispatcher worker stopping"
                    );
                    return;
                }
            }
        }
    }

    /// Drains one batch of due messages. Separated from the loop so tests
    /// can drive it with a fixed clock.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepStats, RepositoryError> {
        let due = self.queue.due(self.sender.channel(), now, self.settings.batch_size).await?;
        let mut stats = SweepStats::default();

        for message in due {
            match self.sender.send_text(&message.destination, &message.body).await {
                Ok(()) => {
                    self.queue.mark_sent(&message.id, now).await?;
                    stats.sent += 1;
                    debug!(
                        event_name = "outbound_sent",
                        channel = %message.channel,
                        message_id = %message.id.0,
                        correlation_id = %message.correlation_id,
                        attempt = message.attempt_count + 1,
                        "outbound message delivered"
                    );
                }
                Err(error) => {
                    let failures = message.attempt_count + 1;
                    let exhausted = failures as usize > RETRY_OFFSETS_SECS.len();
                    if !error.is_retryable() || exhausted {
                        self.queue.dead_letter(&message, &error.to_string(), now).await?;
                        stats.dead_lettered += 1;
                        warn!(
                            event_name = "outbound_dead_lettered",
                            channel = %message.channel,
                            message_id = %message.id.0,
                            correlation_id = %message.correlation_id,
                            failures,
                            error = %error,
                            "outbound message moved to dead letter"
                        );
                    } else {
                        let offset = RETRY_OFFSETS_SECS[failures as usize - 1];
                        let next = now + chrono::Duration::seconds(offset);
                        self.queue
                            .schedule_retry(&message.id, failures, next, &error.to_string(), now)
                            .await?;
                        stats.retried += 1;
                        debug!(
                            event_name = "outbound_retry_scheduled",
                            channel = %message.channel,
                            message_id = %message.id.0,
                            failures,
                            retry_offset_secs = offset,
                            "outbound send failed, retry scheduled"
                        );
                    }
                }
            }

            if self.settings.sends_per_second > 0 {
                let pace = Duration::from_millis(1000 / u64::from(self.settings.sends_per_second));
                tokio::time::sleep(pace).await;
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use chrono::{Duration, TimeZone, Utc};

    use bookline_channels::sender::{ChannelError, RecordingSender};
    use bookline_core::domain::message::{Channel, OutboundMessage, Priority};
    use bookline_db::repositories::{OutboundRepository, SqlOutboundRepository};
    use bookline_db::{connect_with_settings, migrations, DbPool};

    use super::{ChannelDispatcher, DispatcherSettings};

    async fn setup_pool(name: &str) -> DbPool {
        let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
        let pool = connect_with_settings(&url, 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn settings() -> DispatcherSettings {
        DispatcherSettings {
            poll_interval: StdDuration::from_millis(10),
            batch_size: 16,
            sends_per_second: 0,
        }
    }

    fn message(body: &str) -> OutboundMessage {
        OutboundMessage::new(Channel::Telegram, "chat-1", body, Priority::Interactive, "corr-1")
    }

    #[tokio::test]
    async fn failures_walk_the_retry_ladder_then_dead_letter() {
        let pool = setup_pool("dispatch_ladder").await;
        let queue = Arc::new(SqlOutboundRepository::new(pool));
        let sender = Arc::new(RecordingSender::new(Channel::Telegram));
        for _ in 0..4 {
            sender.fail_next(ChannelError::Transport("connection reset".into()));
        }
        let dispatcher = ChannelDispatcher::new(queue.clone(), sender.clone(), settings());

        let start = Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap();
        let mut item = message("hello");
        item.next_attempt_at = start;
        OutboundRepository::enqueue(queue.as_ref(), &item).await.expect("enqueue");

        // Failure 1: retry immediately.
        let stats = dispatcher.sweep_once(start).await.expect("sweep");
        assert_eq!(stats.retried, 1);
        let due = queue.due(Channel::Telegram, start, 10).await.expect("due");
        assert_eq!(due[0].attempt_count, 1);

        // Failure 2: +5s.
        dispatcher.sweep_once(start).await.expect("sweep");
        assert!(queue.due(Channel::Telegram, start, 10).await.expect("due").is_empty());
        let at_5 = start + Duration::seconds(5);
        assert_eq!(queue.due(Channel::Telegram, at_5, 10).await.expect("due").len(), 1);

        // Failure 3: +30s.
        dispatcher.sweep_once(at_5).await.expect("sweep");
        let at_35 = at_5 + Duration::seconds(30);
        assert_eq!(queue.due(Channel::Telegram, at_35, 10).await.expect("due").len(), 1);

        // Failure 4: dead letter.
        let stats = dispatcher.sweep_once(at_35).await.expect("sweep");
        assert_eq!(stats.dead_lettered, 1);
        assert!(queue.due(Channel::Telegram, at_35, 10).await.expect("due").is_empty());
        assert_eq!(queue.dead_letter_depth().await.expect("depth"), 1);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn recovery_mid_ladder_delivers_and_clears() {
        let pool = setup_pool("dispatch_recovery").await;
        let queue = Arc::new(SqlOutboundRepository::new(pool));
        let sender = Arc::new(RecordingSender::new(Channel::Telegram));
        sender.fail_next(ChannelError::Transport("flap".into()));
        let dispatcher = ChannelDispatcher::new(queue.clone(), sender.clone(), settings());

        let start = Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap();
        let mut item = message("eventually delivered");
        item.next_attempt_at = start;
        OutboundRepository::enqueue(queue.as_ref(), &item).await.expect("enqueue");

        dispatcher.sweep_once(start).await.expect("sweep");
        let stats = dispatcher.sweep_once(start).await.expect("sweep");
        assert_eq!(stats.sent, 1);
        assert_eq!(sender.sent(), vec![("chat-1".to_string(), "eventually delivered".to_string())]);
        assert_eq!(queue.dead_letter_depth().await.expect("depth"), 0);
    }

    #[tokio::test]
    async fn non_retryable_failure_dead_letters_at_once() {
        let pool = setup_pool("dispatch_rejected").await;
        let queue = Arc::new(SqlOutboundRepository::new(pool));
        let sender = Arc::new(RecordingSender::new(Channel::Telegram));
        sender.fail_next(ChannelError::Rejected("bot blocked by user".into()));
        let dispatcher = ChannelDispatcher::new(queue.clone(), sender.clone(), settings());

        let start = Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap();
        let mut item = message("never arrives");
        item.next_attempt_at = start;
        OutboundRepository::enqueue(queue.as_ref(), &item).await.expect("enqueue");

        let stats = dispatcher.sweep_once(start).await.expect("sweep");
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(queue.dead_letter_depth().await.expect("depth"), 1);
    }
}
