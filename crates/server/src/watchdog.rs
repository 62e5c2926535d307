//! Periodic sweep over durable state: injects timer events for stale
//! sessions, refreshes budget windows, purges expired dedup marks, probes
//! CRM health and raises the backlog alarm. Also runs once at startup to
//! resolve sessions a previous process left mid-booking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use bookline_agent::ConversationRuntime;
use bookline_core::budget::BudgetGuard;
use bookline_core::collab::{outbound_reply, CrmClient};
use bookline_core::domain::message::{Channel, Priority};
use bookline_core::domain::session::{ConversationState, SessionKey};
use bookline_core::errors::ApplicationError;
use bookline_core::fsm::{self, TimerKind};
use bookline_db::repositories::{
    DedupRepository, FallbackRepository, OutboundRepository, SessionRepository,
};

#[derive(Clone, Debug)]
pub struct WatchdogSettings {
    pub interval: StdDuration,
    pub admin_chat_id: String,
}

pub struct Watchdog {
    runtime: Arc<ConversationRuntime>,
    sessions: Arc<dyn SessionRepository>,
    outbound: Arc<dyn OutboundRepository>,
    fallback: Arc<dyn FallbackRepository>,
    dedup: Arc<dyn DedupRepository>,
    budget: Arc<BudgetGuard>,
    crm: Arc<dyn CrmClient>,
    settings: WatchdogSettings,
    budget_alerted: AtomicBool,
}

impl Watchdog {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runtime: Arc<ConversationRuntime>,
        sessions: Arc<dyn SessionRepository>,
        outbound: Arc<dyn OutboundRepository>,
        fallback: Arc<dyn FallbackRepository>,
        dedup: Arc<dyn DedupRepository>,
        budget: Arc<BudgetGuard>,
        crm: Arc<dyn CrmClient>,
        settings: WatchdogSettings,
    ) -> Self {
        Self {
            runtime,
            sessions,
            outbound,
            fallback,
            dedup,
            budget,
            crm,
            settings,
            budget_alerted: AtomicBool::new(false),
        }
    }

    /// Startup recovery: any session that was mid-booking when the previous
    /// process died gets its state timeout immediately. The engine queues
    /// the fallback entry, tells the client an administrator will confirm
    /// and replays whatever the client sent in the meantime.
    pub async fn recover_interrupted(&self, now: DateTime<Utc>) -> Result<u32, ApplicationError> {
        let mut recovered = 0;
        for session in self.sessions.active_sessions().await? {
            if session.state != ConversationState::BookingInProgress {
                continue;
            }
            warn!(
                event_name = "booking_recovered",
                session = %session.key,
                correlation_id = %session.trace_id,
                "resolving booking interrupted by restart"
            );
            self.runtime.handle_timer(&session.key, TimerKind::StateTimeout, now).await?;
            recovered += 1;
        }
        if recovered > 0 {
            info!(
                event_name = "recovery_sweep_done",
                recovered,
                "startup recovery resolved interrupted bookings"
            );
        }
        Ok(recovered)
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(event_name = "watchdog_started", "timeout watchdog started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {
                    if let Err(error) = self.sweep(Utc::now()).await {
                        warn!(
                            event_name = "watchdog_sweep_failed",
                            error = %error,
                            "watchdog sweep failed, will retry next interval"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    info!(event_name = "watchdog_stopped", "timeout watchdog stopping");
                    return;
                }
            }
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<(), ApplicationError> {
        self.probe_crm(now).await;
        // Window-scoped limits recover on rollover here; the daily cost
        // cap is a hard cap cleared only by an explicit admin reset.
        self.budget.refresh(now);

        let shut_down = self.budget.is_shut_down();
        if shut_down && !self.budget_alerted.swap(true, Ordering::AcqRel) {
            self.alert_admin(
                "Model budget breached; conversations run on keyword fallback until reset.",
                now,
            )
            .await;
        }
        if !shut_down {
            self.budget_alerted.store(false, Ordering::Release);
        }

        let purged = self.dedup.purge_expired(now).await?;
        if purged > 0 {
            debug!(event_name = "dedup_purged", purged, "removed expired dedup marks");
        }

        self.fire_session_timers(now).await?;
        self.check_backlog(now).await?;
        Ok(())
    }

    async fn probe_crm(&self, now: DateTime<Utc>) {
        let was_healthy = self.runtime.health().crm();
        let healthy = self.crm.health_check().await.is_ok();
        self.runtime.health().set_crm(healthy);
        if !healthy {
            warn!(event_name = "crm_probe_failed", "CRM health probe failed");
            if was_healthy {
                self.alert_admin("CRM is unreachable; bookings now queue for manual handling.", now)
                    .await;
            }
        }
    }

    /// Best-effort: an alert that cannot be queued only loses the alert.
    async fn alert_admin(&self, text: &str, now: DateTime<Utc>) {
        let alert = outbound_reply(
            Channel::Telegram,
            self.settings.admin_chat_id.clone(),
            text,
            Priority::Alert,
            format!("watchdog-{}", now.timestamp()),
        );
        if let Err(error) = self.outbound.enqueue(&alert).await {
            warn!(event_name = "admin_alert_failed", error = %error, "could not queue admin alert");
        }
    }

    async fn fire_session_timers(&self, now: DateTime<Utc>) -> Result<(), ApplicationError> {
        for session in self.sessions.active_sessions().await? {
            let elapsed = session.time_in_state(now);
            if let Some(limit) = fsm::state_timeout(session.state) {
                if elapsed >= limit {
                    self.fire(&session.key, TimerKind::StateTimeout, now).await;
                    continue;
                }
            }
            if session.state == ConversationState::ConfirmBooking
                && !session.confirm_nudge_sent
                && elapsed >= fsm::confirm_nudge_after()
            {
                self.fire(&session.key, TimerKind::ConfirmNudge, now).await;
            }
        }

        for session in self.sessions.expired_sessions(now).await? {
            self.fire(&session.key, TimerKind::StateTimeout, now).await;
        }
        Ok(())
    }

    /// One session's failure must not starve the rest of the sweep.
    async fn fire(&self, key: &SessionKey, kind: TimerKind, now: DateTime<Utc>) {
        if let Err(error) = self.runtime.handle_timer(key, kind, now).await {
            warn!(
                event_name = "timer_delivery_failed",
                session = %key,
                kind = ?kind,
                error = %error,
                "could not deliver timer event"
            );
        }
    }

    async fn check_backlog(&self, now: DateTime<Utc>) -> Result<(), ApplicationError> {
        let dead_letters = self.outbound.dead_letter_depth().await?;
        let fallback_depth = self.fallback.pending_depth().await?;
        if self.runtime.note_backlog(dead_letters, fallback_depth) {
            self.alert_admin(
                &format!(
                    "Backlog alert: {dead_letters} dead-lettered messages, \
                     {fallback_depth} unresolved fallback requests."
                ),
                now,
            )
            .await;
            warn!(
                event_name = "backlog_alert",
                dead_letters,
                fallback_depth,
                "queue backlog crossed its alert threshold"
            );
        }
        Ok(())
    }
}
