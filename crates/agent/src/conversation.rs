//! The per-turn orchestrator: dedup, the session processing lock, intent
//! resolution, the state machine, and execution of its effects. One inbound
//! message enters; zero or more queued outbound messages leave. All external
//! calls happen here, never inside the engine.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use bookline_core::budget::{BudgetGuard, Metric, Verdict};
use bookline_core::collab::{CrmClient, CrmError, KnowledgeSource, OutboundEnqueuer};
use bookline_core::config::AppConfig;
use bookline_core::degradation::{BacklogThresholds, DegradationController, HealthInputs, Level};
use bookline_core::collab::outbound_reply;
use bookline_core::domain::booking::BookingRequest;
use bookline_core::domain::crm::DateRange;
use bookline_core::domain::message::{Channel, InboundMessage, Priority};
use bookline_core::domain::session::{ConversationState, Session, SessionKey, TurnRole};
use bookline_core::domain::slot::SlotPatch;
use bookline_core::errors::{ApplicationError, Dependency};
use bookline_core::fsm::{
    self, Effect, EngineContext, ExternalOutcome, FsmEvent, Intent, TimerKind,
};
use bookline_core::idempotency::{AcquireOutcome, Fingerprint, HolderToken, IdempotencyStore};
use bookline_core::knowledge::KnowledgeBase;
use bookline_core::policy::{PolicyEnforcer, TurnFacts};
use bookline_core::replies::{ReplyComposer, ReplyKind};
use bookline_core::slots::SlotManager;
use bookline_core::temporal::TemporalParser;

use bookline_db::repositories::{DedupRepository, FallbackRepository, SessionRepository};

use crate::extract::{parse_model_turn, resolve_turn};
use crate::intent::KeywordClassifier;
use crate::llm::ModelClient;

/// Redelivered message ids inside this window are dropped without work.
pub fn dedup_window() -> Duration {
    Duration::minutes(5)
}

/// Flat spend approximation; exact accounting lives with the provider.
const COST_CENTS_PER_1K_TOKENS: u64 = 2;

const LOCK_RETRIES: u32 = 3;
const LOCK_RETRY_DELAY: StdDuration = StdDuration::from_millis(50);

/// Shared dependency health flags, written by callers on call outcomes and
/// by the watchdog's health checks, read on every turn.
#[derive(Debug)]
pub struct HealthState {
    crm: AtomicBool,
    model: AtomicBool,
}

impl HealthState {
    pub fn new() -> Self {
        Self { crm: AtomicBool::new(true), model: AtomicBool::new(true) }
    }

    pub fn set_crm(&self, healthy: bool) {
        self.crm.store(healthy, Ordering::Release);
    }

    pub fn set_model(&self, healthy: bool) {
        self.model.store(healthy, Ordering::Release);
    }

    pub fn crm(&self) -> bool {
        self.crm.load(Ordering::Acquire)
    }

    pub fn model(&self) -> bool {
        self.model.load(Ordering::Acquire)
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// External collaborators handed to the runtime.
pub struct RuntimeServices {
    pub sessions: Arc<dyn SessionRepository>,
    pub dedup: Arc<dyn DedupRepository>,
    pub fallback: Arc<dyn FallbackRepository>,
    pub outbound: Arc<dyn OutboundEnqueuer>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub crm: Arc<dyn CrmClient>,
    pub model: Arc<dyn ModelClient>,
    pub knowledge: Arc<KnowledgeBase>,
    pub budget: Arc<BudgetGuard>,
}

#[derive(Clone, Debug)]
pub struct RuntimeSettings {
    pub session_ttl: Duration,
    pub processing_lock_ttl: Duration,
    pub crm_deadline: StdDuration,
    pub model_deadline: StdDuration,
    pub max_reask_attempts: u32,
    pub utc_offset_minutes: i32,
    pub recovery_dwell: Duration,
    pub backlog: BacklogThresholds,
    pub admin_chat_id: String,
    pub worker_id: String,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            session_ttl: Duration::hours(config.timing.session_ttl_hours as i64),
            processing_lock_ttl: Duration::seconds(config.timing.processing_lock_ttl_secs as i64),
            crm_deadline: StdDuration::from_secs(config.crm.timeout_secs),
            model_deadline: StdDuration::from_secs(config.model.timeout_secs),
            max_reask_attempts: config.model.max_reask_attempts,
            utc_offset_minutes: config.timing.utc_offset_minutes,
            recovery_dwell: Duration::seconds(60),
            backlog: BacklogThresholds {
                dead_letter_depth: config.timing.dead_letter_alert_depth,
                fallback_depth: config.timing.fallback_alert_depth,
            },
            admin_chat_id: config.channels.admin_chat_id.clone(),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

pub struct ConversationRuntime {
    services: RuntimeServices,
    settings: RuntimeSettings,
    slot_manager: SlotManager,
    composer: ReplyComposer,
    keywords: KeywordClassifier,
    policy: PolicyEnforcer,
    degradation: Mutex<DegradationController>,
    health: Arc<HealthState>,
    /// Idempotency tokens held across a booking call, keyed by fingerprint.
    holder_tokens: Mutex<HashMap<String, HolderToken>>,
}

impl ConversationRuntime {
    pub fn new(services: RuntimeServices, settings: RuntimeSettings) -> Self {
        let slot_manager = SlotManager::new(TemporalParser::new(settings.utc_offset_minutes));
        let composer = ReplyComposer::new(settings.utc_offset_minutes);
        let degradation =
            Mutex::new(DegradationController::new(settings.recovery_dwell, settings.backlog));
        Self {
            services,
            settings,
            slot_manager,
            composer,
            keywords: KeywordClassifier::new(),
            policy: PolicyEnforcer::standard(),
            degradation,
            health: Arc::new(HealthState::new()),
            holder_tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn health(&self) -> Arc<HealthState> {
        Arc::clone(&self.health)
    }

    /// Recomputes the effective degradation level from current health.
    pub fn current_level(&self, now: DateTime<Utc>) -> Level {
        let inputs = HealthInputs {
            crm_healthy: self.health.crm(),
            model_healthy: self.health.model(),
            budget_shut_down: self.services.budget.is_shut_down(),
            channel_healthy: Vec::new(),
        };
        let mut controller = match self.degradation.lock() {
            Ok(controller) => controller,
            Err(poisoned) => poisoned.into_inner(),
        };
        controller.observe(&inputs, now)
    }

    /// Administrative clear of the daily cost hard cap; window-scoped
    /// budget counters recover on their own rollover.
    pub fn reset_daily_budget(&self, now: DateTime<Utc>) {
        self.services.budget.reset_daily_cost(now);
    }

    /// Feeds queue depths into the backlog alarm; true on the rising edge.
    pub fn note_backlog(&self, dead_letter_depth: u64, fallback_depth: u64) -> bool {
        let mut controller = match self.degradation.lock() {
            Ok(controller) => controller,
            Err(poisoned) => poisoned.into_inner(),
        };
        controller.observe_backlog(dead_letter_depth, fallback_depth)
    }

    /// Entry point for one gateway-delivered message. A busy session is a
    /// retryable error: the message is not marked seen, so the gateway can
    /// deliver it again once the lock holder finishes.
    pub async fn handle_inbound(&self, message: InboundMessage) -> Result<(), ApplicationError> {
        let now = Utc::now();
        let key = SessionKey::new(message.channel, message.chat_id.clone());

        if !self.acquire_session(&key, now).await? {
            warn!(event_name = "session_busy", session = %key, "processing lock not acquired");
            return Err(ApplicationError::SessionBusy { session: key.to_string() });
        }

        let result = self.locked_inbound(&key, message, now).await;
        let _ = self
            .services
            .sessions
            .release_processing_lock(&key, &self.settings.worker_id)
            .await;
        result
    }

    /// Watchdog-injected timer for one session. Missing sessions are fine;
    /// the sweep may race a reset.
    pub async fn handle_timer(
        &self,
        key: &SessionKey,
        kind: TimerKind,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        if !self.acquire_session(key, now).await? {
            return Ok(());
        }
        let result = match self.services.sessions.find(key).await? {
            Some(mut session) => {
                self.run_turn(&mut session, FsmEvent::TimerFired { kind }, now).await
            }
            None => Ok(()),
        };
        let _ =
            self.services.sessions.release_processing_lock(key, &self.settings.worker_id).await;
        result
    }

    pub async fn handle_admin_reply(
        &self,
        key: &SessionKey,
        text: String,
    ) -> Result<(), ApplicationError> {
        self.admin_event(key, FsmEvent::AdminReply { text }).await
    }

    pub async fn handle_admin_close(&self, key: &SessionKey) -> Result<(), ApplicationError> {
        self.admin_event(key, FsmEvent::AdminClose).await
    }

    async fn admin_event(
        &self,
        key: &SessionKey,
        event: FsmEvent,
    ) -> Result<(), ApplicationError> {
        let now = Utc::now();
        if !self.acquire_session(key, now).await? {
            return Ok(());
        }
        let result = match self.services.sessions.find(key).await? {
            Some(mut session) => self.run_turn(&mut session, event, now).await,
            None => Ok(()),
        };
        let _ =
            self.services.sessions.release_processing_lock(key, &self.settings.worker_id).await;
        result
    }

    async fn acquire_session(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<bool, ApplicationError> {
        for attempt in 0..LOCK_RETRIES {
            let acquired = self
                .services
                .sessions
                .acquire_processing_lock(
                    key,
                    &self.settings.worker_id,
                    self.settings.processing_lock_ttl,
                    now,
                )
                .await?;
            if acquired {
                return Ok(true);
            }
            if attempt + 1 < LOCK_RETRIES {
                tokio::time::sleep(LOCK_RETRY_DELAY).await;
            }
        }
        Ok(false)
    }

    async fn locked_inbound(
        &self,
        key: &SessionKey,
        message: InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        // Marked under the processing lock: a rejected-and-retried message
        // must not be mistaken for a channel redelivery.
        let first_sighting = self
            .services
            .dedup
            .mark_seen(message.channel, &message.message_id, dedup_window(), now)
            .await?;
        if !first_sighting {
            debug!(
                event_name = "duplicate_suppressed",
                session = %key,
                message_id = %message.message_id,
                "dropping redelivered message"
            );
            return Ok(());
        }

        let mut session = match self.services.sessions.find(key).await? {
            Some(session) => session,
            None => Session::new(key.clone(), message.trace_id, now, self.settings.session_ttl),
        };
        session.touch(now, self.settings.session_ttl);

        if !message.kind.is_text() {
            self.send_reply(&mut session, &ReplyKind::Misunderstood).await?;
            self.services.sessions.upsert(&session).await?;
            return Ok(());
        }

        session.push_turn(TurnRole::User, message.text.clone());
        self.run_turn(&mut session, FsmEvent::InboundText { message }, now).await
    }

    /// Drives one event to quiescence. Effects that resolve into further
    /// events (classification, external call completions, buffered replay)
    /// are queued and applied in order rather than recursed into.
    async fn run_turn(
        &self,
        session: &mut Session,
        event: FsmEvent,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let mut pending = VecDeque::from([event]);

        while let Some(event) = pending.pop_front() {
            let context = EngineContext {
                now,
                degradation: self.current_level(now),
                budget_shut_down: self.services.budget.is_shut_down(),
                missing_slots: self.slot_manager.required_missing(&session.slots),
            };
            let transition = fsm::apply(session, &context, event)?;
            self.services.sessions.upsert(session).await?;

            for effect in transition.effects {
                match effect {
                    Effect::RequestIntent { message } => {
                        if let Some(event) = self.intent_event(session, &message, now).await? {
                            pending.push_back(event);
                        }
                    }
                    Effect::Reply(kind) => self.send_reply(session, &kind).await?,
                    Effect::StartBooking { request } => {
                        let outcome = self.run_booking(&request, now).await?;
                        pending.push_back(FsmEvent::ExternalCompletion { outcome });
                    }
                    Effect::StartCancellation { phone } => {
                        let outcome = self.run_cancellation(&phone).await;
                        pending.push_back(FsmEvent::ExternalCompletion { outcome });
                    }
                    Effect::QueueFallback { request } => {
                        self.services
                            .fallback
                            .enqueue(&session.key, &request, "crm unavailable", now)
                            .await?;
                    }
                    Effect::LookupSchedule { range } => {
                        let kind = self.lookup_schedule(range).await;
                        self.send_reply(session, &kind).await?;
                    }
                    Effect::AnswerPrice { group } => {
                        let kind = self.answer_price(group.as_deref());
                        self.send_reply(session, &kind).await?;
                    }
                    Effect::AnswerTopic { topic } => {
                        let kind = match self.services.knowledge.lookup(&topic) {
                            Some(answer) => ReplyKind::KnowledgeAnswer(answer),
                            None => ReplyKind::KnowledgeMiss,
                        };
                        self.send_reply(session, &kind).await?;
                    }
                    Effect::ForwardToAdmin { text } => {
                        self.send_to_admin(
                            session,
                            format!("{}: {text}", session.key),
                            Priority::Interactive,
                        )
                        .await?;
                    }
                    Effect::NotifyAdmin { note } => {
                        self.send_to_admin(session, note, Priority::Alert).await?;
                    }
                    Effect::ReleaseBookingLock { request } => {
                        self.release_booking_lock(&request).await;
                    }
                    Effect::ReplayBuffered { messages } => {
                        for message in messages {
                            pending.push_back(FsmEvent::InboundText { message });
                        }
                    }
                }
            }
        }

        self.services.sessions.upsert(session).await?;
        Ok(())
    }

    /// Turns raw text into the next engine event: a confirmation answer, a
    /// slot correction, or a classified intent. `None` when the turn was
    /// fully handled here (the fixed L3 reply).
    async fn intent_event(
        &self,
        session: &mut Session,
        message: &InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<Option<FsmEvent>, ApplicationError> {
        let level = self.current_level(now);
        if level >= Level::L3 {
            self.send_reply(session, &ReplyKind::TechnicalIssue).await?;
            return Ok(None);
        }

        let confirming = session.state == ConversationState::ConfirmBooking;
        if confirming {
            if let Some(affirmative) = self.keywords.affirmation(&message.text) {
                return Ok(Some(FsmEvent::ConfirmationReply { affirmative }));
            }
        }

        let (intent, mut patch) = self.classify(session, &message.text, level, now).await;
        if confirming {
            // Restating a value during confirmation counts as a correction,
            // otherwise the confirmed slot would shrug it off.
            for entry in &mut patch.entries {
                entry.correction = true;
            }
        }

        let report = self.slot_manager.merge(&mut session.slots, &patch, now);
        if let Some((slot, _)) = report.rejected.first() {
            self.send_reply(session, &ReplyKind::SlotRejected(*slot)).await?;
        }

        if confirming && !patch.is_empty() {
            return Ok(Some(FsmEvent::SlotCorrection { patch }));
        }
        Ok(Some(FsmEvent::IntentUpdate { intent, patch }))
    }

    async fn classify(
        &self,
        session: &Session,
        text: &str,
        level: Level,
        now: DateTime<Utc>,
    ) -> (Intent, SlotPatch) {
        if level.allows_model() {
            match self.model_classify(session, text, now).await {
                Ok(resolved) => return resolved,
                Err(error) => {
                    debug!(
                        event_name = "model_classification_skipped",
                        session = %session.key,
                        error = %error,
                        "falling back to keyword classification"
                    );
                }
            }
        }
        self.keywords.classify(text)
    }

    async fn model_classify(
        &self,
        session: &Session,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<(Intent, SlotPatch), ApplicationError> {
        if let Verdict::Breach(metric) =
            self.services.budget.record(Metric::RequestsPerMinute, 1, now)
        {
            return Err(ApplicationError::BudgetExceeded { metric: metric.as_str() });
        }

        let mut prompt = classification_prompt(session, text);
        for attempt in 0..=self.settings.max_reask_attempts {
            let raw = match tokio::time::timeout(
                self.settings.model_deadline,
                self.services.model.complete(&prompt),
            )
            .await
            {
                Ok(Ok(raw)) => {
                    self.health.set_model(true);
                    raw
                }
                Ok(Err(error)) => {
                    self.health.set_model(false);
                    self.services.budget.record(Metric::ErrorsPerHour, 1, now);
                    return Err(ApplicationError::ExternalUnavailable {
                        dependency: Dependency::Model,
                        detail: error.to_string(),
                    });
                }
                Err(_) => {
                    self.health.set_model(false);
                    self.services.budget.record(Metric::ErrorsPerHour, 1, now);
                    return Err(ApplicationError::ExternalUnavailable {
                        dependency: Dependency::Model,
                        detail: "request deadline".to_string(),
                    });
                }
            };

            // Rough token estimate; good enough for the budget windows.
            let tokens = ((prompt.len() + raw.len()) / 4) as u64;
            self.services.budget.record(Metric::TokensPerHour, tokens, now);
            self.services.budget.record(Metric::TokensPerDay, tokens, now);
            self.services.budget.record(
                Metric::CostPerDayCents,
                tokens.saturating_mul(COST_CENTS_PER_1K_TOKENS) / 1_000,
                now,
            );

            match parse_model_turn(&raw) {
                Some(turn) => {
                    if let Some(reply) = turn.reply.as_deref() {
                        let facts = TurnFacts { reply_text: reply, booking_call_issued: false };
                        if !self.policy.check(&facts, &self.services.knowledge).is_empty() {
                            // A tripped rule discards the whole model turn;
                            // the keyword path answers with canned text.
                            return Err(ApplicationError::MalformedModelOutput);
                        }
                    }
                    return Ok(resolve_turn(&turn));
                }
                None if attempt < self.settings.max_reask_attempts => {
                    prompt = reask_prompt(text);
                }
                None => {
                    self.services.budget.record(Metric::ErrorsPerHour, 1, now);
                    warn!(
                        event_name = "malformed_model_output",
                        session = %session.key,
                        "model output unrecoverable after re-ask"
                    );
                    return Err(ApplicationError::MalformedModelOutput);
                }
            }
        }
        Err(ApplicationError::MalformedModelOutput)
    }

    /// The exactly-once booking path: fingerprint lock first, CRM second.
    /// A held lock means someone else already owns this logical booking, so
    /// no external call is made at all.
    async fn run_booking(
        &self,
        request: &BookingRequest,
        now: DateTime<Utc>,
    ) -> Result<ExternalOutcome, ApplicationError> {
        let fingerprint = Fingerprint::of(request);
        match self.services.idempotency.acquire(&fingerprint, now).await? {
            AcquireOutcome::Acquired { token } => {
                if let Ok(mut tokens) = self.holder_tokens.lock() {
                    tokens.insert(fingerprint.0.clone(), token);
                }
            }
            AcquireOutcome::AlreadyHeld => {
                debug!(
                    event_name = "booking_duplicate_suppressed",
                    fingerprint = fingerprint.as_str(),
                    "idempotency lock already held, skipping crm call"
                );
                return Ok(ExternalOutcome::BookingFailed { error: CrmError::AlreadyBooked });
            }
        }

        let outcome = match tokio::time::timeout(
            self.settings.crm_deadline,
            self.services.crm.create_booking(request),
        )
        .await
        {
            Ok(Ok(reservation)) => {
                self.health.set_crm(true);
                ExternalOutcome::BookingCreated { reservation_id: reservation.id }
            }
            Ok(Err(error)) => {
                if error.is_transient() {
                    self.health.set_crm(false);
                }
                ExternalOutcome::BookingFailed { error }
            }
            Err(_) => {
                self.health.set_crm(false);
                ExternalOutcome::BookingFailed {
                    error: CrmError::Transient { detail: "request deadline".to_string() },
                }
            }
        };
        Ok(outcome)
    }

    async fn run_cancellation(&self, phone: &str) -> ExternalOutcome {
        let bookings = match tokio::time::timeout(
            self.settings.crm_deadline,
            self.services.crm.future_bookings(phone),
        )
        .await
        {
            Ok(Ok(bookings)) => {
                self.health.set_crm(true);
                bookings
            }
            Ok(Err(error)) => {
                if error.is_transient() {
                    self.health.set_crm(false);
                }
                return ExternalOutcome::CancellationFailed { error };
            }
            Err(_) => {
                self.health.set_crm(false);
                return ExternalOutcome::CancellationFailed {
                    error: CrmError::Transient { detail: "request deadline".to_string() },
                };
            }
        };

        let Some(nearest) = bookings.first() else {
            return ExternalOutcome::CancellationFailed { error: CrmError::NotFound };
        };

        match tokio::time::timeout(
            self.settings.crm_deadline,
            self.services.crm.cancel_booking(nearest),
        )
        .await
        {
            Ok(Ok(())) => ExternalOutcome::CancellationCompleted,
            Ok(Err(error)) => {
                if error.is_transient() {
                    self.health.set_crm(false);
                }
                ExternalOutcome::CancellationFailed { error }
            }
            Err(_) => {
                self.health.set_crm(false);
                ExternalOutcome::CancellationFailed {
                    error: CrmError::Transient { detail: "request deadline".to_string() },
                }
            }
        }
    }

    async fn lookup_schedule(&self, range: DateRange) -> ReplyKind {
        match tokio::time::timeout(self.settings.crm_deadline, self.services.crm.schedule(range))
            .await
        {
            Ok(Ok(entries)) if entries.is_empty() => {
                self.health.set_crm(true);
                ReplyKind::ScheduleEmpty
            }
            Ok(Ok(entries)) => {
                self.health.set_crm(true);
                ReplyKind::ScheduleList(entries)
            }
            Ok(Err(error)) => {
                if error.is_transient() {
                    self.health.set_crm(false);
                }
                ReplyKind::KnowledgeMiss
            }
            Err(_) => {
                self.health.set_crm(false);
                ReplyKind::KnowledgeMiss
            }
        }
    }

    fn answer_price(&self, group: Option<&str>) -> ReplyKind {
        match group {
            Some(group) => match self.services.knowledge.price_of(group) {
                Some(price) => {
                    ReplyKind::KnowledgeAnswer(format!("{group} is {price}₽ per class."))
                }
                None => ReplyKind::KnowledgeMiss,
            },
            None => {
                let prices = self.services.knowledge.all_prices();
                if prices.is_empty() {
                    return ReplyKind::KnowledgeMiss;
                }
                let mut lines = vec!["Our prices per class:".to_string()];
                for (group, price) in prices {
                    lines.push(format!("• {group}: {price}₽"));
                }
                ReplyKind::KnowledgeAnswer(lines.join("\n"))
            }
        }
    }

    async fn send_reply(
        &self,
        session: &mut Session,
        kind: &ReplyKind,
    ) -> Result<(), ApplicationError> {
        let body = self.composer.render(kind);
        session.push_turn(TurnRole::Assistant, body.clone());
        let message = outbound_reply(
            session.key.channel,
            session.key.chat_id.clone(),
            body,
            Priority::Interactive,
            session.trace_id.to_string(),
        );
        self.services
            .outbound
            .enqueue(message)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))
    }

    async fn send_to_admin(
        &self,
        session: &Session,
        body: String,
        priority: Priority,
    ) -> Result<(), ApplicationError> {
        let message = outbound_reply(
            Channel::Telegram,
            self.settings.admin_chat_id.clone(),
            body,
            priority,
            session.trace_id.to_string(),
        );
        self.services
            .outbound
            .enqueue(message)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))
    }

    /// Best-effort: expiry guarantees eventual availability either way.
    async fn release_booking_lock(&self, request: &BookingRequest) {
        let fingerprint = Fingerprint::of(request);
        let token = match self.holder_tokens.lock() {
            Ok(mut tokens) => tokens.remove(fingerprint.as_str()),
            Err(_) => None,
        };
        let Some(token) = token else { return };
        if let Err(error) = self.services.idempotency.release(&fingerprint, &token).await {
            warn!(
                event_name = "idempotency_release_failed",
                fingerprint = fingerprint.as_str(),
                error = %error,
                "leaving lock to expire"
            );
        }
    }
}

fn classification_prompt(session: &Session, text: &str) -> String {
    let mut prompt = String::from(
        "You classify messages for a dance studio booking assistant. Respond with one JSON \
         object: {\"intent\": \"booking|cancel|admin_escalation|schedule|price|info|lateness|\
         greeting|unknown\", \"slots\": {\"group\", \"datetime\", \"client_name\", \
         \"client_phone\"}, \"reply\": optional}. Include only slots actually present in the \
         message. Dates stay as the raw phrase.\n\nConversation so far:\n",
    );
    for turn in &session.history {
        let role = match turn.role {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        };
        prompt.push_str(&format!("{role}: {}\n", turn.content));
    }
    prompt.push_str(&format!("\nClassify this message: {text}\n"));
    prompt
}

fn reask_prompt(text: &str) -> String {
    format!(
        "Respond with exactly one JSON object and nothing else, no prose, no code fences. \
         Classify this message: {text}"
    )
}
