//! The transition function. Pure over (session, context, event): no clocks,
//! no I/O, no randomness; every side effect leaves as an [`Effect`].

use chrono::Duration;
use tracing::debug;

use crate::collab::CrmError;
use crate::degradation::Level;
use crate::domain::booking::BookingRequest;
use crate::domain::crm::DateRange;
use crate::domain::session::{ConversationState, Session};
use crate::domain::slot::SlotName;
use crate::errors::DomainError;
use crate::replies::ReplyKind;

use super::{
    collecting_state_for, Effect, EngineContext, ExternalOutcome, FsmEvent, Intent, TimerKind,
    Transition,
};

/// Per-state inactivity timeout, consulted by the watchdog. `None` means
/// the state never times out on its own.
pub fn state_timeout(state: ConversationState) -> Option<Duration> {
    match state {
        ConversationState::Idle => None,
        ConversationState::CollectingIntent
        | ConversationState::BrowsingSchedule
        | ConversationState::CollectingGroup
        | ConversationState::CollectingDateTime
        | ConversationState::CollectingContact
        | ConversationState::SerialBooking
        | ConversationState::CancelFlow => Some(Duration::minutes(30)),
        ConversationState::ConfirmBooking => Some(Duration::hours(3)),
        ConversationState::BookingInProgress => Some(Duration::seconds(30)),
        ConversationState::BookingDone => Some(Duration::seconds(5)),
        ConversationState::HandoffToAdmin | ConversationState::AdminResponding => {
            Some(Duration::hours(4))
        }
    }
}

/// Quiet time in confirm-booking before the single re-prompt.
pub fn confirm_nudge_after() -> Duration {
    Duration::hours(1)
}

/// Applies one event to a session. The session is mutated in place (state,
/// resumption marker, buffers); everything else comes back as effects for
/// the runtime to execute after the transition is persisted.
pub fn apply(
    session: &mut Session,
    ctx: &EngineContext,
    event: FsmEvent,
) -> Result<Transition, DomainError> {
    let from = session.state;
    let event_name = event.name();

    let transition = match session.state {
        ConversationState::BookingInProgress => apply_booking_in_progress(session, ctx, event)?,
        ConversationState::AdminResponding | ConversationState::HandoffToAdmin => {
            apply_handoff(session, ctx, event)?
        }
        ConversationState::ConfirmBooking => apply_confirm_booking(session, ctx, event)?,
        _ => apply_conversing(session, ctx, event)?,
    };

    debug!(
        event_name = "fsm_transition",
        correlation_id = %session.trace_id,
        session = %session.key,
        event = event_name,
        from = from.as_str(),
        to = transition.to.as_str(),
        effects = transition.effects.len(),
        "applied conversation event"
    );

    Ok(transition)
}

fn apply_booking_in_progress(
    session: &mut Session,
    ctx: &EngineContext,
    event: FsmEvent,
) -> Result<Transition, DomainError> {
    let from = session.state;
    match event {
        // Inbound traffic is buffered rather than processed; it must not
        // race the outstanding CRM call.
        FsmEvent::InboundText { message } => {
            session.buffer_inbound(message);
            Ok(stay(from))
        }
        FsmEvent::IntentUpdate { .. }
        | FsmEvent::SlotCorrection { .. }
        | FsmEvent::ConfirmationReply { .. } => Ok(stay(from)),
        FsmEvent::TimerFired { kind: TimerKind::ConfirmNudge } => Ok(stay(from)),
        // The call outlived its deadline. Resolve the session now; the
        // idempotency lock, not cancellation, prevents a duplicate if the
        // delayed call later succeeds.
        FsmEvent::TimerFired { kind: TimerKind::StateTimeout } => {
            let mut effects = Vec::new();
            if let Some(request) = booking_request(session) {
                effects.push(Effect::QueueFallback { request });
            }
            effects.push(Effect::Reply(ReplyKind::AdminWillConfirm));
            effects.push(Effect::NotifyAdmin {
                note: format!("booking call timed out for {}", session.key),
            });
            effects.push(Effect::ReplayBuffered { messages: session.drain_buffered() });
            session.enter_state(ConversationState::Idle, ctx.now);
            session.slots.clear();
            session.resume_state = None;
            Ok(Transition { from, to: session.state, effects })
        }
        FsmEvent::ExternalCompletion { outcome } => {
            finish_booking_call(session, ctx, from, outcome)
        }
        FsmEvent::AdminReply { text } => {
            Ok(with_effects(from, vec![Effect::Reply(ReplyKind::AdminRelay(text))]))
        }
        FsmEvent::AdminClose => Ok(stay(from)),
    }
}

fn finish_booking_call(
    session: &mut Session,
    ctx: &EngineContext,
    from: ConversationState,
    outcome: ExternalOutcome,
) -> Result<Transition, DomainError> {
    let request = booking_request(session);
    let replay = Effect::ReplayBuffered { messages: session.drain_buffered() };

    match outcome {
        ExternalOutcome::BookingCreated { .. } => {
            let mut effects = Vec::new();
            if let Some(request) = request {
                effects.push(Effect::Reply(ReplyKind::BookingReceipt(request.clone())));
                effects.push(Effect::ReleaseBookingLock { request });
            }
            effects.push(replay);
            session.enter_state(ConversationState::BookingDone, ctx.now);
            Ok(Transition { from, to: session.state, effects })
        }
        ExternalOutcome::BookingFailed { error } if error.is_transient() => {
            let mut effects = Vec::new();
            if let Some(request) = request {
                effects.push(Effect::QueueFallback { request });
            }
            effects.push(Effect::Reply(ReplyKind::AdminWillConfirm));
            effects.push(Effect::NotifyAdmin {
                note: format!("booking failed for {}: {error}", session.key),
            });
            effects.push(replay);
            session.enter_state(ConversationState::Idle, ctx.now);
            session.slots.clear();
            Ok(Transition { from, to: session.state, effects })
        }
        ExternalOutcome::BookingFailed { error } => {
            // A categorical refusal: the chosen slot is unbookable, but the
            // rest of the collected data stays useful.
            let mut effects = vec![Effect::Reply(ReplyKind::CrmTrouble(error))];
            if let Some(request) = request {
                effects.push(Effect::ReleaseBookingLock { request });
            }
            effects.push(replay);
            session.slots.remove(SlotName::DateTime);
            session.slots.remove(SlotName::ScheduleId);
            session.enter_state(ConversationState::CollectingDateTime, ctx.now);
            Ok(Transition { from, to: session.state, effects })
        }
        ExternalOutcome::CancellationCompleted | ExternalOutcome::CancellationFailed { .. } => {
            Err(DomainError::InvalidTransition { from, event: "external_completion" })
        }
    }
}

fn apply_handoff(
    session: &mut Session,
    ctx: &EngineContext,
    event: FsmEvent,
) -> Result<Transition, DomainError> {
    let from = session.state;
    match event {
        // Client messages go to the admin verbatim and nowhere else.
        FsmEvent::InboundText { message } => {
            Ok(with_effects(from, vec![Effect::ForwardToAdmin { text: message.text }]))
        }
        FsmEvent::IntentUpdate { .. }
        | FsmEvent::SlotCorrection { .. }
        | FsmEvent::ConfirmationReply { .. } => Ok(stay(from)),
        FsmEvent::AdminReply { text } => {
            session.enter_state(ConversationState::AdminResponding, ctx.now);
            Ok(Transition {
                from,
                to: session.state,
                effects: vec![Effect::Reply(ReplyKind::AdminRelay(text))],
            })
        }
        FsmEvent::AdminClose => {
            session.reset(ctx.now, remaining_ttl(session, ctx));
            Ok(Transition {
                from,
                to: session.state,
                effects: vec![Effect::Reply(ReplyKind::HandoffClosed)],
            })
        }
        FsmEvent::TimerFired { kind: TimerKind::StateTimeout } => {
            session.reset(ctx.now, remaining_ttl(session, ctx));
            Ok(Transition {
                from,
                to: session.state,
                effects: vec![
                    Effect::Reply(ReplyKind::SessionExpired),
                    Effect::NotifyAdmin { note: format!("handoff expired for {}", session.key) },
                ],
            })
        }
        FsmEvent::TimerFired { kind: TimerKind::ConfirmNudge } => Ok(stay(from)),
        FsmEvent::ExternalCompletion { .. } => {
            Err(DomainError::InvalidTransition { from, event: "external_completion" })
        }
    }
}

fn apply_confirm_booking(
    session: &mut Session,
    ctx: &EngineContext,
    event: FsmEvent,
) -> Result<Transition, DomainError> {
    let from = session.state;
    match event {
        FsmEvent::ConfirmationReply { affirmative: true } => {
            confirm_affirmative(session, ctx, from)
        }
        FsmEvent::ConfirmationReply { affirmative: false } => {
            session.enter_state(ConversationState::CollectingIntent, ctx.now);
            Ok(Transition {
                from,
                to: session.state,
                effects: vec![Effect::Reply(ReplyKind::ConfirmDeclined)],
            })
        }
        // The patch was merged upstream; just re-present the summary.
        FsmEvent::SlotCorrection { .. } => {
            let effects = match booking_request(session) {
                Some(request) => vec![Effect::Reply(ReplyKind::BookingSummary(request))],
                None => prompt_missing(ctx),
            };
            Ok(with_effects(from, effects))
        }
        FsmEvent::TimerFired { kind: TimerKind::ConfirmNudge } => {
            if session.confirm_nudge_sent {
                return Ok(stay(from));
            }
            session.confirm_nudge_sent = true;
            Ok(with_effects(from, vec![Effect::Reply(ReplyKind::ConfirmNudge)]))
        }
        FsmEvent::TimerFired { kind: TimerKind::StateTimeout } => {
            session.reset(ctx.now, remaining_ttl(session, ctx));
            Ok(Transition {
                from,
                to: session.state,
                effects: vec![Effect::Reply(ReplyKind::ConfirmExpired)],
            })
        }
        other => apply_conversing(session, ctx, other),
    }
}

fn confirm_affirmative(
    session: &mut Session,
    ctx: &EngineContext,
    from: ConversationState,
) -> Result<Transition, DomainError> {
    let Some(request) = booking_request(session) else {
        // Required slots regressed; fall back to collection.
        return advance_collection(session, ctx, from);
    };

    if ctx.degradation >= Level::L3 {
        session.enter_state(ConversationState::Idle, ctx.now);
        session.slots.clear();
        return Ok(Transition {
            from,
            to: session.state,
            effects: vec![
                Effect::QueueFallback { request },
                Effect::Reply(ReplyKind::TechnicalIssue),
                Effect::NotifyAdmin { note: format!("degraded booking from {}", session.key) },
            ],
        });
    }

    if ctx.degradation >= Level::L1 {
        // CRM unreachable; preserve the intent instead of calling it.
        session.enter_state(ConversationState::Idle, ctx.now);
        session.slots.clear();
        return Ok(Transition {
            from,
            to: session.state,
            effects: vec![
                Effect::QueueFallback { request },
                Effect::Reply(ReplyKind::AdminWillConfirm),
            ],
        });
    }

    session.enter_state(ConversationState::BookingInProgress, ctx.now);
    Ok(Transition { from, to: session.state, effects: vec![Effect::StartBooking { request }] })
}

/// All remaining states: idle, the collecting states, browsing, serial
/// booking, cancel flow and booking-done.
fn apply_conversing(
    session: &mut Session,
    ctx: &EngineContext,
    event: FsmEvent,
) -> Result<Transition, DomainError> {
    let from = session.state;
    match event {
        FsmEvent::InboundText { message } => {
            Ok(with_effects(from, vec![Effect::RequestIntent { message }]))
        }
        FsmEvent::IntentUpdate { intent, .. } => apply_intent(session, ctx, from, intent),
        FsmEvent::SlotCorrection { .. } => advance_collection(session, ctx, from),
        FsmEvent::ConfirmationReply { .. } => Ok(stay(from)),
        FsmEvent::TimerFired { kind: TimerKind::ConfirmNudge } => Ok(stay(from)),
        // Covers both the booking-done grace delay and stale collection
        // states; neither warrants a message.
        FsmEvent::TimerFired { kind: TimerKind::StateTimeout } => {
            session.reset(ctx.now, remaining_ttl(session, ctx));
            Ok(Transition { from, to: session.state, effects: Vec::new() })
        }
        FsmEvent::ExternalCompletion { outcome } if from == ConversationState::CancelFlow => {
            finish_cancellation(session, ctx, from, outcome)
        }
        FsmEvent::ExternalCompletion { .. } => {
            Err(DomainError::InvalidTransition { from, event: "external_completion" })
        }
        FsmEvent::AdminReply { text } => {
            Ok(with_effects(from, vec![Effect::Reply(ReplyKind::AdminRelay(text))]))
        }
        FsmEvent::AdminClose => Ok(stay(from)),
    }
}

fn apply_intent(
    session: &mut Session,
    ctx: &EngineContext,
    from: ConversationState,
    intent: Intent,
) -> Result<Transition, DomainError> {
    // A lower-priority topic arriving mid-flow is a digression: answer it
    // in place, leave the marker pointing at the interrupted flow, and
    // offer to continue.
    if from.in_booking_flow() && intent.rank() < 3 && !matches!(intent, Intent::Unknown) {
        let mut effects = answer_digression(&intent, ctx);
        effects.push(Effect::Reply(ReplyKind::OfferResume(from)));
        session.resume_state = Some(from);
        return Ok(with_effects(from, effects));
    }

    match intent {
        Intent::Booking => {
            session.resume_state = None;
            if from == ConversationState::BookingDone {
                // One more booking for the same contact: keep who, drop what.
                session.slots.remove(SlotName::Group);
                session.slots.remove(SlotName::DateTime);
                session.slots.remove(SlotName::ScheduleId);
                session.enter_state(ConversationState::SerialBooking, ctx.now);
                return Ok(Transition {
                    from,
                    to: session.state,
                    effects: vec![Effect::Reply(ReplyKind::PromptSlot(SlotName::Group))],
                });
            }
            advance_collection(session, ctx, from)
        }
        Intent::Cancel => {
            session.resume_state = None;
            session.enter_state(ConversationState::CancelFlow, ctx.now);
            let effects = match session.slots.phone() {
                Some(phone) => vec![Effect::StartCancellation { phone: phone.to_string() }],
                None => vec![Effect::Reply(ReplyKind::PromptSlot(SlotName::ClientPhone))],
            };
            Ok(Transition { from, to: session.state, effects })
        }
        Intent::AdminEscalation => {
            session.resume_state = None;
            session.enter_state(ConversationState::HandoffToAdmin, ctx.now);
            Ok(Transition {
                from,
                to: session.state,
                effects: vec![
                    Effect::NotifyAdmin {
                        note: format!("client {} asked for an administrator", session.key),
                    },
                    Effect::Reply(ReplyKind::HandoffAck),
                ],
            })
        }
        Intent::Schedule => {
            session.enter_state(ConversationState::BrowsingSchedule, ctx.now);
            Ok(Transition {
                from,
                to: session.state,
                effects: vec![Effect::LookupSchedule { range: upcoming_week(ctx) }],
            })
        }
        Intent::Price { group } => Ok(with_effects(from, vec![Effect::AnswerPrice { group }])),
        Intent::Info { topic } => Ok(with_effects(from, vec![Effect::AnswerTopic { topic }])),
        Intent::Lateness => Ok(with_effects(
            from,
            vec![
                Effect::Reply(ReplyKind::LatenessAck),
                Effect::NotifyAdmin { note: format!("client {} will be late", session.key) },
            ],
        )),
        Intent::Greeting => {
            if from == ConversationState::Idle {
                session.enter_state(ConversationState::CollectingIntent, ctx.now);
            }
            Ok(Transition {
                from,
                to: session.state,
                effects: vec![Effect::Reply(ReplyKind::Greeting)],
            })
        }
        Intent::Unknown => Ok(with_effects(from, vec![Effect::Reply(ReplyKind::Misunderstood)])),
    }
}

fn answer_digression(intent: &Intent, ctx: &EngineContext) -> Vec<Effect> {
    match intent {
        Intent::Schedule => vec![Effect::LookupSchedule { range: upcoming_week(ctx) }],
        Intent::Price { group } => vec![Effect::AnswerPrice { group: group.clone() }],
        Intent::Info { topic } => vec![Effect::AnswerTopic { topic: topic.clone() }],
        Intent::Lateness => vec![Effect::Reply(ReplyKind::LatenessAck)],
        Intent::Greeting => vec![Effect::Reply(ReplyKind::Greeting)],
        _ => Vec::new(),
    }
}

/// Moves a booking flow forward: either into confirm-booking with a summary
/// or into the collecting state for the first missing slot.
fn advance_collection(
    session: &mut Session,
    ctx: &EngineContext,
    from: ConversationState,
) -> Result<Transition, DomainError> {
    if ctx.missing_slots.is_empty() {
        let Some(request) = booking_request(session) else {
            return Err(DomainError::InvariantViolation(
                "no missing slots reported but booking request is incomplete".to_string(),
            ));
        };
        session.enter_state(ConversationState::ConfirmBooking, ctx.now);
        return Ok(Transition {
            from,
            to: session.state,
            effects: vec![Effect::Reply(ReplyKind::BookingSummary(request))],
        });
    }

    let next = ctx.missing_slots[0];
    let target = collecting_state_for(next);
    if session.state != target {
        session.enter_state(target, ctx.now);
    }
    Ok(Transition {
        from,
        to: session.state,
        effects: vec![Effect::Reply(ReplyKind::PromptSlot(next))],
    })
}

fn finish_cancellation(
    session: &mut Session,
    ctx: &EngineContext,
    from: ConversationState,
    outcome: ExternalOutcome,
) -> Result<Transition, DomainError> {
    let reply = match outcome {
        ExternalOutcome::CancellationCompleted => ReplyKind::CancelConfirmed,
        ExternalOutcome::CancellationFailed { error: CrmError::NotFound } => {
            ReplyKind::NoBookingsToCancel
        }
        ExternalOutcome::CancellationFailed { error } if error.is_transient() => {
            session.reset(ctx.now, remaining_ttl(session, ctx));
            return Ok(Transition {
                from,
                to: session.state,
                effects: vec![
                    Effect::Reply(ReplyKind::AdminWillConfirm),
                    Effect::NotifyAdmin {
                        note: format!("cancellation failed for {}: {error}", session.key),
                    },
                ],
            });
        }
        ExternalOutcome::CancellationFailed { error } => ReplyKind::CrmTrouble(error),
        ExternalOutcome::BookingCreated { .. } | ExternalOutcome::BookingFailed { .. } => {
            return Err(DomainError::InvalidTransition { from, event: "external_completion" });
        }
    };
    session.reset(ctx.now, remaining_ttl(session, ctx));
    Ok(Transition { from, to: session.state, effects: vec![Effect::Reply(reply)] })
}

fn prompt_missing(ctx: &EngineContext) -> Vec<Effect> {
    match ctx.missing_slots.first() {
        Some(slot) => vec![Effect::Reply(ReplyKind::PromptSlot(*slot))],
        None => Vec::new(),
    }
}

/// Builds the booking request from collected slots; `None` while any
/// required slot is missing.
fn booking_request(session: &Session) -> Option<BookingRequest> {
    let group = session.slots.text(SlotName::Group)?.to_string();
    let starts_at = session.slots.datetime()?;
    let client_name = session.slots.text(SlotName::ClientName)?.to_string();
    let client_phone = session.slots.phone()?.to_string();
    let schedule_id = session
        .slots
        .text(SlotName::ScheduleId)
        .map(|id| crate::domain::crm::ScheduleId(id.to_string()));
    Some(BookingRequest {
        group,
        starts_at,
        client_name,
        client_phone,
        schedule_id,
        correlation_id: session.trace_id.to_string(),
    })
}

/// A reset keeps the retention expiry where it was; only fresh activity
/// extends it.
fn remaining_ttl(session: &Session, ctx: &EngineContext) -> Duration {
    (session.expires_at - ctx.now).max(Duration::zero())
}

fn stay(state: ConversationState) -> Transition {
    Transition { from: state, to: state, effects: Vec::new() }
}

fn with_effects(state: ConversationState, effects: Vec<Effect>) -> Transition {
    Transition { from: state, to: state, effects }
}

fn upcoming_week(ctx: &EngineContext) -> DateRange {
    let today = ctx.now.date_naive();
    DateRange { from: today, to: today + Duration::days(7) }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    use crate::collab::CrmError;
    use crate::degradation::Level;
    use crate::domain::message::{Channel, InboundMessage};
    use crate::domain::session::{ConversationState, Session, SessionKey};
    use crate::domain::slot::{Slot, SlotName, SlotPatch, SlotValue};
    use crate::replies::ReplyKind;

    use super::super::{Effect, EngineContext, ExternalOutcome, FsmEvent, Intent, TimerKind};
    use super::{apply, state_timeout};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap()
    }

    fn session_in(state: ConversationState) -> Session {
        let mut session = Session::new(
            SessionKey::new(Channel::Telegram, "chat-1"),
            Uuid::new_v4(),
            now(),
            Duration::hours(24),
        );
        session.enter_state(state, now());
        session
    }

    fn ctx(missing: Vec<SlotName>) -> EngineContext {
        EngineContext {
            now: now(),
            degradation: Level::L0,
            budget_shut_down: false,
            missing_slots: missing,
        }
    }

    fn fill_booking_slots(session: &mut Session) {
        session.slots.insert(
            SlotName::Group,
            Slot::corrected(SlotValue::Text { text: "salsa".into() }),
        );
        session.slots.insert(
            SlotName::DateTime,
            Slot::corrected(SlotValue::DateTime {
                raw: "tomorrow 19:00".into(),
                resolved: now() + Duration::hours(31),
            }),
        );
        session.slots.insert(
            SlotName::ClientName,
            Slot::corrected(SlotValue::Text { text: "Anna".into() }),
        );
        session.slots.insert(
            SlotName::ClientPhone,
            Slot::corrected(SlotValue::Phone { normalized: "+79990001122".into() }),
        );
    }

    #[test]
    fn booking_intent_with_missing_slots_prompts_first_gap() {
        let mut session = session_in(ConversationState::CollectingIntent);
        let transition = apply(
            &mut session,
            &ctx(vec![SlotName::DateTime, SlotName::ClientPhone]),
            FsmEvent::IntentUpdate { intent: Intent::Booking, patch: SlotPatch::default() },
        )
        .expect("transition");

        assert_eq!(transition.to, ConversationState::CollectingDateTime);
        assert_eq!(
            transition.effects,
            vec![Effect::Reply(ReplyKind::PromptSlot(SlotName::DateTime))]
        );
    }

    #[test]
    fn complete_slots_enter_confirm_with_summary() {
        let mut session = session_in(ConversationState::CollectingContact);
        fill_booking_slots(&mut session);
        let transition = apply(
            &mut session,
            &ctx(vec![]),
            FsmEvent::IntentUpdate { intent: Intent::Booking, patch: SlotPatch::default() },
        )
        .expect("transition");

        assert_eq!(transition.to, ConversationState::ConfirmBooking);
        assert!(matches!(
            transition.effects.as_slice(),
            [Effect::Reply(ReplyKind::BookingSummary(_))]
        ));
    }

    #[test]
    fn affirmative_confirmation_starts_booking() {
        let mut session = session_in(ConversationState::ConfirmBooking);
        fill_booking_slots(&mut session);
        let transition = apply(
            &mut session,
            &ctx(vec![]),
            FsmEvent::ConfirmationReply { affirmative: true },
        )
        .expect("transition");

        assert_eq!(transition.to, ConversationState::BookingInProgress);
        assert!(matches!(transition.effects.as_slice(), [Effect::StartBooking { .. }]));
    }

    #[test]
    fn no_side_effect_before_explicit_affirmative() {
        let mut session = session_in(ConversationState::ConfirmBooking);
        fill_booking_slots(&mut session);
        let transition = apply(
            &mut session,
            &ctx(vec![]),
            FsmEvent::ConfirmationReply { affirmative: false },
        )
        .expect("transition");

        assert_eq!(transition.to, ConversationState::CollectingIntent);
        assert!(transition
            .effects
            .iter()
            .all(|effect| !matches!(effect, Effect::StartBooking { .. })));
    }

    #[test]
    fn crm_degradation_queues_fallback_instead_of_calling() {
        let mut session = session_in(ConversationState::ConfirmBooking);
        fill_booking_slots(&mut session);
        let mut context = ctx(vec![]);
        context.degradation = Level::L1;

        let transition = apply(
            &mut session,
            &context,
            FsmEvent::ConfirmationReply { affirmative: true },
        )
        .expect("transition");

        assert_eq!(transition.to, ConversationState::Idle);
        assert!(matches!(
            transition.effects.as_slice(),
            [Effect::QueueFallback { .. }, Effect::Reply(ReplyKind::AdminWillConfirm)]
        ));
    }

    #[test]
    fn inbound_during_booking_call_is_buffered_and_replayed() {
        let mut session = session_in(ConversationState::BookingInProgress);
        fill_booking_slots(&mut session);

        let message = InboundMessage::text_message(Channel::Telegram, "chat-1", "m2", "hello?");
        let transition = apply(
            &mut session,
            &ctx(vec![]),
            FsmEvent::InboundText { message: message.clone() },
        )
        .expect("transition");
        assert_eq!(transition.to, ConversationState::BookingInProgress);
        assert!(transition.effects.is_empty());
        assert_eq!(session.buffered.len(), 1);

        let transition = apply(
            &mut session,
            &ctx(vec![]),
            FsmEvent::ExternalCompletion {
                outcome: ExternalOutcome::BookingCreated {
                    reservation_id: crate::domain::crm::ReservationId("r1".into()),
                },
            },
        )
        .expect("transition");

        assert_eq!(transition.to, ConversationState::BookingDone);
        let replayed = transition.effects.iter().find_map(|effect| match effect {
            Effect::ReplayBuffered { messages } => Some(messages.clone()),
            _ => None,
        });
        assert_eq!(replayed, Some(vec![message]));
        assert!(session.buffered.is_empty());
    }

    #[test]
    fn booking_call_timeout_resolves_to_fallback() {
        let mut session = session_in(ConversationState::BookingInProgress);
        fill_booking_slots(&mut session);

        let transition = apply(
            &mut session,
            &ctx(vec![]),
            FsmEvent::TimerFired { kind: TimerKind::StateTimeout },
        )
        .expect("transition");

        assert_eq!(transition.to, ConversationState::Idle);
        assert!(transition
            .effects
            .iter()
            .any(|effect| matches!(effect, Effect::QueueFallback { .. })));
        assert!(transition
            .effects
            .iter()
            .any(|effect| matches!(effect, Effect::Reply(ReplyKind::AdminWillConfirm))));
    }

    #[test]
    fn digression_answers_without_leaving_the_flow() {
        let mut session = session_in(ConversationState::CollectingDateTime);
        let transition = apply(
            &mut session,
            &ctx(vec![SlotName::DateTime]),
            FsmEvent::IntentUpdate {
                intent: Intent::Price { group: Some("salsa".into()) },
                patch: SlotPatch::default(),
            },
        )
        .expect("transition");

        assert_eq!(transition.to, ConversationState::CollectingDateTime);
        assert_eq!(session.resume_state, Some(ConversationState::CollectingDateTime));
        assert!(matches!(
            transition.effects.as_slice(),
            [
                Effect::AnswerPrice { .. },
                Effect::Reply(ReplyKind::OfferResume(ConversationState::CollectingDateTime)),
            ]
        ));
    }

    #[test]
    fn confirm_nudge_fires_once_then_expiry_resets() {
        let mut session = session_in(ConversationState::ConfirmBooking);
        fill_booking_slots(&mut session);

        let first = apply(
            &mut session,
            &ctx(vec![]),
            FsmEvent::TimerFired { kind: TimerKind::ConfirmNudge },
        )
        .expect("transition");
        assert!(matches!(first.effects.as_slice(), [Effect::Reply(ReplyKind::ConfirmNudge)]));
        assert!(session.confirm_nudge_sent);

        let second = apply(
            &mut session,
            &ctx(vec![]),
            FsmEvent::TimerFired { kind: TimerKind::ConfirmNudge },
        )
        .expect("transition");
        assert!(second.effects.is_empty());

        let expiry = apply(
            &mut session,
            &ctx(vec![]),
            FsmEvent::TimerFired { kind: TimerKind::StateTimeout },
        )
        .expect("transition");
        assert_eq!(expiry.to, ConversationState::Idle);
        assert!(matches!(expiry.effects.as_slice(), [Effect::Reply(ReplyKind::ConfirmExpired)]));
    }

    #[test]
    fn admin_responding_forwards_verbatim() {
        let mut session = session_in(ConversationState::AdminResponding);
        let message =
            InboundMessage::text_message(Channel::Telegram, "chat-1", "m3", "any news?");
        let transition =
            apply(&mut session, &ctx(vec![]), FsmEvent::InboundText { message }).expect("ok");

        assert_eq!(transition.to, ConversationState::AdminResponding);
        assert_eq!(
            transition.effects,
            vec![Effect::ForwardToAdmin { text: "any news?".into() }]
        );
    }

    #[test]
    fn serial_booking_keeps_contact_slots() {
        let mut session = session_in(ConversationState::BookingDone);
        fill_booking_slots(&mut session);

        let transition = apply(
            &mut session,
            &ctx(vec![]),
            FsmEvent::IntentUpdate { intent: Intent::Booking, patch: SlotPatch::default() },
        )
        .expect("transition");

        assert_eq!(transition.to, ConversationState::SerialBooking);
        assert!(!session.slots.contains(SlotName::Group));
        assert!(!session.slots.contains(SlotName::DateTime));
        assert_eq!(session.slots.phone(), Some("+79990001122"));
        assert_eq!(session.slots.text(SlotName::ClientName), Some("Anna"));
    }

    #[test]
    fn categorical_booking_failure_reopens_datetime() {
        let mut session = session_in(ConversationState::BookingInProgress);
        fill_booking_slots(&mut session);

        let transition = apply(
            &mut session,
            &ctx(vec![]),
            FsmEvent::ExternalCompletion {
                outcome: ExternalOutcome::BookingFailed { error: CrmError::CapacityFull },
            },
        )
        .expect("transition");

        assert_eq!(transition.to, ConversationState::CollectingDateTime);
        assert!(!session.slots.contains(SlotName::DateTime));
        assert_eq!(session.slots.text(SlotName::Group), Some("salsa"));
    }

    #[test]
    fn every_state_but_idle_has_a_timeout() {
        assert!(state_timeout(ConversationState::Idle).is_none());
        assert_eq!(
            state_timeout(ConversationState::BookingInProgress),
            Some(Duration::seconds(30))
        );
        assert_eq!(state_timeout(ConversationState::ConfirmBooking), Some(Duration::hours(3)));
        assert_eq!(state_timeout(ConversationState::BookingDone), Some(Duration::seconds(5)));
    }
}
