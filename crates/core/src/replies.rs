//! Canned user-facing replies. Every failure path resolves to one of these;
//! raw error strings never reach a client.

use chrono::{DateTime, FixedOffset, Offset, Utc};

use crate::collab::CrmError;
use crate::domain::booking::BookingRequest;
use crate::domain::crm::ScheduleEntry;
use crate::domain::session::ConversationState;
use crate::domain::slot::SlotName;

/// A reply decision produced by the engine. Rendering to text happens in
/// the composer so the engine stays free of formatting concerns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyKind {
    Greeting,
    PromptSlot(SlotName),
    BookingSummary(BookingRequest),
    ConfirmNudge,
    ConfirmExpired,
    ConfirmDeclined,
    BookingReceipt(BookingRequest),
    AlreadyBooked,
    AdminWillConfirm,
    CancelConfirmed,
    NoBookingsToCancel,
    HandoffAck,
    HandoffClosed,
    AdminRelay(String),
    OfferResume(ConversationState),
    KnowledgeAnswer(String),
    KnowledgeMiss,
    ScheduleList(Vec<ScheduleEntry>),
    ScheduleEmpty,
    LatenessAck,
    SlotRejected(SlotName),
    Misunderstood,
    TechnicalIssue,
    SessionExpired,
    CrmTrouble(CrmError),
}

#[derive(Clone, Debug)]
pub struct ReplyComposer {
    offset: FixedOffset,
}

impl ReplyComposer {
    pub fn new(utc_offset_minutes: i32) -> Self {
        let offset = match FixedOffset::east_opt(utc_offset_minutes * 60) {
            Some(offset) => offset,
            None => Utc.fix(),
        };
        Self { offset }
    }

    pub fn render(&self, kind: &ReplyKind) -> String {
        match kind {
            ReplyKind::Greeting => {
                "Hi! I can help you book a class, check the schedule, or answer questions \
                 about the studio. What would you like to do?"
                    .to_string()
            }
            ReplyKind::PromptSlot(slot) => {
                format!("Got it. Could you tell me {}?", slot.prompt_label())
            }
            ReplyKind::BookingSummary(request) => format!(
                "Please confirm your booking:\n\nClass: {}\nWhen: {}\nName: {}\nPhone: {}\n\n\
                 Reply \"yes\" to book or \"no\" to change something.",
                request.group,
                self.format_local(request.starts_at),
                request.client_name,
                request.client_phone,
            ),
            ReplyKind::ConfirmNudge => {
                "Just checking in — your booking is waiting for confirmation. \
                 Reply \"yes\" to book it or \"no\" to cancel."
                    .to_string()
            }
            ReplyKind::ConfirmExpired => {
                "The booking confirmation expired, so I've cleared it. \
                 Message me again any time to start over."
                    .to_string()
            }
            ReplyKind::ConfirmDeclined => {
                "No problem, nothing was booked. What would you like to change?".to_string()
            }
            ReplyKind::BookingReceipt(request) => format!(
                "You're booked! {} on {}. See you there, {}!",
                request.group,
                self.format_local(request.starts_at),
                request.client_name,
            ),
            ReplyKind::AlreadyBooked => {
                "You already have a booking for this class — no need to book twice!".to_string()
            }
            ReplyKind::AdminWillConfirm => {
                "I've passed your booking request to our administrator, who will confirm it \
                 with you shortly. Nothing is lost!"
                    .to_string()
            }
            ReplyKind::CancelConfirmed => {
                "Your booking has been cancelled. Hope to see you another time!".to_string()
            }
            ReplyKind::NoBookingsToCancel => {
                "I couldn't find an upcoming booking under your number.".to_string()
            }
            ReplyKind::HandoffAck => {
                "I've forwarded your message to our administrator, who will reply here soon."
                    .to_string()
            }
            ReplyKind::HandoffClosed => {
                "The administrator has closed this conversation. I'm back — how can I help?"
                    .to_string()
            }
            ReplyKind::AdminRelay(text) => format!("Administrator: {text}"),
            ReplyKind::OfferResume(state) => format!(
                "Shall we continue where we left off ({})?",
                describe_flow(*state)
            ),
            ReplyKind::KnowledgeAnswer(answer) => answer.clone(),
            ReplyKind::KnowledgeMiss => {
                "I don't have that information to hand — our administrator can help with it."
                    .to_string()
            }
            ReplyKind::ScheduleList(entries) => {
                let mut lines = vec!["Here's what's coming up:".to_string()];
                for entry in entries {
                    let teacher = entry
                        .teacher
                        .as_deref()
                        .map(|name| format!(" with {name}"))
                        .unwrap_or_default();
                    lines.push(format!(
                        "• {}{teacher} ({} min)",
                        self.format_local(entry.starts_at),
                        entry.duration_minutes,
                    ));
                }
                lines.join("\n")
            }
            ReplyKind::ScheduleEmpty => {
                "There are no classes scheduled for that period.".to_string()
            }
            ReplyKind::LatenessAck => {
                "Thanks for letting us know — I'll pass it on. The class will wait for you!"
                    .to_string()
            }
            ReplyKind::SlotRejected(slot) => match slot {
                SlotName::ClientPhone => {
                    "That phone number doesn't look right — could you send it again, \
                     for example +7 999 000 11 22?"
                        .to_string()
                }
                SlotName::DateTime => {
                    "I couldn't work out that date — could you try something like \
                     \"tomorrow 19:00\" or \"15.03 18:30\"? Past dates won't work."
                        .to_string()
                }
                other => format!("I didn't catch {} — could you repeat it?", other.prompt_label()),
            },
            ReplyKind::Misunderstood => {
                "Sorry, I didn't quite understand. Could you rephrase that?".to_string()
            }
            ReplyKind::TechnicalIssue => {
                "We're having a technical issue right now. Our administrator has been \
                 notified and will follow up with you."
                    .to_string()
            }
            ReplyKind::SessionExpired => {
                "It's been a while, so I've reset our conversation. \
                 Message me any time to start again!"
                    .to_string()
            }
            ReplyKind::CrmTrouble(error) => match error {
                CrmError::NoAvailability => {
                    "That slot isn't available, I'm afraid. Want to see the schedule \
                     for other options?"
                        .to_string()
                }
                CrmError::AlreadyBooked => self.render(&ReplyKind::AlreadyBooked),
                CrmError::NotFound => {
                    "I couldn't find that class in the schedule. Want me to show \
                     what's available?"
                        .to_string()
                }
                CrmError::InPast => {
                    "That class has already started. Shall we pick a later one?".to_string()
                }
                CrmError::CapacityFull => {
                    "That class is full, sorry! Want to try another time slot?".to_string()
                }
                CrmError::Transient { .. } => self.render(&ReplyKind::AdminWillConfirm),
            },
        }
    }

    fn format_local(&self, when: DateTime<Utc>) -> String {
        when.with_timezone(&self.offset).format("%A %d.%m at %H:%M").to_string()
    }
}

fn describe_flow(state: ConversationState) -> &'static str {
    match state {
        ConversationState::BrowsingSchedule => "looking at the schedule",
        ConversationState::CancelFlow => "cancelling your booking",
        ConversationState::ConfirmBooking => "confirming your booking",
        ConversationState::SerialBooking => "booking another class",
        _ => "your booking",
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::collab::CrmError;
    use crate::domain::booking::BookingRequest;
    use crate::domain::slot::SlotName;

    use super::{ReplyComposer, ReplyKind};

    fn request() -> BookingRequest {
        BookingRequest {
            group: "Salsa beginners".into(),
            starts_at: Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap(),
            client_name: "Anna".into(),
            client_phone: "+79990001122".into(),
            schedule_id: None,
            correlation_id: "corr-1".into(),
        }
    }

    #[test]
    fn summary_renders_in_studio_local_time() {
        let composer = ReplyComposer::new(600);
        let text = composer.render(&ReplyKind::BookingSummary(request()));
        // 09:00 UTC is 19:00 at +10.
        assert!(text.contains("19:00"), "{text}");
        assert!(text.contains("Salsa beginners"));
        assert!(text.contains("+79990001122"));
    }

    #[test]
    fn transient_crm_error_resolves_to_admin_confirmation() {
        let composer = ReplyComposer::new(600);
        let transient = composer
            .render(&ReplyKind::CrmTrouble(CrmError::Transient { detail: "timeout".into() }));
        let admin = composer.render(&ReplyKind::AdminWillConfirm);
        assert_eq!(transient, admin);
        assert!(!transient.contains("timeout"));
    }

    #[test]
    fn slot_rejection_messages_are_slot_specific() {
        let composer = ReplyComposer::new(600);
        let phone = composer.render(&ReplyKind::SlotRejected(SlotName::ClientPhone));
        assert!(phone.contains("phone"));
        let datetime = composer.render(&ReplyKind::SlotRejected(SlotName::DateTime));
        assert!(datetime.contains("date"));
    }
}
