pub mod budget;
pub mod collab;
pub mod config;
pub mod degradation;
pub mod domain;
pub mod errors;
pub mod fsm;
pub mod idempotency;
pub mod knowledge;
pub mod policy;
pub mod replies;
pub mod slots;
pub mod temporal;

pub use budget::{BudgetGuard, Metric, Verdict};
pub use collab::{CrmClient, CrmError, KnowledgeSource, OutboundEnqueuer};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
pub use degradation::{DegradationController, HealthInputs, Level};
pub use domain::booking::BookingRequest;
pub use domain::message::{Channel, InboundMessage, OutboundMessage, Priority};
pub use domain::session::{ConversationState, Session, SessionKey};
pub use domain::slot::{SlotMap, SlotName, SlotPatch};
pub use errors::{ApplicationError, DomainError};
pub use fsm::{Effect, EngineContext, FsmEvent, Intent, TimerKind, Transition};
pub use idempotency::{AcquireOutcome, Fingerprint, HolderToken, IdempotencyStore};
pub use knowledge::KnowledgeBase;
pub use replies::{ReplyComposer, ReplyKind};
pub use slots::SlotManager;
pub use temporal::TemporalParser;
