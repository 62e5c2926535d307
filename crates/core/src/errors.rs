use thiserror::Error;

use crate::domain::session::ConversationState;
use crate::domain::slot::SlotName;

/// External collaborators whose failures feed the degradation controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dependency {
    Crm,
    Model,
    Channel,
}

impl Dependency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crm => "crm",
            Self::Model => "model",
            Self::Channel => "channel",
        }
    }
}

/// Why a slot value was rejected by its validator.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SlotRejection {
    #[error("phone number could not be parsed")]
    UnparsablePhone,
    #[error("date/time could not be recognized")]
    UnparsableDateTime,
    #[error("date is in the past")]
    PastDate,
    #[error("value is empty")]
    Empty,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid conversation transition from {from:?} on {event}")]
    InvalidTransition { from: ConversationState, event: &'static str },
    #[error("slot {slot:?} failed validation: {reason}")]
    SlotValidation { slot: SlotName, reason: SlotRejection },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Application-layer failures. Local components absorb and classify these;
/// only a response decision crosses a component boundary, and the user is
/// never shown a raw error string.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{dependency:?} unavailable: {detail}")]
    ExternalUnavailable { dependency: Dependency, detail: String },
    #[error("duplicate operation for fingerprint {fingerprint}")]
    DuplicateOperation { fingerprint: String },
    #[error("budget exceeded on {metric}")]
    BudgetExceeded { metric: &'static str },
    #[error("session {session} is busy with another processing unit")]
    SessionBusy { session: String },
    #[error("model output could not be parsed after all recovery steps")]
    MalformedModelOutput,
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    /// Whether this failure should feed the degradation controller.
    pub fn unhealthy_dependency(&self) -> Option<Dependency> {
        match self {
            Self::ExternalUnavailable { dependency, .. } => Some(*dependency),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::slot::SlotName;

    use super::{ApplicationError, Dependency, DomainError, SlotRejection};

    #[test]
    fn external_unavailable_exposes_its_dependency() {
        let error = ApplicationError::ExternalUnavailable {
            dependency: Dependency::Crm,
            detail: "request deadline".to_owned(),
        };
        assert_eq!(error.unhealthy_dependency(), Some(Dependency::Crm));

        let domain = ApplicationError::from(DomainError::SlotValidation {
            slot: SlotName::ClientPhone,
            reason: SlotRejection::UnparsablePhone,
        });
        assert_eq!(domain.unhealthy_dependency(), None);
    }

    #[test]
    fn duplicate_operation_is_distinct_from_external_failure() {
        let error = ApplicationError::DuplicateOperation { fingerprint: "abc".to_owned() };
        assert!(error.to_string().contains("abc"));
        assert_eq!(error.unhealthy_dependency(), None);
    }
}
