//! Conversation runtime: classification, turn orchestration, and execution
//! of the state machine's effects against the real collaborators.

pub mod conversation;
pub mod extract;
pub mod intent;
pub mod llm;

pub use conversation::{
    ConversationRuntime, HealthState, RuntimeServices, RuntimeSettings,
};
pub use extract::{parse_model_turn, resolve_turn, ModelTurn};
pub use intent::KeywordClassifier;
pub use llm::{ModelClient, ModelError};
