//! Language-model boundary. The runtime treats the model as an unreliable
//! classifier: every completion goes through output recovery and the policy
//! rules before anything it said can influence the conversation.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model unavailable: {detail}")]
    Unavailable { detail: String },
    #[error("model request hit its deadline")]
    Deadline,
    #[error("model returned an empty completion")]
    EmptyCompletion,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}
