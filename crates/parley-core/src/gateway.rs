use async_trait::async_trait;

use crate::errors::GatewayError;
use crate::turn::Turn;

/// A hosted generative-text model.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    /// Generate a reply given the full ordered conversation.
    ///
    /// Implementations call [`validate_conversation`] before any network I/O.
    async fn generate(&self, conversation: &[Turn]) -> Result<String, GatewayError>;

    /// One-shot generation from a bare prompt with no history.
    async fn generate_from_single(&self, prompt: &str) -> Result<String, GatewayError> {
        self.generate(&[Turn::user(prompt)]).await
    }
}

/// Check the structural invariant of a conversation before it is sent.
pub fn validate_conversation(conversation: &[Turn]) -> Result<(), GatewayError> {
    if conversation.is_empty() {
        return Err(GatewayError::InvalidHistory("conversation is empty".into()));
    }
    if let Some(idx) = conversation.iter().position(|t| t.text().is_empty()) {
        return Err(GatewayError::InvalidHistory(format!(
            "turn {idx} ({}) has no text",
            conversation[idx].role()
        )));
    }
    Ok(())
}
