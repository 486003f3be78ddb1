use anyhow::Result;
use async_trait::async_trait;

use protocol::ChatMessage;

/// What the search needs from an inference backend: propose next steps,
/// apply one, and judge the results. Implementations decide how those
/// questions are asked; the search only sees text and scores.
#[async_trait]
pub trait ReasoningModel: Send + Sync {
    /// Up to five candidate next actions for the given reasoning state.
    async fn dynamic_actions(&self, context: &[ChatMessage], state: &str) -> Vec<String>;

    /// The state reached by performing `action` on `state`.
    async fn apply_action(
        &self,
        context: &[ChatMessage],
        state: &str,
        action: &str,
    ) -> Result<String>;

    /// Quality of a state in [0, 1].
    async fn evaluate_state(&self, context: &[ChatMessage], state: &str) -> f32;

    /// Per-action potential scores in [0, 1].
    async fn evaluate_actions(
        &self,
        context: &[ChatMessage],
        state: &str,
        actions: &[String],
    ) -> Vec<f32>;

    /// A compressed rendition of an oversized state.
    async fn summarize(&self, context: &[ChatMessage], state: &str) -> String;

    /// Plain completion of an arbitrary message list.
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String>;
}
