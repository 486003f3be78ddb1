use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, error};
use serde::Deserialize;
use serde_json::json;

use protocol::{ChatCompletionRequest, ChatMessage};

use crate::chat_client::ChatCompletionClient;
use crate::reasoning::ReasoningModel;

const SUMMARY_MAX_CHARS: usize = 450;
const MAX_ACTIONS: usize = 5;

/// Actions offered when the model cannot produce its own suggestions.
const FALLBACK_ACTIONS: [&str; 5] = ["Elaborate", "Summarize", "Question", "Answer", "Critique"];

/// `ReasoningModel` backed by schema-constrained chat-completion calls.
///
/// Each primitive issues exactly one non-streaming call. A failed call never
/// aborts the surrounding search: apart from `apply_action` and `complete`,
/// every primitive recovers locally with a safe default.
pub struct ChatModel {
    client: ChatCompletionClient,
    template: ChatCompletionRequest,
}

#[derive(Deserialize)]
struct SummaryReply {
    summary: String,
}

#[derive(Deserialize)]
struct ScoreReply {
    score: f32,
}

#[derive(Deserialize)]
struct ActionsReply {
    actions: Vec<String>,
}

#[derive(Deserialize)]
struct EvaluationsReply {
    evaluations: Vec<f32>,
}

impl ChatModel {
    /// `template` carries the caller's sampling parameters; they are reused
    /// on every internal call.
    pub fn new(client: ChatCompletionClient, template: ChatCompletionRequest) -> Self {
        Self { client, template }
    }

    fn request(&self, context: &[ChatMessage], prompt: String) -> ChatCompletionRequest {
        let mut request = self.template.clone();
        request.messages = context.to_vec();
        request.messages.push(ChatMessage::user(prompt));
        request.stream = false;
        request.max_tokens = None;
        request
    }

    async fn call(&self, request: ChatCompletionRequest) -> Result<String> {
        let response = self.client.complete(request).await?;
        response
            .content()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Completion response carried no choices"))
    }

    async fn try_summarize(&self, context: &[ChatMessage], state: &str) -> Result<String> {
        let prompt = format!(
            "Briefly summarize this state. No matter what it should not exceed \
             400 characters:\n\n{}\n\nSummary:",
            state
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string", "maxLength": 400}
            },
            "required": ["summary"]
        });

        let content = self
            .call(self.request(context, prompt).with_guided_json(schema))
            .await?;
        let reply: SummaryReply =
            serde_json::from_str(&content).context("Malformed summary reply")?;

        Ok(truncate_chars(&reply.summary, SUMMARY_MAX_CHARS))
    }

    async fn try_evaluate_state(&self, context: &[ChatMessage], state: &str) -> Result<f32> {
        let prompt = format!(
            "Evaluate the following state in terms of coherence, detail, and correctness. \
             Provide a score between 0 and 1:\n\n{}\n\nScore:",
            state
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "score": {"type": "number", "minimum": 0, "maximum": 1}
            },
            "required": ["score"]
        });

        let content = self
            .call(
                self.request(context, prompt)
                    .with_guided_json(schema)
                    .with_max_tokens(100),
            )
            .await?;
        let reply: ScoreReply = serde_json::from_str(&content).context("Malformed score reply")?;

        Ok(reply.score.clamp(0.0, 1.0))
    }

    async fn try_dynamic_actions(
        &self,
        context: &[ChatMessage],
        state: &str,
    ) -> Result<Vec<String>> {
        let prompt = format!(
            "Given the current state:\n{}\n\nSuggest 5 possible actions to progress the \
             reasoning. Format the response as a JSON list of strings.",
            state
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "actions": {
                    "type": "array",
                    "items": {"type": "string"},
                    "minItems": 1,
                    "maxItems": 5
                }
            },
            "required": ["actions"]
        });

        let content = self
            .call(self.request(context, prompt).with_guided_json(schema))
            .await?;
        let mut reply: ActionsReply =
            serde_json::from_str(&content).context("Malformed actions reply")?;
        reply.actions.truncate(MAX_ACTIONS);

        Ok(reply.actions)
    }

    async fn try_evaluate_actions(
        &self,
        context: &[ChatMessage],
        state: &str,
        actions: &[String],
    ) -> Result<Vec<f32>> {
        let prompt = format!(
            "Given the current state:\n{}\n\nEvaluate the potential of each action on a \
             scale of 0 to 1:\n{}\n\nProvide the evaluations as a JSON list of floats.",
            state,
            serde_json::to_string(actions)?
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "evaluations": {
                    "type": "array",
                    "items": {"type": "number", "minimum": 0, "maximum": 1},
                    "minItems": 1,
                    "maxItems": 5
                }
            },
            "required": ["evaluations"]
        });

        let content = self
            .call(
                self.request(context, prompt)
                    .with_guided_json(schema)
                    .with_max_tokens(100),
            )
            .await?;
        let reply: EvaluationsReply =
            serde_json::from_str(&content).context("Malformed evaluations reply")?;

        Ok(reply
            .evaluations
            .into_iter()
            .map(|value| value.clamp(0.0, 1.0))
            .collect())
    }
}

#[async_trait]
impl ReasoningModel for ChatModel {
    async fn dynamic_actions(&self, context: &[ChatMessage], state: &str) -> Vec<String> {
        match self.try_dynamic_actions(context, state).await {
            Ok(actions) => actions,
            Err(err) => {
                error!("Error getting dynamic actions: {}", err);
                FALLBACK_ACTIONS.iter().map(|s| s.to_string()).collect()
            }
        }
    }

    async fn apply_action(
        &self,
        context: &[ChatMessage],
        state: &str,
        action: &str,
    ) -> Result<String> {
        debug!("Applying action {}", action);
        let prompt = format!(
            "Given the current reasoning state:\n'{}'\n\nPerform the following action: {}",
            state, action
        );

        let new_state = self
            .call(self.request(context, prompt))
            .await
            .with_context(|| format!("Failed to apply action {}", action))?;
        debug!("New state after action {}: {:.100}", action, new_state);

        Ok(new_state)
    }

    async fn evaluate_state(&self, context: &[ChatMessage], state: &str) -> f32 {
        match self.try_evaluate_state(context, state).await {
            Ok(score) => score,
            Err(err) => {
                error!("Error evaluating state: {}", err);
                0.5
            }
        }
    }

    async fn evaluate_actions(
        &self,
        context: &[ChatMessage],
        state: &str,
        actions: &[String],
    ) -> Vec<f32> {
        match self.try_evaluate_actions(context, state, actions).await {
            Ok(evaluations) => evaluations,
            Err(err) => {
                error!("Error evaluating actions: {}", err);
                vec![0.5; actions.len()]
            }
        }
    }

    async fn summarize(&self, context: &[ChatMessage], state: &str) -> String {
        match self.try_summarize(context, state).await {
            Ok(summary) => summary,
            Err(err) => {
                error!("Error {} during summarization", err);
                truncate_chars(state, SUMMARY_MAX_CHARS)
            }
        }
    }

    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let mut request = self.template.clone();
        request.messages = messages;
        request.stream = false;
        request.max_tokens = None;

        self.call(request).await
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
