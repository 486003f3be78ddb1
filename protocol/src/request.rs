use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::ChatMessage;

/// Wire request for a `/v1/chat/completions` endpoint. Optional fields are
/// left off the wire when unset so the serving side applies its own defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guided_json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guided_decoding_backend: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ChatCompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Self::default()
        }
    }

    /// Constrains the reply to the given JSON schema.
    pub fn with_guided_json(mut self, schema: Value) -> Self {
        self.guided_json = Some(schema);
        self.guided_decoding_backend = Some("outlines".to_string());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// The inbound request this service accepts: a standard chat completion
/// extended with the fields that drive the boosted search. Unknown fields
/// are tolerated, as clients send a superset.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BoostRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pulsar_boost: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_rollouts: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
}

impl BoostRequest {
    pub fn boost_requested(&self) -> bool {
        self.pulsar_boost.unwrap_or(false)
    }

    /// The last message is the question to solve; everything before it is
    /// shared context.
    pub fn question(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn context(&self) -> &[ChatMessage] {
        let len = self.messages.len();
        &self.messages[..len.saturating_sub(1)]
    }

    /// Strips the extension fields, leaving a request the serving endpoint
    /// understands.
    pub fn to_standard_request(&self, model: impl Into<String>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: model.into(),
            messages: self.messages.clone(),
            stream: false,
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            stop: self.stop.clone(),
            guided_json: None,
            guided_decoding_backend: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_fields_stay_off_the_wire() {
        let request = ChatCompletionRequest::new("pulsar", vec![ChatMessage::user("hi")]);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "pulsar");
        assert!(json.get("stream").is_none());
        assert!(json.get("temperature").is_none());
        assert!(json.get("guided_json").is_none());
    }

    #[test]
    fn test_guided_json_sets_backend() {
        let schema = serde_json::json!({"type": "object"});
        let request = ChatCompletionRequest::new("pulsar", Vec::new()).with_guided_json(schema);

        assert_eq!(request.guided_decoding_backend.as_deref(), Some("outlines"));
    }

    #[test]
    fn test_boost_request_splits_question_from_context() {
        let request = BoostRequest {
            messages: vec![
                ChatMessage::system("be terse"),
                ChatMessage::user("what is 6*7?"),
            ],
            pulsar_boost: Some(true),
            ..BoostRequest::default()
        };

        assert!(request.boost_requested());
        assert_eq!(request.question().unwrap().content, "what is 6*7?");
        assert_eq!(request.context().len(), 1);
        assert_eq!(request.context()[0].role, "system");
    }

    #[test]
    fn test_to_standard_request_drops_extension_fields() {
        let request = BoostRequest {
            messages: vec![ChatMessage::user("q")],
            temperature: Some(0.7),
            num_rollouts: Some(5),
            max_depth: Some(3),
            pulsar_boost: Some(true),
            ..BoostRequest::default()
        };

        let standard = request.to_standard_request("pulsar");
        let json = serde_json::to_value(&standard).unwrap();

        assert_eq!(json["temperature"], 0.7);
        assert!(json.get("num_rollouts").is_none());
        assert!(json.get("pulsar_boost").is_none());
        assert!(json.get("max_depth").is_none());
    }
}
