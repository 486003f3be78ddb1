use serde::{Deserialize, Serialize};

use crate::message::ChatMessage;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: usize,
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl ChatCompletionResponse {
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|choice| choice.message.content.as_str())
    }
}

/// One streamed chat-completion chunk, as framed over SSE.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: usize,
    pub delta: DeltaMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeltaMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    pub fn new(
        id: impl Into<String>,
        created: i64,
        model: impl Into<String>,
        content: impl Into<String>,
        finish_reason: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: DeltaMessage {
                    role: None,
                    content: Some(content.into()),
                },
                finish_reason: finish_reason.map(str::to_string),
            }],
        }
    }

    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.finish_reason.as_deref())
    }

    pub fn is_terminal(&self) -> bool {
        self.finish_reason().is_some()
    }

    pub fn to_sse(&self) -> String {
        format!(
            "data: {}\n\n",
            serde_json::to_string(self).expect("chunk serialization cannot fail")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_sse_frame() {
        let chunk = ChatCompletionChunk::new("chat-1", 1700000000, "pulsar", "hello", None);
        let frame = chunk.to_sse();

        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));

        let parsed: ChatCompletionChunk = serde_json::from_str(
            frame.trim_start_matches("data: ").trim_end(),
        )
        .unwrap();
        assert_eq!(parsed.content(), Some("hello"));
        assert_eq!(parsed.object, "chat.completion.chunk");
        assert!(!parsed.is_terminal());
    }

    #[test]
    fn test_terminal_chunk_carries_finish_reason() {
        let chunk = ChatCompletionChunk::new("chat-1", 0, "pulsar", "done", Some("stop"));

        assert!(chunk.is_terminal());
        assert_eq!(chunk.finish_reason(), Some("stop"));
    }

    #[test]
    fn test_parses_serving_style_chunk() {
        let json = r#"{
            "id": "chat-abc",
            "object": "chat.completion.chunk",
            "created": 1700000000,
            "model": "pulsar-boosted-llama",
            "choices": [{"index": 0, "delta": {"role": "assistant", "content": "4"}, "finish_reason": null}]
        }"#;

        let chunk: ChatCompletionChunk = serde_json::from_str(json).unwrap();
        assert_eq!(chunk.content(), Some("4"));
        assert_eq!(chunk.finish_reason(), None);
    }
}
