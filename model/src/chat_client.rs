use std::collections::VecDeque;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use futures::stream::{Stream, StreamExt};
use log::debug;

use protocol::{
    ChatChoice, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
};

pub const INTERNAL_PREFIX: &str = "INTERNAL-";

/// Client for a remote chat-completion endpoint. Whole responses and
/// incrementally streamed responses are both reduced to the same types, so
/// callers never care which mode the server picked.
pub struct ChatCompletionClient {
    http: reqwest::Client,
    api_url: String,
    model_name: String,
    token: Option<String>,
    status_prefix: String,
}

impl ChatCompletionClient {
    pub fn new(
        api_base_url: impl AsRef<str>,
        model_name: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        let api_url = format!(
            "{}/v1/chat/completions",
            api_base_url.as_ref().trim_end_matches('/')
        );

        Self {
            http: reqwest::Client::new(),
            api_url,
            model_name: model_name.into(),
            token,
            status_prefix: INTERNAL_PREFIX.to_string(),
        }
    }

    /// Appends a tag to the status prefix so downstream consumers can tell
    /// which subsystem emitted a status chunk.
    pub fn with_status_tag(mut self, tag: &str) -> Self {
        self.status_prefix.push_str(tag);
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub async fn complete(
        &self,
        mut request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse> {
        request.model = self.model_name.clone();
        debug!("Sending request to {}", self.api_url);

        if request.stream {
            let response = self.send(&request).await?;
            let chunks: Vec<ChatCompletionChunk> = chunk_stream(response)
                .filter_map(|chunk| async { chunk.ok() })
                .collect()
                .await;

            return merge_chunks(&self.model_name, chunks)
                .ok_or_else(|| anyhow!("Stream ended before any chunk arrived"));
        }

        let response = self.send(&request).await?;
        let completion = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        Ok(completion)
    }

    /// Streams the response chunk by chunk. Lines that are not valid chunk
    /// payloads are skipped; the stream ends at the `[DONE]` sentinel.
    pub async fn stream(
        &self,
        mut request: ChatCompletionRequest,
    ) -> Result<impl Stream<Item = Result<ChatCompletionChunk>>> {
        request.model = self.model_name.clone();
        request.stream = true;
        debug!("Sending streaming request to {}", self.api_url);

        let response = self.send(&request).await?;
        Ok(chunk_stream(response))
    }

    async fn send(&self, request: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let mut builder = self.http.post(&self.api_url).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.api_url))?
            .error_for_status()
            .context("Chat completion request was rejected")?;

        Ok(response)
    }

    /// Frames internal status text as a streaming chunk. Everything except
    /// the final answer carries the status prefix so consumers can separate
    /// progress chatter from the answer itself.
    pub fn status_chunk(
        &self,
        content: &str,
        request_id: &str,
        created: i64,
        finish_reason: Option<&str>,
    ) -> ChatCompletionChunk {
        let content = if finish_reason == Some("stop") {
            content.to_string()
        } else {
            format!("{}{}", self.status_prefix, content)
        };

        ChatCompletionChunk::new(
            request_id,
            created,
            format!("pulsar-boosted-{}", self.model_name),
            content,
            finish_reason,
        )
    }
}

pub fn created_now() -> i64 {
    Utc::now().timestamp()
}

fn chunk_stream(response: reqwest::Response) -> impl Stream<Item = Result<ChatCompletionChunk>> {
    let state = (
        Box::pin(response.bytes_stream()),
        SseFramer::new(),
        VecDeque::new(),
    );

    futures::stream::unfold(state, |(mut bytes, mut framer, mut pending)| async move {
        loop {
            while let Some(event) = pending.pop_front() {
                match event {
                    SseEvent::Done => return None,
                    SseEvent::Data(payload) => {
                        match serde_json::from_str::<ChatCompletionChunk>(&payload) {
                            Ok(chunk) => return Some((Ok(chunk), (bytes, framer, pending))),
                            // Partial or foreign payloads are not fatal.
                            Err(err) => debug!("Skipping unparsable stream line: {}", err),
                        }
                    }
                }
            }

            match bytes.next().await {
                Some(Ok(block)) => pending.extend(framer.push(&block)),
                Some(Err(err)) => {
                    return Some((
                        Err(anyhow!(err).context("Chat completion stream failed")),
                        (bytes, framer, pending),
                    ))
                }
                None => return None,
            }
        }
    })
}

/// Folds a chunk sequence back into a whole response.
fn merge_chunks(
    model_name: &str,
    chunks: Vec<ChatCompletionChunk>,
) -> Option<ChatCompletionResponse> {
    let first = chunks.first()?;
    let id = first.id.clone();
    let created = first.created;

    let mut content = String::new();
    let mut finish_reason = None;
    for chunk in &chunks {
        if let Some(delta) = chunk.content() {
            content.push_str(delta);
        }
        if chunk.finish_reason().is_some() {
            finish_reason = chunk.finish_reason().map(str::to_string);
        }
    }

    Some(ChatCompletionResponse {
        id,
        object: "chat.completion".to_string(),
        created,
        model: model_name.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage::assistant(content),
            finish_reason,
        }],
    })
}

#[derive(Debug)]
enum SseEvent {
    Data(String),
    Done,
}

/// Incremental `data:`-line framer. Byte blocks may split lines anywhere, so
/// the unfinished tail is buffered until the next block arrives.
#[derive(Debug, Default)]
struct SseFramer {
    buffer: String,
}

impl SseFramer {
    fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, block: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(block));

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end();

            if line == "data: [DONE]" {
                events.push(SseEvent::Done);
            } else if let Some(payload) = line.strip_prefix("data: ") {
                events.push(SseEvent::Data(payload.to_string()));
            }
        }

        events
    }
}
