//! Streaming client for the Anthropic Messages API.
//!
//! Opens one SSE session per provider round-trip, negotiates the declared
//! tool set, and folds the wire protocol (`content_block_start`,
//! `content_block_delta`, `message_delta`, ...) into the unified
//! [`StreamEvent`] model. Tool-call inputs arrive as incremental
//! `input_json_delta` fragments and are accumulated per content block until
//! the block closes.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::config::Settings;
use crate::error::AppError;

use super::{CompletionProvider, CompletionRequest, EventStream, StopReason, StreamEvent};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic Messages API provider.
pub struct AnthropicProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    idle_timeout: Duration,
}

impl AnthropicProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            // No overall request timeout: the stream is long-lived. Idle
            // gaps are bounded separately per chunk.
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: settings.anthropic_api_key.clone(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            idle_timeout: settings.stream_idle_timeout(),
        })
    }

    /// Point the client at a different endpoint (local proxies, test stubs).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_body(&self, request: &CompletionRequest) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": request.system,
            "messages": request.messages,
            "tools": request.tools,
            "stream": true,
        })
    }
}

#[async_trait::async_trait]
impl CompletionProvider for AnthropicProvider {
    async fn stream_turn(&self, request: CompletionRequest) -> Result<EventStream, AppError> {
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.build_body(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!(
                "completion request failed with {status}: {detail}"
            )));
        }

        let chunks = response
            .bytes_stream()
            .map(|r| r.map(|b| b.to_vec()).map_err(AppError::from))
            .boxed();

        let state = SseDecoder::new(chunks, self.idle_timeout);
        Ok(futures_util::stream::try_unfold(state, |mut decoder| async move {
            match decoder.next_event().await? {
                Some(event) => Ok(Some((event, decoder))),
                None => Ok(None),
            }
        })
        .boxed())
    }
}

// =============================================================================
// SSE decoding
// =============================================================================

/// Tool-use block under construction: input JSON arrives fragment by fragment.
struct ToolUseBuilder {
    id: String,
    name: String,
    partial_json: String,
}

/// Decodes the SSE byte stream into [`StreamEvent`]s.
///
/// One decoder per provider round-trip; holds the undelivered-event queue so
/// a single chunk carrying several wire events yields them in order.
struct SseDecoder {
    chunks: BoxStream<'static, Result<Vec<u8>, AppError>>,
    idle_timeout: Duration,
    line_buf: Vec<u8>,
    pending: VecDeque<StreamEvent>,
    tool_blocks: HashMap<u64, ToolUseBuilder>,
    stop_reason: Option<StopReason>,
    done: bool,
}

impl SseDecoder {
    fn new(chunks: BoxStream<'static, Result<Vec<u8>, AppError>>, idle_timeout: Duration) -> Self {
        Self {
            chunks,
            idle_timeout,
            line_buf: Vec::new(),
            pending: VecDeque::new(),
            tool_blocks: HashMap::new(),
            stop_reason: None,
            done: false,
        }
    }

    async fn next_event(&mut self) -> Result<Option<StreamEvent>, AppError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.done {
                return Ok(None);
            }

            let chunk = tokio::time::timeout(self.idle_timeout, self.chunks.next())
                .await
                .map_err(|_| AppError::StreamIdle(self.idle_timeout.as_secs()))?;

            match chunk {
                Some(bytes) => self.feed(&bytes?)?,
                None => {
                    // Connection closed without a message_stop.
                    return Err(AppError::Provider(
                        "completion stream closed unexpectedly".into(),
                    ));
                }
            }
        }
    }

    /// Append raw bytes and process every complete line. Bytes are buffered
    /// undecoded; a multi-byte character split across chunk boundaries stays
    /// intact until its line terminator arrives.
    fn feed(&mut self, bytes: &[u8]) -> Result<(), AppError> {
        self.line_buf.extend_from_slice(bytes);
        while let Some(pos) = self.line_buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.line_buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.handle_line(line.trim_end())?;
        }
        Ok(())
    }

    fn handle_line(&mut self, line: &str) -> Result<(), AppError> {
        // SSE framing: only data lines carry payloads; the wire event name
        // is duplicated in the payload's "type" field, which we dispatch on.
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.trim();
        if data.is_empty() {
            return Ok(());
        }
        let value: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return Ok(()), // tolerate non-JSON keep-alive noise
        };
        self.handle_wire_event(&value)
    }

    fn handle_wire_event(&mut self, value: &Value) -> Result<(), AppError> {
        match value.get("type").and_then(|t| t.as_str()).unwrap_or("") {
            "content_block_start" => {
                let index = value.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                let block = value.get("content_block");
                if block.and_then(|b| b.get("type")).and_then(|t| t.as_str()) == Some("tool_use") {
                    let id = json_str(block, "id");
                    let name = json_str(block, "name");
                    self.tool_blocks.insert(
                        index,
                        ToolUseBuilder {
                            id,
                            name,
                            partial_json: String::new(),
                        },
                    );
                }
            }
            "content_block_delta" => {
                let index = value.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                let delta = value.get("delta");
                match delta.and_then(|d| d.get("type")).and_then(|t| t.as_str()) {
                    Some("text_delta") => {
                        let text = json_str(delta, "text");
                        if !text.is_empty() {
                            self.pending.push_back(StreamEvent::TextDelta(text));
                        }
                    }
                    Some("input_json_delta") => {
                        if let Some(builder) = self.tool_blocks.get_mut(&index) {
                            builder.partial_json.push_str(&json_str(delta, "partial_json"));
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                let index = value.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                if let Some(builder) = self.tool_blocks.remove(&index) {
                    self.pending.push_back(StreamEvent::ToolCallRequest {
                        id: builder.id,
                        name: builder.name,
                        input: finish_tool_input(&builder.partial_json),
                    });
                }
            }
            "message_delta" => {
                if let Some(reason) = value
                    .pointer("/delta/stop_reason")
                    .and_then(|r| r.as_str())
                {
                    self.stop_reason = Some(StopReason::parse(reason));
                }
            }
            "message_stop" => {
                let stop = self
                    .stop_reason
                    .take()
                    .unwrap_or(StopReason::Other("unknown".into()));
                self.pending.push_back(StreamEvent::StreamEnd { stop });
                self.done = true;
            }
            "error" => {
                let message = value
                    .pointer("/error/message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown provider error");
                return Err(AppError::Provider(message.to_string()));
            }
            // ping, message_start, and anything newer are ignored
            _ => {}
        }
        Ok(())
    }
}

fn json_str(value: Option<&Value>, key: &str) -> String {
    value
        .and_then(|v| v.get(key))
        .and_then(|s| s.as_str())
        .unwrap_or("")
        .to_string()
}

/// Accumulated tool input fragments. An empty accumulation means a tool with
/// no arguments; unparseable JSON becomes `null` so the gateway rejects it as
/// malformed input instead of the whole turn aborting.
fn finish_tool_input(partial: &str) -> Value {
    if partial.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(partial).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder_from(transcript: &str) -> SseDecoder {
        let chunk = transcript.as_bytes().to_vec();
        let chunks = futures_util::stream::iter(vec![Ok(chunk)]).boxed();
        SseDecoder::new(chunks, Duration::from_secs(5))
    }

    async fn collect(mut decoder: SseDecoder) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(ev) = decoder.next_event().await.unwrap() {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn test_text_delta_stream() {
        let transcript = "\
data: {\"type\":\"message_start\"}\n\
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\"}}\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" world\"}}\n\
data: {\"type\":\"content_block_stop\",\"index\":0}\n\
data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\n\
data: {\"type\":\"message_stop\"}\n";

        let events = collect(decoder_from(transcript)).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("Hello".into()),
                StreamEvent::TextDelta(" world".into()),
                StreamEvent::StreamEnd {
                    stop: StopReason::EndTurn
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_tool_call_accumulates_input_fragments() {
        let transcript = "\
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"search_nodes\"}}\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"query\\\":\"}}\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"gmail\\\"}\"}}\n\
data: {\"type\":\"content_block_stop\",\"index\":0}\n\
data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"}}\n\
data: {\"type\":\"message_stop\"}\n";

        let events = collect(decoder_from(transcript)).await;
        assert_eq!(events.len(), 2);
        match &events[0] {
            StreamEvent::ToolCallRequest { id, name, input } => {
                assert_eq!(id, "toolu_1");
                assert_eq!(name, "search_nodes");
                assert_eq!(input["query"], "gmail");
            }
            other => panic!("expected ToolCallRequest, got {other:?}"),
        }
        assert_eq!(
            events[1],
            StreamEvent::StreamEnd {
                stop: StopReason::ToolUse
            }
        );
    }

    #[tokio::test]
    async fn test_empty_tool_input_becomes_empty_object() {
        let transcript = "\
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_2\",\"name\":\"list_workflows\"}}\n\
data: {\"type\":\"content_block_stop\",\"index\":0}\n\
data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"}}\n\
data: {\"type\":\"message_stop\"}\n";

        let events = collect(decoder_from(transcript)).await;
        match &events[0] {
            StreamEvent::ToolCallRequest { input, .. } => {
                assert_eq!(input, &json!({}));
            }
            other => panic!("expected ToolCallRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_multibyte_character_split_across_chunks() {
        let line = "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"café\"}}\n";
        let bytes = line.as_bytes();
        // split between the two bytes of 'é' (0xC3 0xA9)
        let split = bytes.iter().position(|&b| b == 0xA9).unwrap();
        let chunks = futures_util::stream::iter(vec![
            Ok(bytes[..split].to_vec()),
            Ok(bytes[split..].to_vec()),
        ])
        .boxed();

        let mut decoder = SseDecoder::new(chunks, Duration::from_secs(5));
        assert_eq!(
            decoder.next_event().await.unwrap(),
            Some(StreamEvent::TextDelta("café".into()))
        );
    }

    #[tokio::test]
    async fn test_error_event_is_fatal() {
        let transcript =
            "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n";
        let mut decoder = decoder_from(transcript);
        let err = decoder.next_event().await.unwrap_err();
        assert!(matches!(err, AppError::Provider(msg) if msg.contains("Overloaded")));
    }

    #[tokio::test]
    async fn test_truncated_stream_is_an_error() {
        let transcript = "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n";
        let mut decoder = decoder_from(transcript);
        assert_eq!(
            decoder.next_event().await.unwrap(),
            Some(StreamEvent::TextDelta("Hi".into()))
        );
        assert!(decoder.next_event().await.is_err());
    }

    #[test]
    fn test_finish_tool_input_malformed_becomes_null() {
        assert_eq!(finish_tool_input("{\"a\":"), Value::Null);
        assert_eq!(finish_tool_input("  "), json!({}));
    }
}
