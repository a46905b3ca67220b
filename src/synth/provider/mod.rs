//! Completion provider boundary.
//!
//! A provider opens one token-streaming session per request and yields an
//! ordered sequence of [`StreamEvent`]s. Tool results are injected by issuing
//! a follow-up request whose message history carries the `tool_result` block;
//! the orchestrator owns that loop, the provider only streams.

pub mod anthropic;

use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::error::AppError;
use crate::synth::tools::ToolSpec;

pub use anthropic::AnthropicProvider;

// =============================================================================
// Stream events
// =============================================================================

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The model finished its reply.
    EndTurn,
    /// The model paused to have a tool executed.
    ToolUse,
    /// Token budget exhausted; the reply is truncated.
    MaxTokens,
    Other(String),
}

impl StopReason {
    pub fn parse(s: &str) -> Self {
        match s {
            "end_turn" => StopReason::EndTurn,
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            other => StopReason::Other(other.to_string()),
        }
    }
}

/// One event on the completion stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental assistant text.
    TextDelta(String),
    /// The model requests a tool invocation. The turn cannot continue until
    /// exactly one result for `id` is fed back.
    ToolCallRequest {
        id: String,
        name: String,
        input: Value,
    },
    /// The stream finished cleanly.
    StreamEnd { stop: StopReason },
}

/// Ordered event stream for one provider round-trip. Errors are fatal to the
/// turn (provider outage, auth failure, idle timeout).
pub type EventStream = BoxStream<'static, Result<StreamEvent, AppError>>;

// =============================================================================
// Provider-format messages
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// A content block in the provider's message format.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

/// One message in the provider-format history.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Tool results travel as a user-role message per the provider protocol.
    pub fn tool_result(tool_use_id: impl Into<String>, content: String, is_error: bool) -> Self {
        Self {
            role: ChatRole::User,
            content: vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content,
                is_error,
            }],
        }
    }
}

/// One streaming request: full ordered history, declared tool set, and the
/// platform-context system string.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

// =============================================================================
// Provider trait
// =============================================================================

/// Abstraction over token-streaming LLM backends.
#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Open a streaming session for one provider round-trip.
    async fn stream_turn(&self, request: CompletionRequest) -> Result<EventStream, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_parse() {
        assert_eq!(StopReason::parse("end_turn"), StopReason::EndTurn);
        assert_eq!(StopReason::parse("tool_use"), StopReason::ToolUse);
        assert_eq!(StopReason::parse("max_tokens"), StopReason::MaxTokens);
        assert_eq!(
            StopReason::parse("refusal"),
            StopReason::Other("refusal".into())
        );
    }

    #[test]
    fn test_tool_result_serializes_as_user_block() {
        let msg = ChatMessage::tool_result("toolu_1", "{\"ok\":true}".into(), false);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "tool_result");
        assert_eq!(json["content"][0]["tool_use_id"], "toolu_1");
        // is_error omitted when false
        assert!(json["content"][0].get("is_error").is_none());
    }

    #[test]
    fn test_error_tool_result_flagged() {
        let msg = ChatMessage::tool_result("toolu_2", "{\"error\":\"timeout\"}".into(), true);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"][0]["is_error"], true);
    }
}
