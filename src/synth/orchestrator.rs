//! Turn orchestration.
//!
//! A turn starts when user text arrives and ends when the model finishes a
//! reply without requesting a tool, the turn is cancelled, or a fatal error
//! occurs. Within a turn the orchestrator owns the provider round-trip loop:
//! stream events, execute requested tools, feed results back, repeat. Turns
//! on one conversation are strictly sequential; concurrent turns on
//! different conversations share nothing but connection pools.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::synth::extractor;
use crate::synth::gateway::{failure_payload, ToolExecutor};
use crate::synth::prompt::system_prompt;
use crate::synth::provider::{
    ChatMessage, CompletionProvider, CompletionRequest, ContentBlock, StopReason, StreamEvent,
};
use crate::synth::store::ConversationStore;
use crate::synth::tools::tool_specs;
use crate::synth::types::{Conversation, Message, MessageRole, ToolInvocation};

// ============================================================================
// Turn events
// ============================================================================

/// Progress events emitted to the caller while a turn runs. Dropping the
/// receiver does not stop the turn; use the cancellation token for that.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// Incremental assistant text, in order.
    TextDelta(String),
    ToolStarted { name: String },
    ToolFinished { name: String, succeeded: bool },
    /// A workflow draft was extracted from the finished reply.
    WorkflowExtracted { name: String },
    Cancelled,
    Completed { message_id: String },
}

// ============================================================================
// Per-conversation turn exclusion
// ============================================================================

/// Tracks conversations with a turn in flight. A second turn on the same
/// conversation is refused, not queued.
#[derive(Clone, Default)]
pub struct ActiveTurns {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl ActiveTurns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the conversation for one turn. The claim is released when the
    /// returned guard drops, on every exit path.
    pub fn begin(&self, conversation_id: &str) -> Result<TurnGuard, AppError> {
        let mut active = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(conversation_id.to_string()) {
            return Err(AppError::TurnBusy(conversation_id.to_string()));
        }
        Ok(TurnGuard {
            inner: Arc::clone(&self.inner),
            conversation_id: conversation_id.to_string(),
        })
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(conversation_id)
    }
}

pub struct TurnGuard {
    inner: Arc<Mutex<HashSet<String>>>,
    conversation_id: String,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.conversation_id);
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// One streamed provider round-trip, reduced.
struct RoundTrip {
    text: String,
    tool_calls: Vec<(String, String, serde_json::Value)>,
    stop: Option<StopReason>,
    cancelled: bool,
}

pub struct TurnOrchestrator {
    provider: Arc<dyn CompletionProvider>,
    executor: Arc<dyn ToolExecutor>,
    store: Arc<dyn ConversationStore>,
    active: ActiveTurns,
    max_iterations: u32,
}

impl TurnOrchestrator {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        executor: Arc<dyn ToolExecutor>,
        store: Arc<dyn ConversationStore>,
        max_iterations: u32,
    ) -> Self {
        Self {
            provider,
            executor,
            store,
            active: ActiveTurns::new(),
            max_iterations,
        }
    }

    pub fn active_turns(&self) -> &ActiveTurns {
        &self.active
    }

    /// Run one turn: append the user message, drive the model until it stops
    /// asking for tools, extract a workflow from the finished reply, and
    /// persist the assistant message.
    ///
    /// Cancellation ends the turn cleanly: partial text is kept and the
    /// message is persisted with its cancelled flag set. A tool call already
    /// in flight is awaited and its result discarded.
    pub async fn run_turn(
        &self,
        conversation_id: &str,
        user_text: &str,
        events: &UnboundedSender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Result<Message, AppError> {
        let _guard = self.active.begin(conversation_id)?;
        let conversation = self.store.get(conversation_id).await?;

        self.store
            .append_message(conversation_id, Message::user(user_text))
            .await?;

        let mut history = provider_history(&conversation);
        history.push(ChatMessage::user_text(user_text));

        let mut message = Message::open_assistant();
        tracing::info!(conversation = conversation_id, message = %message.id, "turn started");

        let mut iterations = 0u32;
        loop {
            iterations += 1;
            if iterations > self.max_iterations {
                return Err(AppError::TurnIterations(self.max_iterations));
            }

            let request = CompletionRequest {
                system: system_prompt(conversation.platform).to_string(),
                messages: history.clone(),
                tools: tool_specs(),
            };
            let round = self
                .consume_stream(self.provider.stream_turn(request).await?, events, cancel)
                .await?;

            if !round.text.is_empty() {
                if !message.content.is_empty() {
                    message.content.push('\n');
                }
                message.content.push_str(&round.text);
            }

            if round.cancelled {
                message.cancelled = true;
                break;
            }

            match round.stop {
                Some(StopReason::ToolUse) if !round.tool_calls.is_empty() => {
                    let cancelled = self
                        .execute_tools(&round, &mut history, &mut message, events, cancel)
                        .await;
                    if cancelled {
                        message.cancelled = true;
                        break;
                    }
                }
                Some(StopReason::MaxTokens) => {
                    tracing::warn!("reply truncated at token budget");
                    break;
                }
                _ => break,
            }
        }

        message.closed = true;
        if message.cancelled {
            let _ = events.send(TurnEvent::Cancelled);
        } else if let Some(draft) =
            extractor::extract_workflow(&message.content, conversation.platform)
        {
            tracing::info!(workflow = %draft.name, nodes = draft.nodes.len(), "workflow extracted");
            let _ = events.send(TurnEvent::WorkflowExtracted {
                name: draft.name.clone(),
            });
            message.extracted_workflow = Some(draft);
        }

        self.store
            .append_message(conversation_id, message.clone())
            .await?;
        if message.extracted_workflow.is_some() {
            self.store
                .set_active_draft(conversation_id, Some(message.id.clone()))
                .await?;
        }

        let _ = events.send(TurnEvent::Completed {
            message_id: message.id.clone(),
        });
        Ok(message)
    }

    /// Drain one provider stream. Cancellation here abandons the stream
    /// immediately; text already received is kept.
    async fn consume_stream(
        &self,
        mut stream: crate::synth::provider::EventStream,
        events: &UnboundedSender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Result<RoundTrip, AppError> {
        let mut round = RoundTrip {
            text: String::new(),
            tool_calls: Vec::new(),
            stop: None,
            cancelled: false,
        };

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    round.cancelled = true;
                    return Ok(round);
                }
                item = stream.next() => item,
            };

            match item {
                Some(Ok(StreamEvent::TextDelta(delta))) => {
                    let _ = events.send(TurnEvent::TextDelta(delta.clone()));
                    round.text.push_str(&delta);
                }
                Some(Ok(StreamEvent::ToolCallRequest { id, name, input })) => {
                    round.tool_calls.push((id, name, input));
                }
                Some(Ok(StreamEvent::StreamEnd { stop })) => {
                    round.stop = Some(stop);
                    return Ok(round);
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(round),
            }
        }
    }

    /// Execute the round's tool calls in order and append the assistant
    /// blocks plus tool results to the provider history. Returns true when
    /// the turn was cancelled; an in-flight call is awaited first and its
    /// result discarded.
    async fn execute_tools(
        &self,
        round: &RoundTrip,
        history: &mut Vec<ChatMessage>,
        message: &mut Message,
        events: &UnboundedSender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> bool {
        let mut assistant_blocks = Vec::new();
        if !round.text.is_empty() {
            assistant_blocks.push(ContentBlock::Text {
                text: round.text.clone(),
            });
        }
        for (id, name, input) in &round.tool_calls {
            assistant_blocks.push(ContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            });
        }
        history.push(ChatMessage {
            role: crate::synth::provider::ChatRole::Assistant,
            content: assistant_blocks,
        });

        let mut results = Vec::new();
        for (id, name, input) in &round.tool_calls {
            let _ = events.send(TurnEvent::ToolStarted { name: name.clone() });
            let started = Instant::now();
            let outcome = self.executor.execute(name, input).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            if cancel.is_cancelled() {
                tracing::debug!(tool = name, "discarding tool result after cancellation");
                return true;
            }

            let invocation = match &outcome {
                Ok(output) => ToolInvocation {
                    tool_name: name.clone(),
                    input: input.clone(),
                    output: Some(output.clone()),
                    failure: None,
                    latency_ms,
                },
                Err(err) => ToolInvocation {
                    tool_name: name.clone(),
                    input: input.clone(),
                    output: None,
                    failure: Some(err.to_string()),
                    latency_ms,
                },
            };
            tracing::debug!(
                tool = name,
                succeeded = invocation.succeeded(),
                latency_ms,
                "tool call finished"
            );
            let _ = events.send(TurnEvent::ToolFinished {
                name: name.clone(),
                succeeded: invocation.succeeded(),
            });
            message.tool_invocations.push(invocation);

            // Failures go back to the model as error results; it decides
            // whether to retry differently or answer without the tool.
            let (content, is_error) = match outcome {
                Ok(output) => (output.to_string(), false),
                Err(err) => (failure_payload(&err).to_string(), true),
            };
            results.push(ChatMessage::tool_result(id.clone(), content, is_error));
        }

        history.extend(results);
        false
    }
}

/// Project the stored conversation into provider-format history. Cancelled
/// partials are included as ordinary assistant text; empty messages are
/// skipped.
fn provider_history(conversation: &Conversation) -> Vec<ChatMessage> {
    conversation
        .messages
        .iter()
        .filter(|m| !m.content.is_empty())
        .map(|m| match m.role {
            MessageRole::User | MessageRole::Tool => ChatMessage::user_text(m.content.clone()),
            MessageRole::Assistant => ChatMessage::assistant_text(m.content.clone()),
        })
        .collect()
}
