//! End-to-end pipeline tests with a scripted provider, a stub gateway, and
//! a stub engine. No network involved.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{stream, StreamExt};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use flowsynth::error::AppError;
use flowsynth::synth::deploy::{EngineApi, EngineRejection, EngineWorkflow};
use flowsynth::synth::gateway::{GatewayError, ToolExecutor};
use flowsynth::synth::orchestrator::TurnEvent;
use flowsynth::synth::provider::{
    CompletionProvider, CompletionRequest, EventStream, StopReason, StreamEvent,
};
use flowsynth::synth::store::MemoryStore;
use flowsynth::synth::types::DeploymentStatus;
use flowsynth::{Platform, SynthPipeline};

// ============================================================================
// Test doubles
// ============================================================================

type Round = Vec<Result<StreamEvent, AppError>>;

/// Provider that plays back one scripted event sequence per round-trip. A
/// `None` round yields a stream that never produces anything.
struct ScriptedProvider {
    rounds: Mutex<VecDeque<Option<Round>>>,
}

impl ScriptedProvider {
    fn new(rounds: Vec<Option<Round>>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
        }
    }
}

#[async_trait::async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn stream_turn(&self, _request: CompletionRequest) -> Result<EventStream, AppError> {
        match self.rounds.lock().unwrap().pop_front() {
            Some(Some(round)) => Ok(stream::iter(round).boxed()),
            // stalled stream: one delta, then silence until cancelled
            Some(None) | None => Ok(stream::iter(vec![Ok(StreamEvent::TextDelta(
                "thinking".into(),
            ))])
            .chain(stream::pending())
            .boxed()),
        }
    }
}

struct StubGateway {
    responses: Mutex<VecDeque<Result<Value, GatewayError>>>,
    calls: Mutex<Vec<String>>,
}

impl StubGateway {
    fn always_ok(value: Value) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(vec![Ok(value)])),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl ToolExecutor for StubGateway {
    async fn execute(&self, name: &str, _input: &Value) -> Result<Value, GatewayError> {
        self.calls.lock().unwrap().push(name.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({})))
    }
}

struct StubEngine {
    reject: Option<EngineRejection>,
    writes: Mutex<u32>,
    last_payload: Mutex<Option<Value>>,
}

impl StubEngine {
    fn accepting() -> Self {
        Self {
            reject: None,
            writes: Mutex::new(0),
            last_payload: Mutex::new(None),
        }
    }

    fn rejecting(detail: &str) -> Self {
        Self {
            reject: Some(EngineRejection {
                status: Some(400),
                detail: detail.into(),
            }),
            writes: Mutex::new(0),
            last_payload: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl EngineApi for StubEngine {
    async fn find_by_name(&self, _name: &str) -> Result<Option<EngineWorkflow>, EngineRejection> {
        Ok(None)
    }

    async fn create(&self, payload: &Value) -> Result<EngineWorkflow, EngineRejection> {
        *self.writes.lock().unwrap() += 1;
        *self.last_payload.lock().unwrap() = Some(payload.clone());
        match &self.reject {
            Some(r) => Err(r.clone()),
            None => Ok(EngineWorkflow {
                id: "wf-42".into(),
                url: Some("http://engine/workflow/wf-42".into()),
            }),
        }
    }

    async fn replace(&self, id: &str, _payload: &Value) -> Result<EngineWorkflow, EngineRejection> {
        *self.writes.lock().unwrap() += 1;
        Ok(EngineWorkflow {
            id: id.into(),
            url: None,
        })
    }
}

fn pipeline(
    rounds: Vec<Option<Round>>,
    gateway: StubGateway,
    engine: StubEngine,
) -> (Arc<SynthPipeline>, Arc<StubGateway>, Arc<StubEngine>) {
    let gateway = Arc::new(gateway);
    let engine = Arc::new(engine);
    let p = SynthPipeline::assemble(
        Arc::new(ScriptedProvider::new(rounds)),
        gateway.clone(),
        Arc::new(MemoryStore::new()),
        engine.clone(),
        15,
    );
    (Arc::new(p), gateway, engine)
}

fn text(t: &str) -> Result<StreamEvent, AppError> {
    Ok(StreamEvent::TextDelta(t.into()))
}

fn end(stop: StopReason) -> Result<StreamEvent, AppError> {
    Ok(StreamEvent::StreamEnd { stop })
}

const WORKFLOW_REPLY: &str = "Here it is.\n```json\n{\"name\":\"Inbox digest\",\"nodes\":[\
{\"id\":\"Webhook\",\"type\":\"n8n-nodes-base.webhook\",\"parameters\":{\"path\":\"/in\"}},\
{\"id\":\"Send\",\"type\":\"n8n-nodes-base.emailSend\",\"parameters\":{\"toEmail\":\"me@x.dev\"}}\
],\"edges\":[{\"from\":\"Webhook\",\"to\":\"Send\"}]}\n```";

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn synthesis_then_validation_then_deployment() {
    let (p, gateway, engine) = pipeline(
        vec![
            Some(vec![
                text("Let me look that up."),
                Ok(StreamEvent::ToolCallRequest {
                    id: "toolu_1".into(),
                    name: "search_nodes".into(),
                    input: json!({"query": "send email"}),
                }),
                end(StopReason::ToolUse),
            ]),
            Some(vec![text(WORKFLOW_REPLY), end(StopReason::EndTurn)]),
        ],
        StubGateway::always_ok(json!({"results": ["n8n-nodes-base.emailSend"]})),
        StubEngine::accepting(),
    );

    let conversation = p.start_conversation(Platform::N8n).await.unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let message = p
        .send_message(
            &conversation.id,
            "email me new form submissions",
            &tx,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(message.extracted_workflow.is_some());
    assert_eq!(gateway.calls.lock().unwrap().as_slice(), ["search_nodes"]);

    // events arrived in order: deltas, tool lifecycle, extraction, completion
    let mut saw_extracted = false;
    while let Ok(event) = rx.try_recv() {
        if let TurnEvent::WorkflowExtracted { name } = &event {
            assert_eq!(name, "Inbox digest");
            saw_extracted = true;
        }
    }
    assert!(saw_extracted);

    let (draft, report) = p.validate_active_draft(&conversation.id).await.unwrap();
    assert_eq!(draft.nodes.len(), 2);
    assert!(report.deployable());

    let record = p.deploy_active_draft(&conversation.id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Succeeded);
    assert_eq!(record.external_id.as_deref(), Some("wf-42"));
    assert_eq!(*engine.writes.lock().unwrap(), 1);

    // the engine payload carries the whole graph: every node, every edge
    let payload = engine.last_payload.lock().unwrap().clone().unwrap();
    assert_eq!(payload["name"], "Inbox digest");
    assert_eq!(payload["nodes"].as_array().unwrap().len(), draft.nodes.len());
    let wired: usize = payload["connections"]
        .as_object()
        .unwrap()
        .values()
        .flat_map(|o| o["main"].as_array().unwrap())
        .map(|slot| slot.as_array().unwrap().len())
        .sum();
    assert_eq!(wired, draft.edges.len());
}

#[tokio::test]
async fn clarifying_turn_then_workflow_turn() {
    let (p, _, _) = pipeline(
        vec![
            Some(vec![
                text("Which mailbox should I watch?"),
                end(StopReason::EndTurn),
            ]),
            Some(vec![text(WORKFLOW_REPLY), end(StopReason::EndTurn)]),
        ],
        StubGateway::always_ok(json!({})),
        StubEngine::accepting(),
    );

    let conversation = p.start_conversation(Platform::N8n).await.unwrap();
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let first = p
        .send_message(&conversation.id, "automate my email", &tx, &cancel)
        .await
        .unwrap();
    assert!(first.extracted_workflow.is_none());
    assert!(p.active_draft(&conversation.id).await.is_err());

    let second = p
        .send_message(&conversation.id, "the support inbox", &tx, &cancel)
        .await
        .unwrap();
    assert!(second.extracted_workflow.is_some());
    assert_eq!(
        p.conversation(&conversation.id)
            .await
            .unwrap()
            .active_draft_id,
        Some(second.id)
    );
}

#[tokio::test]
async fn deployment_rejection_is_reported_verbatim() {
    let (p, _, engine) = pipeline(
        vec![Some(vec![text(WORKFLOW_REPLY), end(StopReason::EndTurn)])],
        StubGateway::always_ok(json!({})),
        StubEngine::rejecting("workflow name already locked by another project"),
    );

    let conversation = p.start_conversation(Platform::N8n).await.unwrap();
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    p.send_message(&conversation.id, "go", &tx, &CancellationToken::new())
        .await
        .unwrap();

    let record = p.deploy_active_draft(&conversation.id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert!(record
        .failure
        .as_deref()
        .unwrap()
        .contains("workflow name already locked by another project"));
    assert_eq!(*engine.writes.lock().unwrap(), 1);
}

#[tokio::test]
async fn invalid_draft_never_reaches_engine() {
    // draft with no trigger node
    let reply = "```json\n{\"name\":\"Broken\",\"nodes\":[\
{\"id\":\"Fetch\",\"type\":\"n8n-nodes-base.httpRequest\",\"parameters\":{\"url\":\"https://x.dev\"}}\
],\"edges\":[]}\n```";
    let (p, _, engine) = pipeline(
        vec![Some(vec![text(reply), end(StopReason::EndTurn)])],
        StubGateway::always_ok(json!({})),
        StubEngine::accepting(),
    );

    let conversation = p.start_conversation(Platform::N8n).await.unwrap();
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    p.send_message(&conversation.id, "go", &tx, &CancellationToken::new())
        .await
        .unwrap();

    let (_, report) = p.validate_active_draft(&conversation.id).await.unwrap();
    assert!(!report.deployable());

    let err = p.deploy_active_draft(&conversation.id).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(*engine.writes.lock().unwrap(), 0);
}

#[tokio::test]
async fn cancellation_mid_stream_keeps_partial_content() {
    // None round: the stream emits one delta and then stalls
    let (p, _, _) = pipeline(
        vec![None],
        StubGateway::always_ok(json!({})),
        StubEngine::accepting(),
    );

    let conversation = p.start_conversation(Platform::N8n).await.unwrap();
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let handle = {
        let p = p.clone();
        let id = conversation.id.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { p.send_message(&id, "go", &tx, &cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    let message = handle.await.unwrap().unwrap();

    assert!(message.cancelled);
    assert!(message.closed);
    assert_eq!(message.content, "thinking");
    assert!(message.extracted_workflow.is_none());

    // the partial message is part of history
    let stored = p.conversation(&conversation.id).await.unwrap();
    assert_eq!(stored.messages.len(), 2);
    assert!(stored.messages[1].cancelled);
}

#[tokio::test]
async fn concurrent_turn_on_same_conversation_is_refused() {
    let (p, _, _) = pipeline(
        vec![None],
        StubGateway::always_ok(json!({})),
        StubEngine::accepting(),
    );

    let conversation = p.start_conversation(Platform::N8n).await.unwrap();
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let handle = {
        let p = p.clone();
        let id = conversation.id.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { p.send_message(&id, "first", &tx, &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = p
        .send_message(&conversation.id, "second", &tx, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TurnBusy(_)));

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn tool_failure_surfaces_to_model_not_caller() {
    let gateway = StubGateway {
        responses: Mutex::new(VecDeque::from(vec![Err(GatewayError::Upstream {
            status: Some(502),
            message: "catalog unavailable".into(),
        })])),
        calls: Mutex::new(Vec::new()),
    };
    let (p, _, _) = pipeline(
        vec![
            Some(vec![
                Ok(StreamEvent::ToolCallRequest {
                    id: "toolu_1".into(),
                    name: "search_templates".into(),
                    input: json!({"query": "digest"}),
                }),
                end(StopReason::ToolUse),
            ]),
            Some(vec![
                text("The catalog is down, describe the nodes you want."),
                end(StopReason::EndTurn),
            ]),
        ],
        gateway,
        StubEngine::accepting(),
    );

    let conversation = p.start_conversation(Platform::N8n).await.unwrap();
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let message = p
        .send_message(&conversation.id, "go", &tx, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(message.tool_invocations.len(), 1);
    assert!(!message.tool_invocations[0].succeeded());
    assert!(message.content.contains("catalog is down"));
}
