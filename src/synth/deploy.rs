//! Deployment of validated drafts to the automation engine.
//!
//! One user action maps to exactly one engine attempt: the adapter performs a
//! single create-or-replace and never retries on its own. A rejection from
//! the engine is recorded verbatim so the user sees exactly what the engine
//! said; a later retry is always a fresh action with a fresh record.

use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::config::Settings;
use crate::error::AppError;
use crate::synth::types::{DeploymentRecord, WorkflowDraft};

// ============================================================================
// Engine boundary
// ============================================================================

/// A workflow as known to the engine after a write.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineWorkflow {
    pub id: String,
    pub url: Option<String>,
}

/// Engine write rejected the payload. The detail is the engine's own words.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("deployment rejected{}: {detail}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
pub struct EngineRejection {
    pub status: Option<u16>,
    pub detail: String,
}

/// REST boundary to the automation engine. The production implementation is
/// [`EngineClient`]; tests substitute stubs.
#[async_trait::async_trait]
pub trait EngineApi: Send + Sync {
    /// Existing workflow with this exact name, if any.
    async fn find_by_name(&self, name: &str) -> Result<Option<EngineWorkflow>, EngineRejection>;

    async fn create(&self, payload: &Value) -> Result<EngineWorkflow, EngineRejection>;

    async fn replace(&self, id: &str, payload: &Value) -> Result<EngineWorkflow, EngineRejection>;
}

// ============================================================================
// HTTP engine client
// ============================================================================

/// n8n-style REST client (`/api/v1/workflows`, `X-N8N-API-KEY` auth).
pub struct EngineClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl EngineClient {
    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: settings.engine_api_url.trim_end_matches('/').to_string(),
            api_key: settings.engine_api_key.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.header("X-N8N-API-KEY", key);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value, EngineRejection> {
        let response = builder.send().await.map_err(|e| EngineRejection {
            status: None,
            detail: format!("cannot reach automation engine: {e}"),
        })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(EngineRejection {
                status: Some(status.as_u16()),
                detail: body,
            });
        }
        serde_json::from_str(&body).map_err(|e| EngineRejection {
            status: None,
            detail: format!("invalid engine response: {e}"),
        })
    }

    fn workflow_from_body(&self, body: &Value) -> EngineWorkflow {
        let id = body
            .get("id")
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        let url = if id.is_empty() {
            None
        } else {
            Some(format!("{}/workflow/{id}", self.base_url))
        };
        EngineWorkflow { id, url }
    }
}

#[async_trait::async_trait]
impl EngineApi for EngineClient {
    async fn find_by_name(&self, name: &str) -> Result<Option<EngineWorkflow>, EngineRejection> {
        let body = self
            .send(
                self.request(reqwest::Method::GET, "/api/v1/workflows")
                    .query(&[("name", name)]),
            )
            .await?;
        let found = body
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|workflows| {
                workflows
                    .iter()
                    .find(|w| w.get("name").and_then(|n| n.as_str()) == Some(name))
            })
            .map(|w| self.workflow_from_body(w));
        Ok(found)
    }

    async fn create(&self, payload: &Value) -> Result<EngineWorkflow, EngineRejection> {
        let body = self
            .send(
                self.request(reqwest::Method::POST, "/api/v1/workflows")
                    .json(payload),
            )
            .await?;
        Ok(self.workflow_from_body(&body))
    }

    async fn replace(&self, id: &str, payload: &Value) -> Result<EngineWorkflow, EngineRejection> {
        let body = self
            .send(
                self.request(reqwest::Method::PUT, &format!("/api/v1/workflows/{id}"))
                    .json(payload),
            )
            .await?;
        Ok(self.workflow_from_body(&body))
    }
}

// ============================================================================
// Deployment adapter
// ============================================================================

/// Drives one deployment attempt end to end.
pub struct DeploymentAdapter {
    engine: std::sync::Arc<dyn EngineApi>,
}

impl DeploymentAdapter {
    pub fn new(engine: std::sync::Arc<dyn EngineApi>) -> Self {
        Self { engine }
    }

    /// Create-or-replace by name. Callers must only submit drafts that
    /// already passed validation; that precondition is not re-checked here.
    /// A rejection produces a failed record, never an error.
    pub async fn deploy(&self, draft: &WorkflowDraft) -> DeploymentRecord {
        let payload = engine_payload(draft);
        let outcome = match self.engine.find_by_name(&draft.name).await {
            Ok(Some(existing)) => {
                tracing::info!(name = %draft.name, id = %existing.id, "replacing existing workflow");
                self.engine.replace(&existing.id, &payload).await
            }
            Ok(None) => {
                tracing::info!(name = %draft.name, "creating workflow");
                self.engine.create(&payload).await
            }
            Err(rejection) => Err(rejection),
        };

        match outcome {
            Ok(workflow) => DeploymentRecord::succeeded(&draft.name, workflow.id, workflow.url),
            Err(rejection) => {
                tracing::warn!(name = %draft.name, detail = %rejection, "deployment rejected");
                DeploymentRecord::failed(&draft.name, rejection.to_string())
            }
        }
    }
}

/// Draft serialized into the engine's wire shape. n8n wants a `connections`
/// map and per-node positions; other platforms take the draft shape as-is.
pub fn engine_payload(draft: &WorkflowDraft) -> Value {
    use crate::synth::platform::Platform;

    match draft.platform {
        Platform::N8n => {
            let nodes: Vec<Value> = draft
                .nodes
                .iter()
                .enumerate()
                .map(|(i, n)| {
                    json!({
                        "id": n.id,
                        "name": n.id,
                        "type": n.type_id,
                        "typeVersion": 1,
                        "position": [250 + (i as i64) * 220, 300],
                        "parameters": n.parameters,
                    })
                })
                .collect();

            let mut connections = Map::new();
            for edge in &draft.edges {
                let outputs = connections
                    .entry(edge.from.clone())
                    .or_insert_with(|| json!({"main": []}));
                if let Some(main) = outputs.get_mut("main").and_then(|m| m.as_array_mut()) {
                    while main.len() <= edge.output_index as usize {
                        main.push(json!([]));
                    }
                    if let Some(slot) = main
                        .get_mut(edge.output_index as usize)
                        .and_then(|s| s.as_array_mut())
                    {
                        slot.push(json!({
                            "node": edge.to,
                            "type": "main",
                            "index": edge.input_index,
                        }));
                    }
                }
            }

            json!({
                "name": draft.name,
                "nodes": nodes,
                "connections": connections,
                "settings": {},
            })
        }
        Platform::Make | Platform::Zapier => json!({
            "name": draft.name,
            "nodes": draft.nodes,
            "edges": draft.edges,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::platform::Platform;
    use crate::synth::types::{DeploymentStatus, WorkflowEdge, WorkflowNode};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn valid_draft() -> WorkflowDraft {
        WorkflowDraft {
            platform: Platform::N8n,
            name: "Email digest".into(),
            nodes: vec![
                WorkflowNode {
                    id: "Webhook".into(),
                    type_id: "n8n-nodes-base.webhook".into(),
                    parameters: json!({"path": "/digest"}).as_object().cloned().unwrap(),
                },
                WorkflowNode {
                    id: "Fetch".into(),
                    type_id: "n8n-nodes-base.httpRequest".into(),
                    parameters: json!({"url": "https://api.dev/items"})
                        .as_object()
                        .cloned()
                        .unwrap(),
                },
            ],
            edges: vec![WorkflowEdge {
                from: "Webhook".into(),
                to: "Fetch".into(),
                output_index: 0,
                input_index: 0,
            }],
        }
    }

    /// Records every call; outcomes are scripted per method.
    struct StubEngine {
        existing: Option<EngineWorkflow>,
        reject_write: Option<EngineRejection>,
        calls: Mutex<Vec<String>>,
    }

    impl StubEngine {
        fn fresh() -> Self {
            Self {
                existing: None,
                reject_write: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl EngineApi for StubEngine {
        async fn find_by_name(
            &self,
            name: &str,
        ) -> Result<Option<EngineWorkflow>, EngineRejection> {
            self.calls.lock().unwrap().push(format!("find:{name}"));
            Ok(self.existing.clone())
        }

        async fn create(&self, _payload: &Value) -> Result<EngineWorkflow, EngineRejection> {
            self.calls.lock().unwrap().push("create".into());
            match &self.reject_write {
                Some(r) => Err(r.clone()),
                None => Ok(EngineWorkflow {
                    id: "wf-1".into(),
                    url: Some("http://engine/workflow/wf-1".into()),
                }),
            }
        }

        async fn replace(
            &self,
            id: &str,
            _payload: &Value,
        ) -> Result<EngineWorkflow, EngineRejection> {
            self.calls.lock().unwrap().push(format!("replace:{id}"));
            match &self.reject_write {
                Some(r) => Err(r.clone()),
                None => Ok(EngineWorkflow {
                    id: id.to_string(),
                    url: None,
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_deploy_creates_when_name_unknown() {
        let engine = Arc::new(StubEngine::fresh());
        let adapter = DeploymentAdapter::new(engine.clone());
        let record = adapter.deploy(&valid_draft()).await;
        assert_eq!(record.status, DeploymentStatus::Succeeded);
        assert_eq!(record.external_id.as_deref(), Some("wf-1"));
        let calls = engine.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["find:Email digest", "create"]);
    }

    #[tokio::test]
    async fn test_deploy_replaces_existing_by_name() {
        let mut engine = StubEngine::fresh();
        engine.existing = Some(EngineWorkflow {
            id: "wf-9".into(),
            url: None,
        });
        let engine = Arc::new(engine);
        let adapter = DeploymentAdapter::new(engine.clone());
        let record = adapter.deploy(&valid_draft()).await;
        assert_eq!(record.status, DeploymentStatus::Succeeded);
        let calls = engine.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["find:Email digest", "replace:wf-9"]);
    }

    #[tokio::test]
    async fn test_rejection_recorded_verbatim_no_retry() {
        let mut engine = StubEngine::fresh();
        engine.reject_write = Some(EngineRejection {
            status: Some(400),
            detail: "credential 'gmail' not configured".into(),
        });
        let engine = Arc::new(engine);
        let adapter = DeploymentAdapter::new(engine.clone());
        let record = adapter.deploy(&valid_draft()).await;
        assert_eq!(record.status, DeploymentStatus::Failed);
        assert!(record
            .failure
            .as_deref()
            .unwrap()
            .contains("credential 'gmail' not configured"));
        // exactly one write attempt
        let calls = engine.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["find:Email digest", "create"]);
    }

    #[test]
    fn test_n8n_payload_shape() {
        let payload = engine_payload(&valid_draft());
        assert_eq!(payload["name"], "Email digest");
        assert_eq!(payload["nodes"][0]["type"], "n8n-nodes-base.webhook");
        assert_eq!(
            payload["connections"]["Webhook"]["main"][0][0]["node"],
            "Fetch"
        );
    }
}
