use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::platform::Platform;

// =============================================================================
// Conversation & messages
// =============================================================================

/// Role of a message in the conversation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

/// A conversation: an append-only message log plus the target platform and
/// an optional reference to the draft the latest turn produced.
///
/// Lifecycle (creation, persistence, deletion) is owned by the storage
/// collaborator; this subsystem only appends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub platform: Platform,
    pub messages: Vec<Message>,
    /// Id of the active workflow draft, if one was extracted. The draft
    /// itself is owned by external storage.
    pub active_draft_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(platform: Platform) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            platform,
            messages: Vec::new(),
            active_draft_id: None,
            created_at: Utc::now(),
        }
    }
}

/// One message in a conversation. "Open" while its content is still being
/// streamed; immutable once `closed` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    /// Tool invocations performed while producing this message, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,
    /// Workflow extracted from this message's final content, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_workflow: Option<WorkflowDraft>,
    pub closed: bool,
    /// Set when the turn was cancelled mid-stream; partial content is kept.
    #[serde(default)]
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content.into(), true)
    }

    /// An assistant message in its streaming ("open") state.
    pub fn open_assistant() -> Self {
        Self::new(MessageRole::Assistant, String::new(), false)
    }

    fn new(role: MessageRole, content: String, closed: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            tool_invocations: Vec::new(),
            extracted_workflow: None,
            closed,
            cancelled: false,
            created_at: Utc::now(),
        }
    }
}

/// A completed tool call: request, outcome, and latency. Every tool-call
/// event from the model produces exactly one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub input: serde_json::Value,
    /// Success payload, absent when the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Failure description, absent when the call succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub latency_ms: u64,
}

impl ToolInvocation {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

// =============================================================================
// Workflow draft
// =============================================================================

/// A node in a workflow draft: unique id, platform type identifier, and a
/// free-form parameter map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub type_id: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// A directed edge between two nodes, carrying output/input slot indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub output_index: u32,
    #[serde(default)]
    pub input_index: u32,
}

/// The structured graph artifact extracted from an assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDraft {
    pub platform: Platform,
    pub name: String,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
}

impl WorkflowDraft {
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

// =============================================================================
// Validation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Subject of a finding: a specific node, an edge (by endpoints), or the
/// graph as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum FindingSubject {
    Node(String),
    Edge(String),
    Graph,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub subject: FindingSubject,
    /// Stable machine-readable code, e.g. "empty_workflow", "missing_trigger".
    pub code: &'static str,
    pub message: String,
}

/// Result of validating a draft. Deployable iff no error-severity findings;
/// warnings never block deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn deployable(&self) -> bool {
        !self
            .findings
            .iter()
            .any(|f| f.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
    }
}

// =============================================================================
// Deployment
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Succeeded,
    Failed,
}

/// Outcome of one deployment attempt. Attached to the attempt, not persisted
/// by this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub draft_name: String,
    pub status: DeploymentStatus,
    /// Identifier the engine assigned, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Engine-side reference URL or handle, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    /// Verbatim failure detail, present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub deployed_at: DateTime<Utc>,
}

impl DeploymentRecord {
    pub fn succeeded(name: &str, external_id: String, external_url: Option<String>) -> Self {
        Self {
            draft_name: name.to_string(),
            status: DeploymentStatus::Succeeded,
            external_id: Some(external_id),
            external_url,
            failure: None,
            deployed_at: Utc::now(),
        }
    }

    pub fn failed(name: &str, detail: String) -> Self {
        Self {
            draft_name: name.to_string(),
            status: DeploymentStatus::Failed,
            external_id: None,
            external_url: None,
            failure: Some(detail),
            deployed_at: Utc::now(),
        }
    }
}
