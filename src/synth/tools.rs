//! The fixed, versioned tool set the model is told about.
//!
//! Dynamic, schema-less payloads from the model are never trusted directly:
//! `ToolRequest::parse` dispatches on the tool name into a typed variant and
//! rejects anything that does not match that tool's declared shape, before
//! the gateway forwards the call upstream.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ============================================================================
// Tool specifications (advertised to the model)
// ============================================================================

/// One tool definition in the provider's tool-negotiation format.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
    /// Lookup tools are idempotent and safe to retry once on transient
    /// failure. Nothing in this set mutates remote state; deployment goes
    /// through the deployment adapter, never through the gateway.
    #[serde(skip)]
    pub idempotent: bool,
}

/// The declared tool set, in the order the model sees it.
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "search_nodes",
            description: "Search for automation nodes by query. Use this to find nodes that \
                          can perform specific tasks (e.g., 'send email', 'http request'). \
                          Always set includeExamples to true to get usage examples.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query describing the functionality needed"},
                    "includeExamples": {"type": "boolean", "default": true},
                    "limit": {"type": "integer", "default": 10}
                },
                "required": ["query"]
            }),
            idempotent: true,
        },
        ToolSpec {
            name: "get_node_essentials",
            description: "Get comprehensive information about a specific node including \
                          properties, configuration options, and examples. Use this after \
                          finding a node to understand how to configure it.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "nodeType": {"type": "string", "description": "The node type identifier (e.g., 'n8n-nodes-base.httpRequest')"},
                    "includeExamples": {"type": "boolean", "default": true}
                },
                "required": ["nodeType"]
            }),
            idempotent: true,
        },
        ToolSpec {
            name: "validate_workflow",
            description: "Validate a workflow structure before presenting it. Checks for \
                          errors and missing configuration. Always validate workflows \
                          before presenting them to users.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "workflow": {"type": "object", "description": "The workflow JSON object to validate"},
                    "profile": {"type": "string", "enum": ["strict", "balanced", "permissive"], "default": "balanced"}
                },
                "required": ["workflow"]
            }),
            idempotent: true,
        },
        ToolSpec {
            name: "search_templates",
            description: "Search the template gallery for pre-built workflows. Use this \
                          FIRST before building workflows from scratch. Templates are \
                          proven, tested solutions.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer", "default": 10}
                },
                "required": ["query"]
            }),
            idempotent: true,
        },
        ToolSpec {
            name: "get_template",
            description: "Retrieve a complete workflow template by ID. Use this after \
                          finding a relevant template from search_templates.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "templateId": {"type": "string"},
                    "mode": {"type": "string", "enum": ["full", "metadata", "workflow"], "default": "full"}
                },
                "required": ["templateId"]
            }),
            idempotent: true,
        },
        ToolSpec {
            name: "list_workflows",
            description: "List workflows already deployed to the automation engine. Useful \
                          for checking whether a similar workflow already exists.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "default": 10},
                    "active": {"type": "boolean"}
                }
            }),
            idempotent: true,
        },
    ]
}

/// Look up a spec by tool name.
pub fn spec_for(name: &str) -> Option<ToolSpec> {
    tool_specs().into_iter().find(|s| s.name == name)
}

// ============================================================================
// Typed tool requests (validated at the gateway boundary)
// ============================================================================

fn default_true() -> bool {
    true
}

fn default_limit() -> u32 {
    10
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchNodesInput {
    pub query: String,
    #[serde(default = "default_true")]
    pub include_examples: bool,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetNodeEssentialsInput {
    pub node_type: String,
    #[serde(default = "default_true")]
    pub include_examples: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationProfile {
    Strict,
    #[default]
    Balanced,
    Permissive,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateWorkflowInput {
    pub workflow: Value,
    #[serde(default)]
    pub profile: ValidationProfile,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchTemplatesInput {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateMode {
    #[default]
    Full,
    Metadata,
    Workflow,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTemplateInput {
    pub template_id: String,
    #[serde(default)]
    pub mode: TemplateMode,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListWorkflowsInput {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub active: Option<bool>,
}

/// A tool call whose payload has been validated against the declared schema.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    SearchNodes(SearchNodesInput),
    GetNodeEssentials(GetNodeEssentialsInput),
    ValidateWorkflow(ValidateWorkflowInput),
    SearchTemplates(SearchTemplatesInput),
    GetTemplate(GetTemplateInput),
    ListWorkflows(ListWorkflowsInput),
}

impl ToolRequest {
    /// Dispatch on tool name and deserialize the payload into the typed
    /// variant. Unknown names and shape mismatches are rejected; extra
    /// fields are ignored.
    pub fn parse(name: &str, input: &Value) -> Result<Self, String> {
        fn de<T: serde::de::DeserializeOwned>(input: &Value) -> Result<T, String> {
            serde_json::from_value(input.clone()).map_err(|e| e.to_string())
        }

        match name {
            "search_nodes" => Ok(ToolRequest::SearchNodes(de(input)?)),
            "get_node_essentials" => Ok(ToolRequest::GetNodeEssentials(de(input)?)),
            "validate_workflow" => Ok(ToolRequest::ValidateWorkflow(de(input)?)),
            "search_templates" => Ok(ToolRequest::SearchTemplates(de(input)?)),
            "get_template" => Ok(ToolRequest::GetTemplate(de(input)?)),
            "list_workflows" => Ok(ToolRequest::ListWorkflows(de(input)?)),
            other => Err(format!("Unknown tool: {other}")),
        }
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            ToolRequest::SearchNodes(_) => "search_nodes",
            ToolRequest::GetNodeEssentials(_) => "get_node_essentials",
            ToolRequest::ValidateWorkflow(_) => "validate_workflow",
            ToolRequest::SearchTemplates(_) => "search_templates",
            ToolRequest::GetTemplate(_) => "get_template",
            ToolRequest::ListWorkflows(_) => "list_workflows",
        }
    }

    /// Whether the upstream call may be retried once on transient failure.
    pub fn idempotent(&self) -> bool {
        // Every tool in the current set is a lookup; kept explicit so a
        // future mutating tool opts out here.
        true
    }

    /// Re-serialize to the gateway's camelCase argument shape.
    pub fn to_arguments(&self) -> Value {
        match self {
            ToolRequest::SearchNodes(i) => json!({
                "query": i.query,
                "includeExamples": i.include_examples,
                "limit": i.limit,
            }),
            ToolRequest::GetNodeEssentials(i) => json!({
                "nodeType": i.node_type,
                "includeExamples": i.include_examples,
            }),
            ToolRequest::ValidateWorkflow(i) => json!({
                "workflow": i.workflow,
                "profile": i.profile,
            }),
            ToolRequest::SearchTemplates(i) => json!({
                "query": i.query,
                "limit": i.limit,
            }),
            ToolRequest::GetTemplate(i) => json!({
                "templateId": i.template_id,
                "mode": i.mode,
            }),
            ToolRequest::ListWorkflows(i) => {
                let mut args = json!({"limit": i.limit});
                if let Some(active) = i.active {
                    args["active"] = json!(active);
                }
                args
            }
        }
    }
}
