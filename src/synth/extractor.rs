//! Workflow extraction from accumulated assistant text.
//!
//! Layered strategy, first success wins:
//! 1. the first fenced ```json block, parsed as the workflow object shape;
//! 2. the first balanced brace region whose parsed content carries a node
//!    collection.
//!
//! Finding nothing is a normal outcome (the assistant replied with prose);
//! malformed content inside a well-shaped object is deferred to the
//! validator. When several fenced blocks are present only the first is
//! inspected; multi-workflow replies are not supported.

use serde_json::{Map, Value};

use super::platform::Platform;
use super::types::{WorkflowDraft, WorkflowEdge, WorkflowNode};

/// Extract the workflow artifact from finalized turn text, if any.
///
/// Pure function of the text: re-running on the same input always yields the
/// same draft or the same absence.
pub fn extract_workflow(text: &str, platform: Platform) -> Option<WorkflowDraft> {
    if let Some(block) = first_fenced_json_block(text) {
        if let Some(draft) = parse_draft(block, platform) {
            return Some(draft);
        }
        tracing::debug!("fenced block present but not workflow-shaped, falling back to raw scan");
    }

    first_balanced_workflow_object(text, platform)
}

// ============================================================================
// Layer 1: fenced block
// ============================================================================

/// Content of the first ```json fenced block. An unterminated fence runs to
/// the end of the text.
fn first_fenced_json_block(text: &str) -> Option<&str> {
    let start = text.find("```json")? + "```json".len();
    let rest = &text[start..];
    let end = rest.find("```").unwrap_or(rest.len());
    Some(rest[..end].trim())
}

// ============================================================================
// Layer 2: balanced brace scan
// ============================================================================

/// First balanced `{...}` region that parses into a workflow-shaped object.
fn first_balanced_workflow_object(text: &str, platform: Platform) -> Option<WorkflowDraft> {
    // Cheap pre-filter: no node-collection key anywhere, no workflow.
    if !text.contains("\"nodes\"") {
        return None;
    }

    let bytes = text.as_bytes();
    let mut i = 0;
    while let Some(offset) = text[i..].find('{') {
        let start = i + offset;
        if let Some(end) = balanced_region_end(bytes, start) {
            let candidate = &text[start..=end];
            if let Some(draft) = parse_draft(candidate, platform) {
                return Some(draft);
            }
        }
        i = start + 1;
    }
    None
}

/// Index of the brace closing the region opened at `start`, honoring JSON
/// string literals and escapes. None when unbalanced.
fn balanced_region_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

// ============================================================================
// Shape acceptance & draft construction
// ============================================================================

/// Parse candidate text as the workflow object shape.
///
/// Acceptance requires a `nodes` array (possibly empty); an `edges` array or
/// n8n-style `connections` map is honored when present. Anything else is
/// "no workflow found", never an error.
fn parse_draft(candidate: &str, platform: Platform) -> Option<WorkflowDraft> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    let obj = value.as_object()?;
    let nodes_raw = obj.get("nodes")?.as_array()?;

    // A present-but-wrong-typed connection collection disqualifies the shape.
    if let Some(edges) = obj.get("edges") {
        if !edges.is_array() {
            return None;
        }
    }
    if let Some(connections) = obj.get("connections") {
        if !connections.is_object() {
            return None;
        }
    }

    let nodes: Vec<WorkflowNode> = nodes_raw
        .iter()
        .enumerate()
        .map(|(i, raw)| build_node(raw, i))
        .collect();

    let mut edges = Vec::new();
    if let Some(raw_edges) = obj.get("edges").and_then(|e| e.as_array()) {
        edges.extend(raw_edges.iter().map(build_edge));
    }
    if let Some(connections) = obj.get("connections").and_then(|c| c.as_object()) {
        edges.extend(edges_from_connections(connections));
    }

    let name = obj
        .get("name")
        .or_else(|| obj.get("title"))
        .and_then(|n| n.as_str())
        .unwrap_or("Untitled workflow")
        .to_string();

    Some(WorkflowDraft {
        platform,
        name,
        nodes,
        edges,
    })
}

/// Node ids fall back to the node name, then the position index, so drafts
/// with sloppy content still reach the validator intact.
fn build_node(raw: &Value, index: usize) -> WorkflowNode {
    let id = raw
        .get("id")
        .map(scalar_to_string)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            raw.get("name")
                .and_then(|n| n.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| format!("node-{index}"));

    let type_id = raw
        .get("type")
        .or_else(|| raw.get("module"))
        .or_else(|| raw.get("app"))
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_string();

    let parameters = raw
        .get("parameters")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    WorkflowNode {
        id,
        type_id,
        parameters,
    }
}

fn build_edge(raw: &Value) -> WorkflowEdge {
    WorkflowEdge {
        from: raw
            .get("from")
            .or_else(|| raw.get("source"))
            .map(scalar_to_string)
            .unwrap_or_default(),
        to: raw
            .get("to")
            .or_else(|| raw.get("target"))
            .map(scalar_to_string)
            .unwrap_or_default(),
        output_index: raw
            .get("output_index")
            .or_else(|| raw.get("output"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        input_index: raw
            .get("input_index")
            .or_else(|| raw.get("input"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
    }
}

/// Flatten an n8n connections map into directed edges. The outer array index
/// is the source output slot; each target carries its own input slot.
fn edges_from_connections(connections: &Map<String, Value>) -> Vec<WorkflowEdge> {
    let mut edges = Vec::new();
    for (source, outputs) in connections {
        let Some(outputs) = outputs.as_object() else {
            continue;
        };
        for slot_groups in outputs.values() {
            let Some(groups) = slot_groups.as_array() else {
                continue;
            };
            for (output_index, group) in groups.iter().enumerate() {
                let Some(targets) = group.as_array() else {
                    continue;
                };
                for target in targets {
                    let Some(to) = target.get("node").map(scalar_to_string) else {
                        continue;
                    };
                    edges.push(WorkflowEdge {
                        from: source.clone(),
                        to,
                        output_index: output_index as u32,
                        input_index: target
                            .get("index")
                            .and_then(|i| i.as_u64())
                            .unwrap_or(0) as u32,
                    });
                }
            }
        }
    }
    edges
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}
