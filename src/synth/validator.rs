//! Structural validation of extracted workflow drafts.
//!
//! Validation never aborts on the first problem: every check runs and the
//! findings accumulate in a deterministic order, so the same draft always
//! produces the same report. Platform-specific knowledge (what counts as a
//! trigger, which node types need which parameters) lives in the rules
//! tables, not here.

use std::collections::{HashMap, HashSet, VecDeque};

use super::platform::{rules_for, PlatformRules};
use super::types::{
    Finding, FindingSubject, Severity, ValidationReport, WorkflowDraft,
};

/// Validate a draft against its platform's rules.
///
/// Check order is fixed: graph emptiness, per-node checks in node order,
/// trigger presence, per-edge endpoint checks in edge order, reachability.
pub fn validate(draft: &WorkflowDraft) -> ValidationReport {
    let rules = rules_for(draft.platform);
    let mut findings = Vec::new();

    if draft.nodes.is_empty() {
        findings.push(Finding {
            severity: Severity::Error,
            subject: FindingSubject::Graph,
            code: "empty_workflow",
            message: "workflow has no nodes".into(),
        });
        return ValidationReport { findings };
    }

    check_nodes(draft, &rules, &mut findings);
    check_trigger(draft, &rules, &mut findings);
    check_edges(draft, &mut findings);
    check_reachability(draft, &rules, &mut findings);

    ValidationReport { findings }
}

fn check_nodes(draft: &WorkflowDraft, rules: &PlatformRules, findings: &mut Vec<Finding>) {
    let mut seen: HashSet<&str> = HashSet::new();

    for node in &draft.nodes {
        if !seen.insert(node.id.as_str()) {
            findings.push(Finding {
                severity: Severity::Error,
                subject: FindingSubject::Node(node.id.clone()),
                code: "duplicate_node_id",
                message: format!("node id '{}' is used more than once", node.id),
            });
        }

        if node.type_id.is_empty() {
            findings.push(Finding {
                severity: Severity::Error,
                subject: FindingSubject::Node(node.id.clone()),
                code: "missing_node_type",
                message: format!("node '{}' has no type", node.id),
            });
            continue;
        }

        for param in rules.required_params(&node.type_id) {
            let missing = match node.parameters.get(param) {
                None => true,
                Some(v) => v.is_null() || v.as_str().map(|s| s.is_empty()).unwrap_or(false),
            };
            if missing {
                findings.push(Finding {
                    severity: Severity::Error,
                    subject: FindingSubject::Node(node.id.clone()),
                    code: "missing_required_param",
                    message: format!(
                        "node '{}' ({}) is missing required parameter '{}'",
                        node.id, node.type_id, param
                    ),
                });
            }
        }
    }
}

fn check_trigger(draft: &WorkflowDraft, rules: &PlatformRules, findings: &mut Vec<Finding>) {
    let has_entry = draft.nodes.iter().any(|n| rules.is_entry_type(&n.type_id));
    if !has_entry {
        findings.push(Finding {
            severity: Severity::Error,
            subject: FindingSubject::Graph,
            code: "missing_trigger",
            message: format!(
                "workflow has no {} trigger node to start from",
                draft.platform
            ),
        });
    }
}

fn check_edges(draft: &WorkflowDraft, findings: &mut Vec<Finding>) {
    let ids: HashSet<&str> = draft.nodes.iter().map(|n| n.id.as_str()).collect();

    for (i, edge) in draft.edges.iter().enumerate() {
        let edge_label = format!("{}->{}", edge.from, edge.to);
        if !ids.contains(edge.from.as_str()) {
            findings.push(Finding {
                severity: Severity::Error,
                subject: FindingSubject::Edge(edge_label.clone()),
                code: "dangling_edge_source",
                message: format!(
                    "edge {} references unknown source node '{}'",
                    i, edge.from
                ),
            });
        }
        if !ids.contains(edge.to.as_str()) {
            findings.push(Finding {
                severity: Severity::Error,
                subject: FindingSubject::Edge(edge_label),
                code: "dangling_edge_target",
                message: format!("edge {} references unknown target node '{}'", i, edge.to),
            });
        }
    }
}

/// Nodes not reachable from any entry node still deploy, so this is a
/// warning. Skipped entirely when the draft has no entry node; the missing
/// trigger error already covers that case.
fn check_reachability(draft: &WorkflowDraft, rules: &PlatformRules, findings: &mut Vec<Finding>) {
    let entries: Vec<&str> = draft
        .nodes
        .iter()
        .filter(|n| rules.is_entry_type(&n.type_id))
        .map(|n| n.id.as_str())
        .collect();
    if entries.is_empty() {
        return;
    }

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &draft.edges {
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
    }

    let mut reached: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = entries.into_iter().collect();
    while let Some(id) = queue.pop_front() {
        if !reached.insert(id) {
            continue;
        }
        if let Some(next) = adjacency.get(id) {
            queue.extend(next.iter().copied());
        }
    }

    for node in &draft.nodes {
        if !reached.contains(node.id.as_str()) {
            findings.push(Finding {
                severity: Severity::Warning,
                subject: FindingSubject::Node(node.id.clone()),
                code: "unreachable_node",
                message: format!(
                    "node '{}' is not reachable from any trigger node",
                    node.id
                ),
            });
        }
    }
}
