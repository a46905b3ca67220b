//! Config-driven platform definitions for workflow validation.
//!
//! Each target platform (n8n, Make, Zapier) is defined as a data-driven
//! `PlatformRules` structure rather than hard-coded per-node logic, so new
//! platforms register their own entry-type patterns and required-parameter
//! tables without touching the validator.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ============================================================================
// Platform
// ============================================================================

/// Supported target platforms. A conversation is tagged with exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    N8n,
    Make,
    Zapier,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::N8n, Platform::Make, Platform::Zapier];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::N8n => "n8n",
            Platform::Make => "make",
            Platform::Zapier => "zapier",
        }
    }

    /// Parse from the string stored with the conversation record.
    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "n8n" => Ok(Platform::N8n),
            "make" => Ok(Platform::Make),
            "zapier" => Ok(Platform::Zapier),
            other => Err(AppError::Validation(format!(
                "Unsupported platform: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Rules
// ============================================================================

/// Node types matching a pattern must carry these parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredParamRule {
    /// Substring matched case-insensitively against the node type id.
    pub type_pattern: String,
    pub params: Vec<String>,
}

/// Structural rule tables for one platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformRules {
    pub platform: Platform,
    /// Case-insensitive substrings classifying a node type as a trigger/entry.
    pub entry_patterns: Vec<String>,
    pub required_params: Vec<RequiredParamRule>,
}

impl PlatformRules {
    /// Whether a node type is classifiable as a trigger/entry node.
    pub fn is_entry_type(&self, type_id: &str) -> bool {
        let lower = type_id.to_lowercase();
        self.entry_patterns.iter().any(|p| lower.contains(p))
    }

    /// Required parameter names for a node type. Empty when no rule matches.
    pub fn required_params(&self, type_id: &str) -> &[String] {
        let lower = type_id.to_lowercase();
        self.required_params
            .iter()
            .find(|rule| lower.contains(&rule.type_pattern))
            .map(|rule| rule.params.as_slice())
            .unwrap_or(&[])
    }
}

/// Built-in n8n rules.
pub fn builtin_n8n() -> PlatformRules {
    PlatformRules {
        platform: Platform::N8n,
        entry_patterns: pats(&["trigger", "webhook", "cron", "schedule"]),
        required_params: vec![
            rp("httprequest", &["url"]),
            rp("webhook", &["path"]),
            rp("cron", &["triggerTimes"]),
            rp("emailsend", &["toEmail"]),
            rp("slack", &["channel"]),
        ],
    }
}

/// Built-in Make (Integromat) rules.
pub fn builtin_make() -> PlatformRules {
    PlatformRules {
        platform: Platform::Make,
        entry_patterns: pats(&["trigger", "watch", "webhook", "instant"]),
        required_params: vec![
            rp("http", &["url"]),
            rp("webhook", &["hookUrl"]),
            rp("email", &["to"]),
        ],
    }
}

/// Built-in Zapier rules.
pub fn builtin_zapier() -> PlatformRules {
    PlatformRules {
        platform: Platform::Zapier,
        entry_patterns: pats(&["trigger", "schedule", "webhook"]),
        required_params: vec![
            rp("webhook", &["url"]),
            rp("filter", &["conditions"]),
        ],
    }
}

/// Look up the rule tables for a platform.
pub fn rules_for(platform: Platform) -> PlatformRules {
    match platform {
        Platform::N8n => builtin_n8n(),
        Platform::Make => builtin_make(),
        Platform::Zapier => builtin_zapier(),
    }
}

// ============================================================================
// Helper constructors
// ============================================================================

fn pats(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn rp(pattern: &str, params: &[&str]) -> RequiredParamRule {
    RequiredParamRule {
        type_pattern: pattern.into(),
        params: params.iter().map(|s| s.to_string()).collect(),
    }
}
