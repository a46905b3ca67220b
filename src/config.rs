use std::time::Duration;

use crate::error::AppError;
use crate::synth::platform::Platform;

/// Default Claude model used when CLAUDE_MODEL is unset.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Runtime settings, loaded once from environment variables.
///
/// The embedding application owns general HTTP/config loading; this struct
/// covers only what the synthesis pipeline itself needs: provider access,
/// gateway endpoints per platform, engine API access, and timeouts.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Anthropic API key (ANTHROPIC_API_KEY). Required for the live provider.
    pub anthropic_api_key: String,
    /// Model identifier (CLAUDE_MODEL).
    pub model: String,
    /// Max tokens per completion request (CLAUDE_MAX_TOKENS).
    pub max_tokens: u32,
    /// Sampling temperature (CLAUDE_TEMPERATURE).
    pub temperature: f64,

    /// Capability gateway base URL for n8n (N8N_MCP_URL).
    pub n8n_gateway_url: String,
    /// Optional bearer token for the n8n gateway (N8N_MCP_AUTH_TOKEN).
    pub n8n_gateway_token: Option<String>,
    /// Capability gateway base URL for Make (MAKE_MCP_URL).
    pub make_gateway_url: String,
    /// Optional bearer token for the Make gateway (MAKE_MCP_AUTH_TOKEN).
    pub make_gateway_token: Option<String>,

    /// Automation engine API base URL (ENGINE_API_URL).
    pub engine_api_url: String,
    /// Automation engine API key (ENGINE_API_KEY).
    pub engine_api_key: Option<String>,

    /// Idle timeout on the completion stream, seconds (STREAM_IDLE_TIMEOUT_SECS).
    pub stream_idle_timeout_secs: u64,
    /// Per-call gateway timeout, seconds (GATEWAY_TIMEOUT_SECS).
    pub gateway_timeout_secs: u64,
    /// Hard cap on provider round-trips within one turn (MAX_TURN_ITERATIONS).
    pub max_turn_iterations: u32,
}

impl Settings {
    /// Load settings from the environment, applying `.env` first if present.
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let anthropic_api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| AppError::Config("ANTHROPIC_API_KEY is not set".into()))?;

        Ok(Self {
            anthropic_api_key,
            model: env_or("CLAUDE_MODEL", DEFAULT_MODEL),
            max_tokens: env_parsed("CLAUDE_MAX_TOKENS", 4096)?,
            temperature: env_parsed("CLAUDE_TEMPERATURE", 1.0)?,
            n8n_gateway_url: env_url("N8N_MCP_URL", "http://localhost:3001")?,
            n8n_gateway_token: std::env::var("N8N_MCP_AUTH_TOKEN").ok(),
            make_gateway_url: env_url("MAKE_MCP_URL", "http://localhost:3002")?,
            make_gateway_token: std::env::var("MAKE_MCP_AUTH_TOKEN").ok(),
            engine_api_url: env_url("ENGINE_API_URL", "http://localhost:5678")?,
            engine_api_key: std::env::var("ENGINE_API_KEY").ok(),
            stream_idle_timeout_secs: env_parsed("STREAM_IDLE_TIMEOUT_SECS", 120)?,
            gateway_timeout_secs: env_parsed("GATEWAY_TIMEOUT_SECS", 30)?,
            max_turn_iterations: env_parsed("MAX_TURN_ITERATIONS", 15)?,
        })
    }

    /// Gateway endpoint and token for a target platform.
    ///
    /// Zapier has no capability gateway of its own; its tool calls are served
    /// by the n8n gateway's template corpus, matching the original backend.
    pub fn gateway_for(&self, platform: Platform) -> (&str, Option<&str>) {
        match platform {
            Platform::Make => (&self.make_gateway_url, self.make_gateway_token.as_deref()),
            Platform::N8n | Platform::Zapier => {
                (&self.n8n_gateway_url, self.n8n_gateway_token.as_deref())
            }
        }
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Like `env_or`, but the value must be a well-formed absolute URL. The
/// trailing slash is normalized away.
fn env_url(key: &str, default: &str) -> Result<String, AppError> {
    let raw = env_or(key, default);
    url::Url::parse(&raw).map_err(|e| AppError::Config(format!("{key} is not a valid URL: {e}")))?;
    Ok(raw.trim_end_matches('/').to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}
