//! Capability Gateway client.
//!
//! Translates a validated tool call into a JSON-RPC 2.0 `tools/call` against
//! the external catalog/template/validation service. Every call has a bounded
//! timeout and at most one automatic retry, applied only to transient
//! failures on idempotent tools. The gateway holds no per-call state; the
//! only shared resource is the underlying connection pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::Settings;
use crate::error::AppError;
use crate::synth::platform::Platform;
use crate::synth::tools::ToolRequest;

// ============================================================================
// Typed failures
// ============================================================================

/// Gateway failure taxonomy. Only transient variants are ever retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway call timed out")]
    Timeout,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed tool input: {0}")]
    MalformedInput(String),

    #[error("upstream error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Upstream {
        status: Option<u16>,
        message: String,
    },
}

impl GatewayError {
    /// Timeouts and 5xx-equivalents may be retried once; everything else
    /// surfaces immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Timeout => true,
            GatewayError::Upstream { status, .. } => {
                status.map(|s| s >= 500).unwrap_or(true)
            }
            GatewayError::NotFound(_) | GatewayError::MalformedInput(_) => false,
        }
    }
}

/// Failure shape fed back to the model as a tool result, so it can recover
/// by retrying differently or apologizing instead of the turn aborting.
pub fn failure_payload(err: &GatewayError) -> Value {
    json!({ "error": err.to_string() })
}

// ============================================================================
// Executor seam
// ============================================================================

/// Boundary the orchestrator calls tools through. The production
/// implementation is [`CapabilityGateway`]; tests substitute stubs.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, input: &Value) -> Result<Value, GatewayError>;
}

// ============================================================================
// CapabilityGateway
// ============================================================================

/// HTTP client for one platform's capability gateway.
pub struct CapabilityGateway {
    http: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
    request_id: AtomicU64,
}

impl CapabilityGateway {
    /// Build the gateway client for a target platform from settings.
    ///
    /// The `reqwest::Client` keeps a bounded connection pool shared across
    /// concurrent conversations; per-call state is never retained.
    pub fn from_settings(settings: &Settings, platform: Platform) -> Result<Self, AppError> {
        let (base_url, token) = settings.gateway_for(platform);
        let http = reqwest::Client::builder()
            .timeout(settings.gateway_timeout())
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: format!("{}/mcp", base_url.trim_end_matches('/')),
            auth_token: token.map(String::from),
            request_id: AtomicU64::new(1),
        })
    }

    /// Direct constructor for embedding applications with their own config.
    pub fn new(base_url: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: format!("{}/mcp", base_url.trim_end_matches('/')),
            auth_token,
            request_id: AtomicU64::new(1),
        })
    }

    async fn call_once(&self, request: &ToolRequest) -> Result<Value, GatewayError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {
                "name": request.tool_name(),
                "arguments": request.to_arguments(),
            },
            "id": id,
        });

        let mut builder = self.http.post(&self.endpoint).json(&payload);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout
            } else {
                GatewayError::Upstream {
                    status: None,
                    message: format!("cannot reach capability gateway: {e}"),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(if status.as_u16() == 404 {
                GatewayError::NotFound(format!("gateway endpoint: {message}"))
            } else {
                GatewayError::Upstream {
                    status: Some(status.as_u16()),
                    message,
                }
            });
        }

        let body: Value = response.json().await.map_err(|e| GatewayError::Upstream {
            status: None,
            message: format!("invalid gateway response: {e}"),
        })?;

        decode_rpc_response(&body)
    }
}

#[async_trait::async_trait]
impl ToolExecutor for CapabilityGateway {
    async fn execute(&self, name: &str, input: &Value) -> Result<Value, GatewayError> {
        // Validate the dynamic payload before anything leaves the process.
        let request = ToolRequest::parse(name, input).map_err(GatewayError::MalformedInput)?;
        with_single_retry(&request, || self.call_once(&request)).await
    }
}

/// Retry policy for upstream calls: at most one extra attempt, and only for
/// transient failures of idempotent tools.
async fn with_single_retry<F, Fut>(request: &ToolRequest, mut call: F) -> Result<Value, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Value, GatewayError>>,
{
    match call().await {
        Ok(value) => Ok(value),
        Err(err) if err.is_transient() && request.idempotent() => {
            tracing::warn!(
                tool = request.tool_name(),
                error = %err,
                "transient gateway failure, retrying once"
            );
            call().await
        }
        Err(err) => Err(err),
    }
}

/// Unwrap a JSON-RPC 2.0 `tools/call` response body into the tool payload.
///
/// MCP responses wrap the payload as `result.content[0].text`; the text is
/// itself JSON for structured tools, or plain prose which is passed through
/// as `{"result": "<text>"}`.
fn decode_rpc_response(body: &Value) -> Result<Value, GatewayError> {
    if let Some(error) = body.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown gateway error")
            .to_string();
        return Err(match code {
            -32601 => GatewayError::NotFound(message),
            -32602 => GatewayError::MalformedInput(message),
            _ => GatewayError::Upstream {
                status: None,
                message,
            },
        });
    }

    let result = body.get("result").ok_or_else(|| GatewayError::Upstream {
        status: None,
        message: "invalid gateway response: missing result field".into(),
    })?;

    match result.pointer("/content/0/text").and_then(|t| t.as_str()) {
        Some(text) => Ok(serde_json::from_str(text)
            .unwrap_or_else(|_| json!({ "result": text }))),
        None => Ok(json!({})),
    }
}
