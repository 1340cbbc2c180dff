//! Provider adapter layer.
//!
//! Defines the [`LlmProvider`] trait plus the helpers shared by all adapters:
//! canonical JSON rendering, tolerant tool-argument parsing, deterministic
//! tool-call id synthesis, and HTTP response checking with key-material
//! sanitization.
//!
//! Three adapters are implemented:
//! - [`openai::OpenAiProvider`] — `/v1/chat/completions` API
//! - [`anthropic::AnthropicProvider`] — `/v1/messages` API
//! - [`gemini::GeminiProvider`] — `generateContent` API (API key or Vertex)
//!
//! Adapters are the only place provider-shaped data exists; they translate
//! to and from the canonical types and convert every failure into the
//! gateway error taxonomy before the router sees it.

use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::types::{LLMRequest, LLMResponse, LLMResponseChunk};

pub mod anthropic;
pub mod gemini;
pub mod openai;

/// Receiver half of a chunk stream produced by an adapter.
pub type ChunkReceiver = mpsc::Receiver<Result<LLMResponseChunk, GatewayError>>;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Feature set a provider adapter declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Native tool (function) calling.
    pub supports_tools: bool,
    /// Chunked streaming responses.
    pub supports_streaming: bool,
    /// Image content parts.
    pub supports_vision: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            supports_tools: true,
            supports_streaming: false,
            supports_vision: false,
        }
    }
}

/// Core provider adapter interface.
///
/// Implementations must be `Send + Sync` so the router can hold them behind
/// trait objects across await points.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stable provider name (`openai`, `anthropic`, `gemini`).
    fn name(&self) -> &str;

    /// Declared feature set.
    fn capabilities(&self) -> Capabilities;

    /// Request a completion.
    ///
    /// # Errors
    ///
    /// Returns a classified [`GatewayError`]; raw transport errors never
    /// escape the adapter.
    async fn generate(&self, req: &LLMRequest) -> Result<LLMResponse, GatewayError>;

    /// Request a streaming completion.
    ///
    /// The default implementation declines with a retryable
    /// *provider-unavailable* error so the router can fall through to the
    /// next candidate.
    ///
    /// # Errors
    ///
    /// Returns a classified [`GatewayError`] when the stream cannot start.
    async fn stream(&self, req: &LLMRequest) -> Result<ChunkReceiver, GatewayError> {
        let _ = req;
        Err(GatewayError::unavailable(
            "streaming is not implemented in this build",
            Some(self.name().to_owned()),
        ))
    }

    /// Classify raw failure text into the gateway taxonomy.
    fn map_error(&self, text: &str) -> GatewayError {
        GatewayError::classify(self.name(), text)
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Render a JSON value with recursively sorted object keys.
///
/// Used wherever a byte-stable rendering is required: cache fingerprints and
/// synthesized tool-call ids.
pub fn canonical_json(value: &serde_json::Value) -> String {
    fn sort(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let sorted: std::collections::BTreeMap<&String, serde_json::Value> =
                    map.iter().map(|(k, v)| (k, sort(v))).collect();
                serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sort).collect())
            }
            other => other.clone(),
        }
    }
    serde_json::to_string(&sort(value)).unwrap_or_else(|_| "null".to_owned())
}

/// Decode tool-call arguments into an object, never failing.
///
/// - absent → `{}`
/// - object → used directly
/// - JSON string of an object → parsed
/// - JSON string of a non-object → `{"value": <parsed>}`
/// - unparseable string → `{"raw": <original>}`
/// - any other shape → `{"value": <original>}`
pub fn safe_parse_json(value: Option<&serde_json::Value>) -> serde_json::Value {
    let empty = || serde_json::Value::Object(serde_json::Map::new());
    let wrap = |key: &str, inner: serde_json::Value| {
        let mut map = serde_json::Map::new();
        map.insert(key.to_owned(), inner);
        serde_json::Value::Object(map)
    };
    match value {
        None | Some(serde_json::Value::Null) => empty(),
        Some(obj @ serde_json::Value::Object(_)) => obj.clone(),
        Some(serde_json::Value::String(text)) => match serde_json::from_str(text) {
            Ok(parsed @ serde_json::Value::Object(_)) => parsed,
            Ok(parsed) => wrap("value", parsed),
            Err(_) => wrap("raw", serde_json::Value::String(text.clone())),
        },
        Some(other) => wrap("value", other.clone()),
    }
}

/// Synthesize a deterministic tool-call id from the call's name and
/// arguments.
///
/// The id is `{prefix}_{first 12 hex chars of SHA-256 over the canonical
/// rendering of {"a": arguments, "n": name}}`, so equal (name, arguments)
/// pairs produce byte-identical ids across runs.
pub fn stable_tool_call_id(name: &str, arguments: &serde_json::Value, prefix: &str) -> String {
    let blob = canonical_json(&serde_json::json!({"n": name, "a": arguments}));
    let digest = hex::encode(Sha256::digest(blob.as_bytes()));
    let short = digest.get(..12).unwrap_or(&digest);
    format!("{prefix}_{short}")
}

/// Check HTTP response status and return the body text or a classified error.
///
/// Non-success bodies are sanitized and folded into the error message
/// together with the status line so textual classification can see both.
///
/// # Errors
///
/// Returns a classified [`GatewayError`] on transport failure or non-2xx.
pub async fn check_http_response(
    provider: &str,
    response: reqwest::Response,
) -> Result<String, GatewayError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| map_reqwest_error(provider, &e))?;
    if !status.is_success() {
        let reason = status.canonical_reason().unwrap_or("error");
        let sanitized = sanitize_http_error_body(&body);
        return Err(GatewayError::classify(
            provider,
            format!("{} {reason}: {sanitized}", status.as_u16()),
        ));
    }
    Ok(body)
}

/// Convert a transport error into the gateway taxonomy.
///
/// Deadline expiry is surfaced as a retryable *timeout*; everything else is
/// classified from the error text.
pub fn map_reqwest_error(provider: &str, err: &reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        return GatewayError::timeout("request timeout", Some(provider.to_owned()));
    }
    GatewayError::classify(provider, err.to_string())
}

fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"sk-ant-[A-Za-z0-9_\-]{10,}",
        r"sk-[A-Za-z0-9]{32,}",
        r"AIza[A-Za-z0-9_\-]{30,}",
        r"Bearer [A-Za-z0-9._\-]{10,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
