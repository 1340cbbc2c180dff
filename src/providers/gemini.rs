//! Gemini provider adapter using the `generateContent` API.
//!
//! Reaches the Generative Language endpoint when an API key is configured,
//! or a Vertex AI endpoint when a project/location pair is. Gemini renames
//! the assistant role to `model` and flattens every other role to `user`;
//! tool calls come back without ids, so a deterministic id is synthesized
//! from the call's name and arguments.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::config::GatewaySettings;
use crate::cost::CostEstimator;
use crate::error::GatewayError;
use crate::telemetry::Telemetry;
use crate::types::{ContentPart, LLMRequest, LLMResponse, MessageContent, Role, ToolCall, Usage};

use super::{
    check_http_response, map_reqwest_error, safe_parse_json, stable_tool_call_id, Capabilities,
    LlmProvider,
};

/// Provider name used in settings, telemetry, and error attribution.
pub const PROVIDER_NAME: &str = "gemini";

/// Gemini messages adapter.
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    settings: Arc<GatewaySettings>,
    estimator: Arc<CostEstimator>,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Create an adapter over shared settings and cost tables.
    pub fn new(settings: Arc<GatewaySettings>, estimator: Arc<CostEstimator>) -> Self {
        Self {
            settings,
            estimator,
            client: reqwest::Client::new(),
        }
    }

    /// Resolve the endpoint for the configured credential style.
    fn resolve_endpoint(&self, provider_model: &str) -> Result<String, GatewayError> {
        if let Some(key) = self.settings.credentials.google_api_key.as_deref() {
            return Ok(format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{provider_model}:generateContent?key={key}"
            ));
        }
        if let (Some(project), Some(location)) = (
            self.settings.credentials.vertex_project.as_deref(),
            self.settings.credentials.vertex_location.as_deref(),
        ) {
            return Ok(format!(
                "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{provider_model}:generateContent"
            ));
        }
        Err(GatewayError::unavailable(
            "GOOGLE_API_KEY or Vertex project/location is required",
            Some(PROVIDER_NAME.to_owned()),
        ))
    }
}

// ---------------------------------------------------------------------------
// Wire building / parsing (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build the `generateContent` request payload.
#[doc(hidden)]
pub fn build_payload(req: &LLMRequest) -> Value {
    let contents: Vec<Value> = req
        .messages
        .iter()
        .map(|m| message_to_content(m.role, &m.content))
        .collect();

    let mut generation_config = serde_json::Map::new();
    if let Some(temperature) = req.temperature {
        generation_config.insert("temperature".to_owned(), json!(temperature));
    }
    if let Some(top_p) = req.top_p {
        generation_config.insert("topP".to_owned(), json!(top_p));
    }
    if let Some(max_tokens) = req.max_output_tokens {
        generation_config.insert("maxOutputTokens".to_owned(), json!(max_tokens));
    }

    let mut payload = json!({
        "contents": contents,
        "generationConfig": Value::Object(generation_config),
    });
    if !req.tools.is_empty() {
        let declarations: Vec<Value> = req
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.json_schema,
                })
            })
            .collect();
        payload["tools"] = json!([{"functionDeclarations": declarations}]);
    }
    payload
}

fn message_to_content(role: Role, content: &MessageContent) -> Value {
    let parts: Vec<Value> = match content {
        MessageContent::Text(text) => vec![json!({"text": text})],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => json!({"text": text}),
                ContentPart::ImageUrl { image_url } => {
                    json!({"fileData": {"fileUri": image_url}})
                }
            })
            .collect(),
    };
    let mapped_role = if role == Role::Assistant { "model" } else { "user" };
    json!({"role": mapped_role, "parts": parts})
}

/// Normalize `functionCall` parts.
///
/// The API carries no call ids, so one is synthesized deterministically;
/// equal (name, arguments) pairs yield byte-identical ids across runs.
#[doc(hidden)]
pub fn normalize_tool_calls(parts: &[Value]) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    for part in parts {
        let Some(function_call) = part.get("functionCall") else {
            continue;
        };
        let name = function_call
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_owned();
        let arguments = safe_parse_json(function_call.get("args"));
        let id = stable_tool_call_id(&name, &arguments, "gemini_tool");
        calls.push(ToolCall {
            id,
            name,
            arguments,
        });
    }
    calls
}

/// Normalize the `usageMetadata` payload, back-filling the total when absent
/// and clamping it so it is never less than `input + output`.
#[doc(hidden)]
pub fn usage_from_payload(
    payload: &Value,
    latency_ms: u64,
    provider_model: &str,
    estimator: &CostEstimator,
) -> Usage {
    let input_tokens = payload
        .get("promptTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let output_tokens = payload
        .get("candidatesTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let computed = input_tokens.saturating_add(output_tokens);
    let total_tokens = payload
        .get("totalTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or(computed)
        .max(computed);
    Usage {
        input_tokens,
        output_tokens,
        total_tokens,
        estimated_cost_usd: estimator.estimate(
            PROVIDER_NAME,
            provider_model,
            input_tokens,
            output_tokens,
        ),
        latency_ms,
    }
}

/// Assemble a normalized response from a parsed `generateContent` payload.
#[doc(hidden)]
pub fn parse_response(
    request_id: &str,
    provider_model: &str,
    latency_ms: u64,
    data: &Value,
    estimator: &CostEstimator,
    attach_raw: bool,
) -> LLMResponse {
    let first = data
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .cloned()
        .unwrap_or(Value::Null);
    let empty = Vec::new();
    let parts = first
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    let output_text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    let tool_calls = normalize_tool_calls(parts);
    let usage = usage_from_payload(
        data.get("usageMetadata").unwrap_or(&Value::Null),
        latency_ms,
        provider_model,
        estimator,
    );

    LLMResponse {
        request_id: request_id.to_owned(),
        provider: PROVIDER_NAME.to_owned(),
        provider_model: provider_model.to_owned(),
        output_text,
        tool_calls,
        usage,
        finish_reason: first
            .get("finishReason")
            .and_then(Value::as_str)
            .unwrap_or("stop")
            .to_owned(),
        raw: attach_raw.then(|| Telemetry::mask_credentials(data)),
    }
}

// ---------------------------------------------------------------------------
// Trait impl
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_tools: true,
            supports_streaming: true,
            supports_vision: true,
        }
    }

    async fn generate(&self, req: &LLMRequest) -> Result<LLMResponse, GatewayError> {
        let started = Instant::now();
        let provider_model = self.settings.concrete_model(PROVIDER_NAME, &req.model);
        let endpoint = self.resolve_endpoint(&provider_model)?;
        let payload = build_payload(req);

        let response = self
            .client
            .post(&endpoint)
            .header("content-type", "application/json")
            .timeout(Duration::from_millis(self.settings.request_timeout_ms))
            .json(&payload)
            .send()
            .await
            .map_err(|e| map_reqwest_error(PROVIDER_NAME, &e))?;

        let body = check_http_response(PROVIDER_NAME, response).await?;
        let data: Value = serde_json::from_str(&body).map_err(|e| {
            GatewayError::unavailable(
                format!("response parse failure: {e}"),
                Some(PROVIDER_NAME.to_owned()),
            )
        })?;

        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(parse_response(
            &req.request_id,
            &provider_model,
            latency_ms,
            &data,
            &self.estimator,
            self.settings.debug_raw_responses,
        ))
    }
}
