//! OpenAI provider adapter using the `/v1/chat/completions` API.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::config::GatewaySettings;
use crate::cost::CostEstimator;
use crate::error::GatewayError;
use crate::telemetry::Telemetry;
use crate::types::{LLMRequest, LLMResponse, ToolCall, ToolSpec, Usage};

use super::{
    check_http_response, map_reqwest_error, safe_parse_json, stable_tool_call_id, Capabilities,
    LlmProvider,
};

/// Provider name used in settings, telemetry, and error attribution.
pub const PROVIDER_NAME: &str = "openai";

const API_BASE: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI chat completions adapter.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    settings: Arc<GatewaySettings>,
    estimator: Arc<CostEstimator>,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Create an adapter over shared settings and cost tables.
    pub fn new(settings: Arc<GatewaySettings>, estimator: Arc<CostEstimator>) -> Self {
        Self {
            settings,
            estimator,
            client: reqwest::Client::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire building / parsing (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build the chat-completions request payload.
#[doc(hidden)]
pub fn build_payload(req: &LLMRequest, model: &str) -> Value {
    let messages: Vec<Value> = req
        .messages
        .iter()
        .map(|m| {
            let mut message = json!({
                "role": m.role.as_str(),
                "content": m.content.flattened_text(),
            });
            if let Some(name) = &m.name {
                message["name"] = json!(name);
            }
            if let Some(id) = &m.tool_call_id {
                message["tool_call_id"] = json!(id);
            }
            message
        })
        .collect();

    let mut payload = json!({
        "model": model,
        "messages": messages,
    });
    if let Some(temperature) = req.temperature {
        payload["temperature"] = json!(temperature);
    }
    if let Some(top_p) = req.top_p {
        payload["top_p"] = json!(top_p);
    }
    if let Some(max_tokens) = req.max_output_tokens {
        payload["max_tokens"] = json!(max_tokens);
    }
    if !req.tools.is_empty() {
        payload["tools"] = Value::Array(req.tools.iter().map(tool_spec_to_wire).collect());
        if let Some(choice) = &req.tool_choice {
            if let Ok(value) = serde_json::to_value(choice) {
                payload["tool_choice"] = value;
            }
        }
    }
    payload
}

fn tool_spec_to_wire(tool: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.json_schema,
            "strict": false,
        }
    })
}

/// Normalize `tool_calls` entries from an assistant message.
///
/// Arguments arrive as a JSON string; unparseable payloads are wrapped as
/// `{"raw": ...}`. Provider-issued ids are kept verbatim; an id is
/// synthesized only when the provider omitted one.
#[doc(hidden)]
pub fn normalize_tool_calls(calls: &[Value]) -> Vec<ToolCall> {
    let mut normalized = Vec::with_capacity(calls.len());
    for call in calls {
        let function = call.get("function").cloned().unwrap_or(Value::Null);
        let name = function
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_owned();
        let arguments = safe_parse_json(function.get("arguments"));
        let id = match call.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_owned(),
            _ => stable_tool_call_id(&name, &arguments, "openai_tool"),
        };
        normalized.push(ToolCall {
            id,
            name,
            arguments,
        });
    }
    normalized
}

/// Normalize the `usage` payload, back-filling the total when absent and
/// clamping it so it is never less than `input + output`.
#[doc(hidden)]
pub fn usage_from_payload(
    payload: &Value,
    latency_ms: u64,
    provider_model: &str,
    estimator: &CostEstimator,
) -> Usage {
    let input_tokens = payload
        .get("prompt_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let output_tokens = payload
        .get("completion_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let computed = input_tokens.saturating_add(output_tokens);
    let total_tokens = payload
        .get("total_tokens")
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

/// Assemble a normalized response from a parsed chat-completions payload.
#[doc(hidden)]
pub fn parse_response(
    request_id: &str,
    provider_model: &str,
    latency_ms: u64,
    data: &Value,
    estimator: &CostEstimator,
    attach_raw: bool,
) -> LLMResponse {
    let choice = data
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .cloned()
        .unwrap_or(Value::Null);
    let message = choice.get("message").cloned().unwrap_or(Value::Null);

    let output_text = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| normalize_tool_calls(calls))
        .unwrap_or_default();
    let usage = usage_from_payload(
        data.get("usage").unwrap_or(&Value::Null),
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
        finish_reason: choice
            .get("finish_reason")
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
impl LlmProvider for OpenAiProvider {
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
        let Some(api_key) = self.settings.credentials.openai_api_key.as_deref() else {
            return Err(GatewayError::unavailable(
                "OPENAI_API_KEY is not configured",
                Some(PROVIDER_NAME.to_owned()),
            ));
        };

        let started = Instant::now();
        let provider_model = self.settings.concrete_model(PROVIDER_NAME, &req.model);
        let payload = build_payload(req, &provider_model);

        let response = self
            .client
            .post(API_BASE)
            .header("authorization", format!("Bearer {api_key}"))
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
