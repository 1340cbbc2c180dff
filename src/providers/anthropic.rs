//! Anthropic provider adapter using the `/v1/messages` API.
//!
//! System messages are lifted out of the conversation into the top-level
//! `system` field; everything else is forwarded with its canonical role.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::config::GatewaySettings;
use crate::cost::CostEstimator;
use crate::error::GatewayError;
use crate::telemetry::Telemetry;
use crate::types::{LLMRequest, LLMResponse, Role, ToolCall, Usage};

use super::{
    check_http_response, map_reqwest_error, safe_parse_json, stable_tool_call_id, Capabilities,
    LlmProvider,
};

/// Provider name used in settings, telemetry, and error attribution.
pub const PROVIDER_NAME: &str = "anthropic";

const API_BASE: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic messages adapter.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    settings: Arc<GatewaySettings>,
    estimator: Arc<CostEstimator>,
    client: reqwest::Client,
}

impl AnthropicProvider {
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

/// Build the messages-API request payload.
///
/// `max_tokens` is mandatory on this API, so an absent caller value falls
/// back to a conservative default.
#[doc(hidden)]
pub fn build_payload(req: &LLMRequest, model: &str) -> Value {
    let system: Vec<String> = req
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.flattened_text())
        .collect();
    let messages: Vec<Value> = req
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            json!({
                "role": m.role.as_str(),
                "content": m.content.flattened_text(),
            })
        })
        .collect();

    let mut payload = json!({
        "model": model,
        "max_tokens": req.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": messages,
        "system": system.join("\n"),
    });
    if let Some(temperature) = req.temperature {
        payload["temperature"] = json!(temperature);
    }
    if let Some(top_p) = req.top_p {
        payload["top_p"] = json!(top_p);
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.json_schema,
                    "metadata": {"version": tool.version},
                })
            })
            .collect();
        payload["tools"] = Value::Array(tools);
    }
    payload
}

/// Normalize `tool_use` content blocks.
///
/// `input` is already an object; block ids are kept verbatim, with synthesis
/// only for the degenerate case of a missing id.
#[doc(hidden)]
pub fn normalize_tool_calls(content_blocks: &[Value]) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    for block in content_blocks {
        if block.get("type").and_then(Value::as_str) != Some("tool_use") {
            continue;
        }
        let name = block
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_owned();
        let arguments = safe_parse_json(block.get("input"));
        let id = match block.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_owned(),
            _ => stable_tool_call_id(&name, &arguments, "anthropic_tool"),
        };
        calls.push(ToolCall {
            id,
            name,
            arguments,
        });
    }
    calls
}

/// Normalize the `usage` payload; this API never reports a total, so it is
/// always computed.
#[doc(hidden)]
pub fn usage_from_payload(
    payload: &Value,
    latency_ms: u64,
    provider_model: &str,
    estimator: &CostEstimator,
) -> Usage {
    let input_tokens = payload
        .get("input_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let output_tokens = payload
        .get("output_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    Usage {
        input_tokens,
        output_tokens,
        total_tokens: input_tokens.saturating_add(output_tokens),
        estimated_cost_usd: estimator.estimate(
            PROVIDER_NAME,
            provider_model,
            input_tokens,
            output_tokens,
        ),
        latency_ms,
    }
}

/// Assemble a normalized response from a parsed messages-API payload.
#[doc(hidden)]
pub fn parse_response(
    request_id: &str,
    provider_model: &str,
    latency_ms: u64,
    data: &Value,
    estimator: &CostEstimator,
    attach_raw: bool,
) -> LLMResponse {
    let empty = Vec::new();
    let content_blocks = data
        .get("content")
        .and_then(Value::as_array)
        .unwrap_or(&empty);
    let output_text: String = content_blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();
    let tool_calls = normalize_tool_calls(content_blocks);
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
        finish_reason: data
            .get("stop_reason")
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
impl LlmProvider for AnthropicProvider {
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
        let Some(api_key) = self.settings.credentials.anthropic_api_key.as_deref() else {
            return Err(GatewayError::unavailable(
                "ANTHROPIC_API_KEY is not configured",
                Some(PROVIDER_NAME.to_owned()),
            ));
        };

        let started = Instant::now();
        let provider_model = self.settings.concrete_model(PROVIDER_NAME, &req.model);
        let payload = build_payload(req, &provider_model);

        let response = self
            .client
            .post(API_BASE)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
