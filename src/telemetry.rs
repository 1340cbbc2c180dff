//! Structured telemetry for gateway attempts.
//!
//! One event is emitted per provider attempt, as JSON through the `tracing`
//! facade. Emission never propagates a failure into the request path, and
//! with no subscriber installed every hook degrades to a no-op. Raw provider
//! payloads are credential-masked before they are attached anywhere.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Tracing target carrying the structured attempt events.
///
/// Subscriber setups route on this: the JSON file sink keeps these events,
/// the human-readable console filters them out (see `logging`).
pub const TELEMETRY_TARGET: &str = "opsgate::telemetry";

/// Attempt outcome recorded on an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The attempt returned a normalized response.
    Success,
    /// The attempt failed with a classified error.
    Error,
}

/// A structured record of one provider attempt.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    /// Correlation id of the request.
    pub request_id: String,
    /// Provider attempted.
    pub provider: String,
    /// Concrete model attempted.
    pub provider_model: String,
    /// Attempt latency in milliseconds.
    pub latency_ms: u64,
    /// Total tokens billed (zero on error).
    pub tokens: u64,
    /// Estimated cost in USD (zero on error).
    pub cost: f64,
    /// Attempt outcome.
    pub outcome: Outcome,
    /// Classified error code, on error outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Attempt counter within the request, starting at 1.
    pub fallback_count: u32,
    /// Character count of the rendered prompt, on success outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_chars: Option<u64>,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Telemetry sink for the router.
#[derive(Debug, Clone)]
pub struct Telemetry {
    debug_raw: bool,
}

impl Telemetry {
    /// Create a sink; `debug_raw` mirrors the settings flag that controls
    /// whether scrubbed raw payloads are attached to responses.
    pub fn new(debug_raw: bool) -> Self {
        Self { debug_raw }
    }

    /// Whether raw payload attachment is enabled.
    pub fn debug_raw(&self) -> bool {
        self.debug_raw
    }

    /// Emit one attempt event as structured JSON.
    ///
    /// Serialization problems are swallowed; telemetry must never fail the
    /// request it describes.
    pub fn emit(&self, event: &TelemetryEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            tracing::info!(target: TELEMETRY_TARGET, event = %payload, "llm attempt");
        }
    }

    /// Span covering one adapter invocation.
    ///
    /// Without a subscriber the span is a no-op and behavior is unchanged.
    pub fn attempt_span(provider: &str, model: &str) -> tracing::Span {
        tracing::info_span!("llm.generate", provider = %provider, model = %model)
    }

    /// Mask credential-like keys (`api_key`, `authorization`, `x-api-key`)
    /// anywhere in a raw provider payload.
    pub fn mask_credentials(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut masked = serde_json::Map::with_capacity(map.len());
                for (key, inner) in map {
                    let lowered = key.to_lowercase();
                    if lowered == "api_key" || lowered == "authorization" || lowered == "x-api-key"
                    {
                        masked.insert(key.clone(), Value::String("***".to_owned()));
                    } else {
                        masked.insert(key.clone(), Self::mask_credentials(inner));
                    }
                }
                Value::Object(masked)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(Self::mask_credentials).collect())
            }
            other => other.clone(),
        }
    }
}
