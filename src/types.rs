//! Canonical request/response types shared by the router and all provider
//! adapters.
//!
//! Provider-specific wire shapes never leave the adapter that produced them;
//! everything crossing a module boundary is expressed in these types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Conversation participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction.
    System,
    /// Human user message.
    User,
    /// Assistant (LLM) message.
    Assistant,
    /// Tool result message.
    Tool,
}

impl Role {
    /// Lowercase wire name for this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A single structured content part.
///
/// The payloads are mutually exclusive: a part is either text or an image
/// reference, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// Reference to an image by URL.
    ImageUrl {
        /// The image URL.
        image_url: String,
    },
}

/// The content of a message: a plain string or an ordered part sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// Structured content parts.
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Flatten the content to plain text.
    ///
    /// Text parts are joined with newlines; image parts render as
    /// `[image:{url}]` markers so downstream accounting still sees them.
    pub fn flattened_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => text.clone(),
                    ContentPart::ImageUrl { image_url } => format!("[image:{image_url}]"),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Total character count of the rendered content.
    pub fn char_count(&self) -> usize {
        self.flattened_text().chars().count()
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Message {
    /// The role of the message author.
    pub role: Role,
    /// Message content.
    pub content: MessageContent,
    /// Optional author name (forwarded where the provider supports it).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Identifier of the tool call this message answers, for `tool` roles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Convenience constructor for a plain-text message.
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
            name: None,
            tool_call_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// A tool (function-call) schema offered to the model.
///
/// The `json_schema` body is opaque to the gateway except for its serialized
/// size, which the policy engine bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolSpec {
    /// Tool name as the model will call it.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema object for the tool's parameters.
    pub json_schema: Value,
    /// Schema version tag.
    #[serde(default = "default_tool_version")]
    pub version: String,
}

fn default_tool_version() -> String {
    "v1".to_owned()
}

/// A normalized tool call extracted from a provider response.
///
/// `arguments` is always a JSON object regardless of how the provider
/// transmitted it; malformed payloads are wrapped rather than dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCall {
    /// Call identifier, provider-issued or deterministically synthesized.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Decoded arguments object.
    pub arguments: Value,
}

/// How the model may choose tools for a request.
///
/// On the wire this is either the string `"auto"` / `"none"` or a
/// provider-directed object, so serialization is written by hand rather than
/// derived.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolChoice {
    /// The model decides whether to call a tool.
    Auto,
    /// Tool calling is disabled for this request.
    None,
    /// Provider-directed choice object, forwarded verbatim.
    Directed(Value),
}

impl Serialize for ToolChoice {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Auto => serializer.serialize_str("auto"),
            Self::None => serializer.serialize_str("none"),
            Self::Directed(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ToolChoice {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        match Value::deserialize(deserializer)? {
            Value::String(s) if s == "auto" => Ok(Self::Auto),
            Value::String(s) if s == "none" => Ok(Self::None),
            Value::String(s) => Err(D::Error::custom(format!(
                "unknown tool choice '{s}', expected \"auto\", \"none\", or an object"
            ))),
            directed @ Value::Object(_) => Ok(Self::Directed(directed)),
            _ => Err(D::Error::custom(
                "tool choice must be a string or an object",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Accounting
// ---------------------------------------------------------------------------

/// Token and cost accounting for a single completed attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Usage {
    /// Tokens consumed by the prompt.
    #[serde(default)]
    pub input_tokens: u64,
    /// Tokens generated in the response.
    #[serde(default)]
    pub output_tokens: u64,
    /// Total billed tokens; never less than `input + output`.
    #[serde(default)]
    pub total_tokens: u64,
    /// Estimated cost in USD (estimation only, not settlement).
    #[serde(default)]
    pub estimated_cost_usd: f64,
    /// Adapter-measured wall time in milliseconds.
    #[serde(default)]
    pub latency_ms: u64,
}

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// A logical request to the gateway.
///
/// `model` names a logical tier (`fast` / `balanced` / `reasoning`); the
/// selected adapter resolves it to a concrete provider model id. Requests
/// with `stream` set must be consumed through the streaming API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LLMRequest {
    /// Caller-supplied correlation id, echoed on the response.
    pub request_id: String,
    /// Optional conversation grouping id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Conversation history, oldest first. Must be non-empty.
    pub messages: Vec<Message>,
    /// Logical model tier, or a concrete model id passed through unchanged.
    pub model: String,
    /// Cap on generated tokens for this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Tools offered to the model for this request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    /// Tool choice directive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Whether the caller will consume this request via the streaming API.
    #[serde(default)]
    pub stream: bool,
    /// Policy metadata (`cacheable`, `scenario`, ...).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

impl LLMRequest {
    /// Build a request with a generated UUID request id and defaults for all
    /// optional fields.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            conversation_id: None,
            messages,
            model: model.into(),
            max_output_tokens: None,
            temperature: None,
            top_p: None,
            tools: Vec::new(),
            tool_choice: None,
            stream: false,
            metadata: serde_json::Map::new(),
        }
    }

    /// Value of a boolean metadata flag, defaulting to false.
    pub fn metadata_flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The `scenario` metadata string, when present.
    pub fn scenario(&self) -> Option<&str> {
        self.metadata.get("scenario").and_then(Value::as_str)
    }

    /// Total character count across all message contents.
    pub fn prompt_chars(&self) -> usize {
        self.messages
            .iter()
            .map(|m| m.content.char_count())
            .fold(0, usize::saturating_add)
    }
}

/// A normalized response from the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LLMResponse {
    /// The request id this response answers.
    pub request_id: String,
    /// Resolved provider name (`openai`, `anthropic`, `gemini`).
    pub provider: String,
    /// Concrete model id that served the response.
    pub provider_model: String,
    /// Concatenated output text.
    pub output_text: String,
    /// Normalized tool calls, in emission order.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Token, cost, and latency accounting.
    pub usage: Usage,
    /// Provider-reported finish reason, forwarded verbatim.
    pub finish_reason: String,
    /// Raw provider payload; attached only in debug mode, credential-scrubbed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

/// One chunk of a streaming response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LLMResponseChunk {
    /// Incremental output text.
    #[serde(default)]
    pub delta_text: String,
    /// Tool calls completed in this chunk.
    #[serde(default)]
    pub delta_tool_calls: Vec<ToolCall>,
    /// Whether this is the final chunk of the stream.
    #[serde(default)]
    pub is_final: bool,
    /// Partial usage accounting, when the provider reports it mid-stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_partial: Option<Usage>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
