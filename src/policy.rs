//! Request policy enforcement: tool gating and PII redaction.
//!
//! The tool gate runs before any network I/O and mutates the request (the
//! accepted tool list replaces the submitted one). The PII redactor applies
//! only to strings destined for logs and telemetry, never to response bodies
//! returned to the caller.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::Deserialize;

use crate::error::GatewayError;
use crate::types::LLMRequest;

/// Replacement marker for redacted email addresses.
pub const REDACTED_EMAIL: &str = "[REDACTED_EMAIL]";
/// Replacement marker for redacted phone numbers.
pub const REDACTED_PHONE: &str = "[REDACTED_PHONE]";

const EMAIL_PATTERN: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";
const PHONE_PATTERN: &str = r"\+?\d[\d\-\s]{7,}\d";

/// Operator-configured policy rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Per-scenario tool allowlists. An empty or absent list for a scenario
    /// means no allowlist restriction applies.
    pub scenario_tool_allowlist: HashMap<String, HashSet<String>>,
    /// Tool names rejected unconditionally.
    pub denied_tool_names: HashSet<String>,
    /// Ceiling on a tool's serialized `json_schema`, in bytes.
    pub max_tool_schema_bytes: usize,
    /// Whether PII redaction of log-destined text is active.
    pub pii_redaction_enabled: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            scenario_tool_allowlist: HashMap::new(),
            denied_tool_names: HashSet::from(["shell_exec".to_owned(), "delete_all".to_owned()]),
            max_tool_schema_bytes: 64_000,
            pii_redaction_enabled: true,
        }
    }
}

/// Enforces tool policy and redacts PII from log-destined text.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    config: PolicyConfig,
    email_re: Option<Regex>,
    phone_re: Option<Regex>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

impl PolicyEngine {
    /// Create an engine from operator configuration.
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            email_re: Regex::new(EMAIL_PATTERN).ok(),
            phone_re: Regex::new(PHONE_PATTERN).ok(),
        }
    }

    /// Validate and mutate a request before any provider is contacted.
    ///
    /// Each submitted tool is checked against the denylist, the scenario
    /// allowlist (when the request names a scenario that has one), and the
    /// schema size ceiling. Accepted tools replace the request's tool list.
    ///
    /// # Errors
    ///
    /// Returns a non-retryable [`GatewayError::BadRequest`] naming the first
    /// offending tool.
    pub fn enforce(&self, mut req: LLMRequest) -> Result<LLMRequest, GatewayError> {
        let allowlist = req
            .scenario()
            .and_then(|scenario| self.config.scenario_tool_allowlist.get(scenario))
            .filter(|names| !names.is_empty());

        let mut validated = Vec::with_capacity(req.tools.len());
        for tool in req.tools.clone() {
            if self.config.denied_tool_names.contains(&tool.name) {
                return Err(GatewayError::bad_request(format!(
                    "denied tool name: {}",
                    tool.name
                )));
            }
            if let Some(allowed) = allowlist {
                if !allowed.contains(&tool.name) {
                    return Err(GatewayError::bad_request(format!(
                        "tool '{}' not allowlisted for scenario '{}'",
                        tool.name,
                        req.scenario().unwrap_or_default()
                    )));
                }
            }
            let schema_bytes = serde_json::to_string(&tool.json_schema)
                .map(|s| s.len())
                .unwrap_or(usize::MAX);
            if schema_bytes > self.config.max_tool_schema_bytes {
                return Err(GatewayError::bad_request(format!(
                    "tool schema for '{}' exceeds maximum size",
                    tool.name
                )));
            }
            validated.push(tool);
        }
        req.tools = validated;
        Ok(req)
    }

    /// Replace email- and phone-shaped substrings in log-destined text.
    ///
    /// Returns the input unchanged when redaction is disabled.
    pub fn redact_pii(&self, text: &str) -> String {
        if !self.config.pii_redaction_enabled {
            return text.to_owned();
        }
        let mut sanitized = text.to_owned();
        if let Some(re) = &self.email_re {
            sanitized = re.replace_all(&sanitized, REDACTED_EMAIL).into_owned();
        }
        if let Some(re) = &self.phone_re {
            sanitized = re.replace_all(&sanitized, REDACTED_PHONE).into_owned();
        }
        sanitized
    }
}
