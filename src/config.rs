//! Gateway configuration loading.
//!
//! Settings come from an optional TOML file (`./opsgate.toml` or
//! `$OPSGATE_CONFIG_PATH`) with environment-variable overrides on top.
//! Precedence: env vars > config file > defaults. A `.env` file is honored
//! when present. Settings are immutable once constructed.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cost::PricingTable;
use crate::policy::PolicyConfig;
use crate::secrets::{EnvSecretStore, SecretStore};

/// Logical tier to concrete model id, per provider.
pub type ModelMapping = BTreeMap<String, BTreeMap<String, String>>;

/// Built-in logical-tier mapping for the three supported providers.
pub fn default_model_mapping() -> ModelMapping {
    let tier = |fast: &str, balanced: &str, reasoning: &str| {
        BTreeMap::from([
            ("fast".to_owned(), fast.to_owned()),
            ("balanced".to_owned(), balanced.to_owned()),
            ("reasoning".to_owned(), reasoning.to_owned()),
        ])
    };
    BTreeMap::from([
        (
            "openai".to_owned(),
            tier("gpt-4o-mini", "gpt-4.1-mini", "o3-mini"),
        ),
        (
            "anthropic".to_owned(),
            tier(
                "claude-3-5-haiku-latest",
                "claude-3-5-sonnet-latest",
                "claude-3-7-sonnet-latest",
            ),
        ),
        (
            "gemini".to_owned(),
            tier("gemini-2.0-flash", "gemini-1.5-pro", "gemini-1.5-pro"),
        ),
    ])
}

// ── Credentials ─────────────────────────────────────────────────

/// Per-provider credential material.
///
/// Gemini accepts either a Google API key or a Vertex project/location pair.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderCredentials {
    /// OpenAI API key.
    pub openai_api_key: Option<String>,
    /// Anthropic API key.
    pub anthropic_api_key: Option<String>,
    /// Google Generative Language API key.
    pub google_api_key: Option<String>,
    /// Vertex AI project id.
    pub vertex_project: Option<String>,
    /// Vertex AI location.
    pub vertex_location: Option<String>,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "__REDACTED__"),
            )
            .field(
                "anthropic_api_key",
                &self.anthropic_api_key.as_ref().map(|_| "__REDACTED__"),
            )
            .field(
                "google_api_key",
                &self.google_api_key.as_ref().map(|_| "__REDACTED__"),
            )
            .field("vertex_project", &self.vertex_project)
            .field("vertex_location", &self.vertex_location)
            .finish()
    }
}

// ── File config ─────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct GatewaySection {
    providers_enabled: Vec<String>,
    default_provider: String,
    request_timeout_ms: u64,
    max_retries: u32,
    max_cost_usd_per_request: f64,
    max_tokens_per_request: u64,
    debug_raw_responses: bool,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            providers_enabled: vec![
                "openai".to_owned(),
                "anthropic".to_owned(),
                "gemini".to_owned(),
            ],
            default_provider: "gemini".to_owned(),
            request_timeout_ms: 30_000,
            max_retries: 2,
            max_cost_usd_per_request: 1.0,
            max_tokens_per_request: 32_000,
            debug_raw_responses: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct GatewayConfigFile {
    gateway: GatewaySection,
    credentials: ProviderCredentials,
    /// Full replacement for the logical-tier mapping; empty means defaults.
    models: ModelMapping,
    /// Per-key pricing override merged over the built-in table.
    pricing: PricingTable,
    policy: PolicyConfig,
}

// ── Settings ────────────────────────────────────────────────────

/// Process-wide gateway settings, immutable after construction.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Enabled providers, in configured order.
    pub providers_enabled: Vec<String>,
    /// Provider tried first when enabled.
    pub default_provider: String,
    /// Credential material.
    pub credentials: ProviderCredentials,
    /// Per-attempt deadline in milliseconds.
    pub request_timeout_ms: u64,
    /// Cap on fallback candidates beyond the first attempt.
    pub max_retries: u32,
    /// Per-request estimated-cost ceiling in USD.
    pub max_cost_usd_per_request: f64,
    /// Per-request total-token ceiling.
    pub max_tokens_per_request: u64,
    /// Logical tier to concrete model mapping.
    pub model_mapping: ModelMapping,
    /// Operator pricing override.
    pub pricing_override: PricingTable,
    /// Whether scrubbed raw provider payloads are attached to responses.
    pub debug_raw_responses: bool,
    /// Policy engine configuration.
    pub policy: PolicyConfig,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self::from_file_config(GatewayConfigFile::default())
    }
}

impl GatewaySettings {
    /// Load settings with precedence env vars > TOML file > defaults.
    ///
    /// Config file path: `$OPSGATE_CONFIG_PATH` or `./opsgate.toml`; a
    /// missing file falls back to defaults. A `.env` file is loaded first
    /// when present.
    ///
    /// # Errors
    ///
    /// Returns an error when the config file exists but cannot be read or
    /// parsed.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut settings = Self::load_from_file()?;
        settings.apply_overrides(&EnvSecretStore);
        Ok(settings)
    }

    /// Parse settings from a TOML string, no env overrides (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error when the TOML does not parse.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let file: GatewayConfigFile =
            toml::from_str(toml_str).context("failed to parse gateway config TOML")?;
        Ok(Self::from_file_config(file))
    }

    fn load_from_file() -> Result<Self> {
        let path = Self::config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading gateway config from file");
                Self::from_toml(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no gateway config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read gateway config file: {e}")),
        }
    }

    fn config_path() -> PathBuf {
        match std::env::var("OPSGATE_CONFIG_PATH") {
            Ok(p) => PathBuf::from(p),
            Err(_) => PathBuf::from("opsgate.toml"),
        }
    }

    fn from_file_config(file: GatewayConfigFile) -> Self {
        let model_mapping = if file.models.is_empty() {
            default_model_mapping()
        } else {
            file.models
        };
        Self {
            providers_enabled: file.gateway.providers_enabled,
            default_provider: file.gateway.default_provider,
            credentials: file.credentials,
            request_timeout_ms: file.gateway.request_timeout_ms,
            max_retries: file.gateway.max_retries,
            max_cost_usd_per_request: file.gateway.max_cost_usd_per_request,
            max_tokens_per_request: file.gateway.max_tokens_per_request,
            model_mapping,
            pricing_override: file.pricing,
            debug_raw_responses: file.gateway.debug_raw_responses,
            policy: file.policy,
        }
    }

    /// Apply overrides from a secret/environment store (env > file > defaults).
    ///
    /// Invalid numeric or JSON values are logged and ignored rather than
    /// failing the load.
    pub fn apply_overrides(&mut self, store: &dyn SecretStore) {
        if let Some(v) = store.get_secret("LLM_PROVIDERS_ENABLED") {
            let providers: Vec<String> = v
                .split(',')
                .map(|p| p.trim().to_owned())
                .filter(|p| !p.is_empty())
                .collect();
            if !providers.is_empty() {
                self.providers_enabled = providers;
            }
        }
        if let Some(v) = store.get_secret("LLM_DEFAULT_PROVIDER") {
            self.default_provider = v;
        }

        // Credentials.
        if let Some(v) = store.get_secret("OPENAI_API_KEY") {
            self.credentials.openai_api_key = Some(v);
        }
        if let Some(v) = store.get_secret("ANTHROPIC_API_KEY") {
            self.credentials.anthropic_api_key = Some(v);
        }
        if let Some(v) = store.get_secret("GOOGLE_API_KEY") {
            self.credentials.google_api_key = Some(v);
        }
        if let Some(v) = store.get_secret("VERTEX_PROJECT") {
            self.credentials.vertex_project = Some(v);
        }
        if let Some(v) = store.get_secret("VERTEX_LOCATION") {
            self.credentials.vertex_location = Some(v);
        }

        // Budgets and deadlines.
        if let Some(v) = store.get_secret("REQUEST_TIMEOUT_MS") {
            match v.parse() {
                Ok(n) => self.request_timeout_ms = n,
                Err(_) => warn_invalid("REQUEST_TIMEOUT_MS", &v),
            }
        }
        if let Some(v) = store.get_secret("MAX_RETRIES") {
            match v.parse() {
                Ok(n) => self.max_retries = n,
                Err(_) => warn_invalid("MAX_RETRIES", &v),
            }
        }
        if let Some(v) = store.get_secret("MAX_COST_USD_PER_REQUEST") {
            match v.parse() {
                Ok(n) => self.max_cost_usd_per_request = n,
                Err(_) => warn_invalid("MAX_COST_USD_PER_REQUEST", &v),
            }
        }
        if let Some(v) = store.get_secret("MAX_TOKENS_PER_REQUEST") {
            match v.parse() {
                Ok(n) => self.max_tokens_per_request = n,
                Err(_) => warn_invalid("MAX_TOKENS_PER_REQUEST", &v),
            }
        }

        // JSON blob overrides.
        if let Some(v) = store.get_secret("LLM_MODEL_MAPPING_JSON") {
            match serde_json::from_str::<ModelMapping>(&v) {
                Ok(mapping) => self.model_mapping = mapping,
                Err(_) => warn_invalid("LLM_MODEL_MAPPING_JSON", &v),
            }
        }
        if let Some(v) = store.get_secret("LLM_PRICING_JSON") {
            match serde_json::from_str::<PricingTable>(&v) {
                Ok(pricing) => self.pricing_override = pricing,
                Err(_) => warn_invalid("LLM_PRICING_JSON", &v),
            }
        }

        if let Some(v) = store.get_secret("LLM_DEBUG_RAW_RESPONSES") {
            self.debug_raw_responses = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Resolve a logical model tier to the provider's concrete model id.
    ///
    /// Unknown tiers pass through unchanged so callers may name concrete
    /// models directly.
    pub fn concrete_model(&self, provider: &str, logical_model: &str) -> String {
        self.model_mapping
            .get(provider)
            .and_then(|tiers| tiers.get(logical_model))
            .cloned()
            .unwrap_or_else(|| logical_model.to_owned())
    }
}

fn warn_invalid(var: &str, value: &str) {
    tracing::warn!(var, value = %value, "ignoring invalid env override");
}

// ── Tests ───────────────────────────────────────────────────────
