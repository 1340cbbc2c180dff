//! Shared stub providers and fixtures for the integration suite.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use opsgate::config::GatewaySettings;
use opsgate::error::GatewayError;
use opsgate::providers::{Capabilities, ChunkReceiver, LlmProvider};
use opsgate::types::{LLMRequest, LLMResponse, LLMResponseChunk, Message, Role, Usage};
use tokio::sync::mpsc;

/// Settings with the given enabled list and default provider, defaults
/// otherwise.
pub fn settings(enabled: &[&str], default: &str) -> GatewaySettings {
    let mut settings = GatewaySettings::default();
    settings.providers_enabled = enabled.iter().map(|p| (*p).to_owned()).collect();
    settings.default_provider = default.to_owned();
    settings
}

/// A plain single-message user request for the `fast` tier.
pub fn user_request(text: &str) -> LLMRequest {
    LLMRequest::new("fast", vec![Message::text(Role::User, text)])
}

/// What a [`StubProvider`] does when invoked.
#[derive(Clone)]
pub enum StubBehavior {
    /// Return a canned success with the given usage totals.
    Succeed {
        /// Total tokens reported.
        total_tokens: u64,
        /// Estimated cost reported.
        cost: f64,
    },
    /// Return the given error.
    Fail(GatewayError),
}

/// Scripted non-streaming provider that counts invocations.
pub struct StubProvider {
    name: String,
    behavior: StubBehavior,
    /// Invocation counter.
    pub calls: Arc<AtomicUsize>,
}

impl StubProvider {
    /// A stub that always succeeds with nominal usage.
    pub fn ok(name: &str) -> Self {
        Self::with_behavior(
            name,
            StubBehavior::Succeed {
                total_tokens: 20,
                cost: 0.01,
            },
        )
    }

    /// A stub that always fails with the given error.
    pub fn failing(name: &str, err: GatewayError) -> Self {
        Self::with_behavior(name, StubBehavior::Fail(err))
    }

    /// A stub with an explicit scripted behavior.
    pub fn with_behavior(name: &str, behavior: StubBehavior) -> Self {
        Self {
            name: name.to_owned(),
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// How many times `generate` was invoked.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for StubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_tools: true,
            supports_streaming: false,
            supports_vision: false,
        }
    }

    async fn generate(&self, req: &LLMRequest) -> Result<LLMResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            StubBehavior::Fail(err) => Err(err.clone()),
            StubBehavior::Succeed { total_tokens, cost } => Ok(LLMResponse {
                request_id: req.request_id.clone(),
                provider: self.name.clone(),
                provider_model: format!("{}-fast", self.name),
                output_text: format!("ok-{}", self.name),
                tool_calls: vec![],
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 10,
                    total_tokens: *total_tokens,
                    estimated_cost_usd: *cost,
                    latency_ms: 12,
                },
                finish_reason: "stop".to_owned(),
                raw: None,
            }),
        }
    }
}

/// Scripted streaming provider.
pub struct StreamStubProvider {
    name: String,
    /// Error returned before any chunk, when set.
    start_error: Option<GatewayError>,
    /// Items pushed through the stream once started.
    items: Vec<Result<LLMResponseChunk, GatewayError>>,
    /// Invocation counter.
    pub calls: Arc<AtomicUsize>,
}

impl StreamStubProvider {
    /// A stub whose stream yields the given items in order.
    pub fn chunks(name: &str, items: Vec<Result<LLMResponseChunk, GatewayError>>) -> Self {
        Self {
            name: name.to_owned(),
            start_error: None,
            items,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A stub whose stream refuses to start with the given error.
    pub fn refusing(name: &str, err: GatewayError) -> Self {
        Self {
            name: name.to_owned(),
            start_error: Some(err),
            items: vec![],
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// How many times `stream` was invoked.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for StreamStubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_tools: true,
            supports_streaming: true,
            supports_vision: false,
        }
    }

    async fn generate(&self, _req: &LLMRequest) -> Result<LLMResponse, GatewayError> {
        Err(GatewayError::unavailable(
            "stream-only stub",
            Some(self.name.clone()),
        ))
    }

    async fn stream(&self, _req: &LLMRequest) -> Result<ChunkReceiver, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.start_error {
            return Err(err.clone());
        }
        let (tx, rx) = mpsc::channel(16);
        let items = self.items.clone();
        tokio::spawn(async move {
            for item in items {
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

/// A text chunk.
pub fn chunk(text: &str, is_final: bool) -> LLMResponseChunk {
    LLMResponseChunk {
        delta_text: text.to_owned(),
        delta_tool_calls: vec![],
        is_final,
        usage_partial: None,
    }
}
