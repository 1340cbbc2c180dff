//! Request router: candidate ordering, fallback, budgets, caching, and
//! telemetry orchestration.
//!
//! Candidates are tried strictly sequentially; the gateway never fans a
//! request out to multiple providers, so a request is billed at most once
//! per attempt and rate limits stay isolated per provider.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use crate::cache::ResponseCache;
use crate::config::GatewaySettings;
use crate::cost::CostEstimator;
use crate::error::GatewayError;
use crate::policy::PolicyEngine;
use crate::providers::anthropic::AnthropicProvider;
use crate::providers::gemini::GeminiProvider;
use crate::providers::openai::OpenAiProvider;
use crate::providers::LlmProvider;
use crate::telemetry::{Outcome, Telemetry, TelemetryEvent};
use crate::types::{LLMRequest, LLMResponse, LLMResponseChunk};

/// Bounded sample count per provider latency window.
pub const LATENCY_WINDOW_SAMPLES: usize = 50;
/// A provider is skipped when its rolling p95 exceeds this percentage of the
/// request timeout.
const LATENCY_SKIP_PCT: u64 = 80;

// ---------------------------------------------------------------------------
// Latency tracking
// ---------------------------------------------------------------------------

/// Per-provider rolling latency windows.
///
/// Uses a sync [`Mutex`] since record and quantile reads are short and
/// contain no awaits. Quantile reads take a snapshot; exact coherence with
/// concurrent writers is not required.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    windows: Mutex<HashMap<String, VecDeque<u64>>>,
}

impl LatencyTracker {
    /// Append a successful-attempt latency sample, evicting the oldest once
    /// the window is full.
    pub fn record(&self, provider: &str, latency_ms: u64) {
        if let Ok(mut windows) = self.windows.lock() {
            let window = windows.entry(provider.to_owned()).or_default();
            window.push_back(latency_ms);
            while window.len() > LATENCY_WINDOW_SAMPLES {
                window.pop_front();
            }
        }
    }

    /// Rolling p95 over the provider's window.
    ///
    /// Returns 0 with no samples and the sole sample with fewer than two,
    /// so cold providers are never penalized.
    pub fn p95(&self, provider: &str) -> u64 {
        let samples: Vec<u64> = match self.windows.lock() {
            Ok(windows) => windows
                .get(provider)
                .map(|w| w.iter().copied().collect())
                .unwrap_or_default(),
            Err(_) => return 0,
        };
        if samples.is_empty() {
            return 0;
        }
        if samples.len() < 2 {
            return samples[0];
        }
        let mut sorted = samples;
        sorted.sort_unstable();
        let rank = (sorted.len().saturating_mul(95) / 100).min(sorted.len().saturating_sub(1));
        sorted.get(rank).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Routes logical requests across the enabled provider adapters.
pub struct LlmRouter {
    settings: Arc<GatewaySettings>,
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    policy: PolicyEngine,
    telemetry: Telemetry,
    cache: ResponseCache,
    latency: LatencyTracker,
}

impl LlmRouter {
    /// Build a router with the three built-in adapters.
    pub fn from_settings(settings: GatewaySettings) -> Self {
        let settings = Arc::new(settings);
        let estimator = Arc::new(CostEstimator::new(&settings.pricing_override));
        let providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::from([
            (
                "openai".to_owned(),
                Arc::new(OpenAiProvider::new(
                    Arc::clone(&settings),
                    Arc::clone(&estimator),
                )) as Arc<dyn LlmProvider>,
            ),
            (
                "anthropic".to_owned(),
                Arc::new(AnthropicProvider::new(
                    Arc::clone(&settings),
                    Arc::clone(&estimator),
                )) as Arc<dyn LlmProvider>,
            ),
            (
                "gemini".to_owned(),
                Arc::new(GeminiProvider::new(Arc::clone(&settings), estimator))
                    as Arc<dyn LlmProvider>,
            ),
        ]);
        Self::assemble(settings, providers)
    }

    /// Build a router over a custom adapter set.
    ///
    /// Adding a provider is purely additive: the router only consults the
    /// map and the enabled list.
    pub fn with_providers(
        settings: GatewaySettings,
        providers: HashMap<String, Arc<dyn LlmProvider>>,
    ) -> Self {
        Self::assemble(Arc::new(settings), providers)
    }

    fn assemble(
        settings: Arc<GatewaySettings>,
        providers: HashMap<String, Arc<dyn LlmProvider>>,
    ) -> Self {
        let policy = PolicyEngine::new(settings.policy.clone());
        let telemetry = Telemetry::new(settings.debug_raw_responses);
        Self {
            settings,
            providers,
            policy,
            telemetry,
            cache: ResponseCache::default(),
            latency: LatencyTracker::default(),
        }
    }

    /// Registered provider names, sorted.
    pub fn available_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Rolling latency windows (exposed for ordering diagnostics and tests).
    pub fn latency(&self) -> &LatencyTracker {
        &self.latency
    }

    // ── Candidate selection ─────────────────────────────────────

    /// Candidate order for one request: enabled providers with a registered
    /// adapter, the configured default first (stable), then ascending rolling
    /// p95, truncated to `max_retries + 1` candidates.
    ///
    /// # Errors
    ///
    /// Returns *provider-unavailable* when no enabled provider is registered.
    fn candidate_order(&self) -> Result<Vec<String>, GatewayError> {
        let mut candidates: Vec<String> = self
            .settings
            .providers_enabled
            .iter()
            .filter(|name| self.providers.contains_key(*name))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(GatewayError::unavailable("no providers are enabled", None));
        }
        candidates.sort_by_key(|name| {
            let default_rank = u8::from(*name != self.settings.default_provider);
            (default_rank, self.latency.p95(name))
        });
        let limit = usize::try_from(self.settings.max_retries)
            .unwrap_or(usize::MAX)
            .saturating_add(1);
        candidates.truncate(limit);
        Ok(candidates)
    }

    fn should_skip_for_latency(&self, provider: &str) -> bool {
        let threshold = self
            .settings
            .request_timeout_ms
            .saturating_mul(LATENCY_SKIP_PCT)
            / 100;
        self.latency.p95(provider) > threshold
    }

    // ── Budgets ─────────────────────────────────────────────────

    fn enforce_budget_pre(&self, req: &LLMRequest) -> Result<(), GatewayError> {
        if let Some(requested) = req.max_output_tokens {
            if u64::from(requested) > self.settings.max_tokens_per_request {
                return Err(GatewayError::budget_exceeded(
                    "requested max_output_tokens exceeds policy",
                    None,
                ));
            }
        }
        Ok(())
    }

    fn enforce_budget_post(&self, res: &LLMResponse) -> Result<(), GatewayError> {
        if res.usage.total_tokens > self.settings.max_tokens_per_request {
            return Err(GatewayError::budget_exceeded(
                "response token usage exceeds policy",
                Some(res.provider.clone()),
            ));
        }
        if res.usage.estimated_cost_usd > self.settings.max_cost_usd_per_request {
            return Err(GatewayError::budget_exceeded(
                "response estimated cost exceeds policy",
                Some(res.provider.clone()),
            ));
        }
        Ok(())
    }

    // ── Generate ────────────────────────────────────────────────

    /// Run a non-streaming request through policy, budgets, caching, and the
    /// candidate loop.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, a *budget-exceeded* violation,
    /// or — after exhausting candidates — the last retryable error seen
    /// (*provider-unavailable* when none was captured).
    pub async fn generate(&self, req: LLMRequest) -> Result<LLMResponse, GatewayError> {
        if req.messages.is_empty() {
            return Err(GatewayError::bad_request("messages must not be empty"));
        }
        if req.stream {
            return Err(GatewayError::bad_request(
                "streaming requests must be consumed via the stream API",
            ));
        }
        let req = self.policy.enforce(req)?;
        self.enforce_budget_pre(&req)?;

        let cacheable = ResponseCache::is_cacheable(&req);
        let mut attempt: u32 = 0;
        let mut last_error: Option<GatewayError> = None;

        for provider_name in self.candidate_order()? {
            let Some(provider) = self.providers.get(&provider_name).cloned() else {
                continue;
            };
            if self.should_skip_for_latency(&provider_name) {
                tracing::debug!(provider = %provider_name, "skipping provider: rolling p95 over threshold");
                continue;
            }
            let provider_model = self.settings.concrete_model(&provider_name, &req.model);

            if cacheable {
                if let Some(hit) = self.cache.get(&provider_name, &provider_model, &req) {
                    tracing::debug!(provider = %provider_name, "cache hit");
                    return Ok(hit);
                }
            }

            attempt = attempt.saturating_add(1);
            let started = Instant::now();
            let span = Telemetry::attempt_span(&provider_name, &provider_model);
            let deadline = Duration::from_millis(self.settings.request_timeout_ms);
            let result = match tokio::time::timeout(
                deadline,
                provider.generate(&req).instrument(span),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(GatewayError::timeout(
                    "provider call exceeded deadline",
                    Some(provider_name.clone()),
                )),
            };
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(response) => {
                    self.latency.record(&provider_name, elapsed_ms);
                    if let Err(budget_err) = self.enforce_budget_post(&response) {
                        // The response is discarded: never cached, no
                        // success event.
                        self.emit_error(
                            &req,
                            &provider_name,
                            &provider_model,
                            elapsed_ms,
                            &budget_err,
                            attempt,
                        );
                        return Err(budget_err);
                    }
                    if cacheable {
                        self.cache.set(&provider_name, &provider_model, &req, &response);
                    }
                    self.emit_success(&req, &response, attempt);
                    return Ok(response);
                }
                Err(err) => {
                    self.emit_error(
                        &req,
                        &provider_name,
                        &provider_model,
                        elapsed_ms,
                        &err,
                        attempt,
                    );
                    tracing::warn!(
                        provider = %provider_name,
                        code = err.code(),
                        detail = %self.policy.redact_pii(err.message()),
                        "provider attempt failed"
                    );
                    if !err.retryable() {
                        return Err(err);
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| GatewayError::unavailable("no provider succeeded", None)))
    }

    // ── Stream ──────────────────────────────────────────────────

    /// Run a streaming request through the same policy, budget, and ordering
    /// rules, yielding chunks from the first provider that produces any.
    ///
    /// A retryable failure before the first chunk advances to the next
    /// candidate; a mid-stream terminal error is forwarded after the chunks
    /// already delivered (the caller is responsible for dropping partials).
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error or — after exhausting
    /// candidates — the last retryable error seen.
    pub async fn stream(
        &self,
        req: LLMRequest,
    ) -> Result<ReceiverStream<Result<LLMResponseChunk, GatewayError>>, GatewayError> {
        if req.messages.is_empty() {
            return Err(GatewayError::bad_request("messages must not be empty"));
        }
        let req = self.policy.enforce(req)?;
        self.enforce_budget_pre(&req)?;

        let mut last_error: Option<GatewayError> = None;

        for provider_name in self.candidate_order()? {
            let Some(provider) = self.providers.get(&provider_name).cloned() else {
                continue;
            };
            if !provider.capabilities().supports_streaming {
                continue;
            }
            if self.should_skip_for_latency(&provider_name) {
                tracing::debug!(provider = %provider_name, "skipping provider: rolling p95 over threshold");
                continue;
            }

            let mut upstream = match provider.stream(&req).await {
                Ok(receiver) => receiver,
                Err(err) => {
                    if !err.retryable() {
                        return Err(err);
                    }
                    last_error = Some(err);
                    continue;
                }
            };

            // The provider is committed only once it produces a chunk.
            match upstream.recv().await {
                Some(Ok(first)) => {
                    let (tx, rx) = mpsc::channel(32);
                    tokio::spawn(async move {
                        if tx.send(Ok(first)).await.is_err() {
                            return;
                        }
                        while let Some(item) = upstream.recv().await {
                            let terminal = item.is_err();
                            if tx.send(item).await.is_err() || terminal {
                                return;
                            }
                        }
                    });
                    return Ok(ReceiverStream::new(rx));
                }
                Some(Err(err)) => {
                    if !err.retryable() {
                        return Err(err);
                    }
                    last_error = Some(err);
                }
                None => {
                    last_error = Some(GatewayError::unavailable(
                        "stream ended without producing chunks",
                        Some(provider_name.clone()),
                    ));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GatewayError::unavailable("no provider could stream this request", None)
        }))
    }

    // ── Telemetry ───────────────────────────────────────────────

    fn emit_success(&self, req: &LLMRequest, res: &LLMResponse, attempt: u32) {
        self.telemetry.emit(&TelemetryEvent {
            request_id: req.request_id.clone(),
            provider: res.provider.clone(),
            provider_model: res.provider_model.clone(),
            latency_ms: res.usage.latency_ms,
            tokens: res.usage.total_tokens,
            cost: res.usage.estimated_cost_usd,
            outcome: Outcome::Success,
            error_code: None,
            fallback_count: attempt,
            prompt_chars: Some(u64::try_from(req.prompt_chars()).unwrap_or(u64::MAX)),
            timestamp: chrono::Utc::now(),
        });
    }

    fn emit_error(
        &self,
        req: &LLMRequest,
        provider: &str,
        provider_model: &str,
        latency_ms: u64,
        err: &GatewayError,
        attempt: u32,
    ) {
        self.telemetry.emit(&TelemetryEvent {
            request_id: req.request_id.clone(),
            provider: provider.to_owned(),
            provider_model: provider_model.to_owned(),
            latency_ms,
            tokens: 0,
            cost: 0.0,
            outcome: Outcome::Error,
            error_code: Some(err.code().to_owned()),
            fallback_count: attempt,
            prompt_chars: None,
            timestamp: chrono::Utc::now(),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
