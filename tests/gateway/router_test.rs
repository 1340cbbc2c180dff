//! Router behavior: selection, fallback, budgets, caching, and policy.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use opsgate::error::GatewayError;
use opsgate::providers::LlmProvider;
use opsgate::router::LlmRouter;
use opsgate::types::ToolSpec;
use serde_json::{json, Value};

use crate::support::{settings, user_request, StubBehavior, StubProvider};

fn router_with(
    settings: opsgate::config::GatewaySettings,
    stubs: Vec<Arc<StubProvider>>,
) -> LlmRouter {
    let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
    for stub in stubs {
        providers.insert(stub.name().to_owned(), stub as Arc<dyn LlmProvider>);
    }
    LlmRouter::with_providers(settings, providers)
}

// ── Telemetry capture ───────────────────────────────────────────

#[derive(Clone)]
struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut inner) = self.0.lock() {
            inner.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Install a scoped subscriber capturing all log output for inspection.
fn capture_logs() -> (Arc<Mutex<Vec<u8>>>, tracing::subscriber::DefaultGuard) {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let writer_buf = Arc::clone(&buf);
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || SharedWriter(Arc::clone(&writer_buf)))
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (buf, guard)
}

fn captured(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    buf.lock()
        .map(|inner| String::from_utf8_lossy(&inner).into_owned())
        .unwrap_or_default()
}

// ── Selection and fallback ──────────────────────────────────────

#[tokio::test]
async fn default_provider_is_selected_first() {
    let openai = Arc::new(StubProvider::ok("openai"));
    let anthropic = Arc::new(StubProvider::ok("anthropic"));
    let router = router_with(
        settings(&["openai", "anthropic"], "anthropic"),
        vec![Arc::clone(&openai), Arc::clone(&anthropic)],
    );

    let res = router
        .generate(user_request("hi"))
        .await
        .expect("should succeed");
    assert_eq!(res.provider, "anthropic");
    assert_eq!(openai.call_count(), 0);
    assert_eq!(anthropic.call_count(), 1);
}

#[tokio::test]
async fn retryable_error_falls_back_to_next_candidate() {
    let (buf, _guard) = capture_logs();

    let openai = Arc::new(StubProvider::failing(
        "openai",
        GatewayError::classify("openai", "429 too many requests"),
    ));
    let anthropic = Arc::new(StubProvider::ok("anthropic"));
    let router = router_with(
        settings(&["openai", "anthropic"], "openai"),
        vec![Arc::clone(&openai), Arc::clone(&anthropic)],
    );

    let res = router
        .generate(user_request("hi"))
        .await
        .expect("fallback should succeed");
    assert_eq!(res.provider, "anthropic");
    assert_eq!(openai.call_count(), 1);
    assert_eq!(anthropic.call_count(), 1);

    // One error event then one success event, with the attempt counter
    // advancing across them.
    let logs = captured(&buf);
    assert!(logs.contains(r#""outcome":"error""#));
    assert!(logs.contains(r#""outcome":"success""#));
    assert!(logs.contains(r#""fallback_count":1"#));
    assert!(logs.contains(r#""fallback_count":2"#));
}

#[tokio::test]
async fn non_retryable_error_terminates_without_fallback() {
    let openai = Arc::new(StubProvider::failing(
        "openai",
        GatewayError::classify("openai", "Unauthorized"),
    ));
    let anthropic = Arc::new(StubProvider::ok("anthropic"));
    let router = router_with(
        settings(&["openai", "anthropic"], "openai"),
        vec![Arc::clone(&openai), Arc::clone(&anthropic)],
    );

    let err = router
        .generate(user_request("hi"))
        .await
        .expect_err("should fail");
    assert_eq!(err.code(), "auth_error");
    assert_eq!(anthropic.call_count(), 0);
}

#[tokio::test]
async fn exhausted_candidates_surface_last_error() {
    let openai = Arc::new(StubProvider::failing(
        "openai",
        GatewayError::classify("openai", "quota exhausted"),
    ));
    let anthropic = Arc::new(StubProvider::failing(
        "anthropic",
        GatewayError::timeout("deadline", Some("anthropic".to_owned())),
    ));
    let router = router_with(
        settings(&["openai", "anthropic"], "openai"),
        vec![openai, anthropic],
    );

    let err = router
        .generate(user_request("hi"))
        .await
        .expect_err("should fail");
    assert_eq!(err.code(), "timeout");
}

#[tokio::test]
async fn candidate_order_prefers_lower_p95_after_default() {
    let gemini = Arc::new(StubProvider::failing(
        "gemini",
        GatewayError::classify("gemini", "rate limited"),
    ));
    let openai = Arc::new(StubProvider::ok("openai"));
    let anthropic = Arc::new(StubProvider::ok("anthropic"));
    let router = router_with(
        settings(&["openai", "anthropic", "gemini"], "gemini"),
        vec![Arc::clone(&gemini), Arc::clone(&openai), Arc::clone(&anthropic)],
    );

    // openai is measurably slower than anthropic.
    router.latency().record("openai", 100);
    router.latency().record("anthropic", 10);

    let res = router
        .generate(user_request("hi"))
        .await
        .expect("should succeed");
    assert_eq!(gemini.call_count(), 1);
    assert_eq!(res.provider, "anthropic");
    assert_eq!(openai.call_count(), 0);
}

#[tokio::test]
async fn slow_provider_is_circuit_broken() {
    let openai = Arc::new(StubProvider::ok("openai"));
    let mut cfg = settings(&["openai"], "openai");
    cfg.request_timeout_ms = 100;
    let router = router_with(cfg, vec![Arc::clone(&openai)]);

    // p95 of 200ms exceeds 80% of the 100ms timeout.
    router.latency().record("openai", 200);
    router.latency().record("openai", 200);

    let err = router
        .generate(user_request("hi"))
        .await
        .expect_err("should shed");
    assert_eq!(err.code(), "provider_unavailable");
    assert_eq!(openai.call_count(), 0);
}

#[tokio::test]
async fn max_retries_caps_candidate_count() {
    let rate_limited = |name: &str| {
        Arc::new(StubProvider::failing(
            name,
            GatewayError::classify(name, "429"),
        ))
    };
    let openai = rate_limited("openai");
    let anthropic = rate_limited("anthropic");
    let gemini = rate_limited("gemini");
    let mut cfg = settings(&["openai", "anthropic", "gemini"], "openai");
    cfg.max_retries = 1;
    let router = router_with(
        cfg,
        vec![Arc::clone(&openai), Arc::clone(&anthropic), Arc::clone(&gemini)],
    );

    let err = router
        .generate(user_request("hi"))
        .await
        .expect_err("should fail");
    assert_eq!(err.code(), "rate_limit");
    // Only the default plus one fallback were attempted; the tie between the
    // cold providers resolves in enabled-list order.
    assert_eq!(openai.call_count(), 1);
    assert_eq!(anthropic.call_count(), 1);
    assert_eq!(gemini.call_count(), 0);
}

// ── Budgets ─────────────────────────────────────────────────────

#[tokio::test]
async fn requested_tokens_over_ceiling_fail_before_any_attempt() {
    let openai = Arc::new(StubProvider::ok("openai"));
    let router = router_with(settings(&["openai"], "openai"), vec![Arc::clone(&openai)]);

    let mut req = user_request("hi");
    req.max_output_tokens = Some(64_000);
    let err = router.generate(req).await.expect_err("should fail");
    assert_eq!(err.code(), "budget_exceeded");
    assert_eq!(err.http_status(), 402);
    assert_eq!(openai.call_count(), 0);
}

#[tokio::test]
async fn post_budget_violation_discards_response() {
    let (buf, _guard) = capture_logs();

    let openai = Arc::new(StubProvider::with_behavior(
        "openai",
        StubBehavior::Succeed {
            total_tokens: 150,
            cost: 0.01,
        },
    ));
    let mut cfg = settings(&["openai"], "openai");
    cfg.max_tokens_per_request = 100;
    let router = router_with(cfg, vec![Arc::clone(&openai)]);

    let mut req = user_request("hi");
    req.metadata
        .insert("cacheable".to_owned(), Value::Bool(true));

    let err = router
        .generate(req.clone())
        .await
        .expect_err("should fail");
    assert_eq!(err.code(), "budget_exceeded");

    // The discarded response was never cached: a second call reaches the
    // provider again.
    let _ = router.generate(req).await;
    assert_eq!(openai.call_count(), 2);

    // No success event was emitted, only error events.
    let logs = captured(&buf);
    assert!(!logs.contains(r#""outcome":"success""#));
    assert!(logs.contains(r#""error_code":"budget_exceeded""#));
}

#[tokio::test]
async fn cost_over_ceiling_is_budget_exceeded() {
    let openai = Arc::new(StubProvider::with_behavior(
        "openai",
        StubBehavior::Succeed {
            total_tokens: 20,
            cost: 2.5,
        },
    ));
    let router = router_with(settings(&["openai"], "openai"), vec![openai]);

    let err = router
        .generate(user_request("hi"))
        .await
        .expect_err("should fail");
    assert_eq!(err.code(), "budget_exceeded");
}

// ── Caching ─────────────────────────────────────────────────────

#[tokio::test]
async fn cacheable_request_is_served_from_cache_within_ttl() {
    let openai = Arc::new(StubProvider::ok("openai"));
    let router = router_with(settings(&["openai"], "openai"), vec![Arc::clone(&openai)]);

    let mut req = user_request("hi");
    req.metadata
        .insert("cacheable".to_owned(), Value::Bool(true));

    let first = router
        .generate(req.clone())
        .await
        .expect("should succeed");
    let second = router.generate(req).await.expect("should succeed");
    assert_eq!(first.output_text, second.output_text);
    assert_eq!(openai.call_count(), 1);
}

#[tokio::test]
async fn non_cacheable_request_always_reaches_the_provider() {
    let openai = Arc::new(StubProvider::ok("openai"));
    let router = router_with(settings(&["openai"], "openai"), vec![Arc::clone(&openai)]);

    let req = user_request("hi");
    let _ = router.generate(req.clone()).await;
    let _ = router.generate(req).await;
    assert_eq!(openai.call_count(), 2);
}

// ── Policy and validation ───────────────────────────────────────

#[tokio::test]
async fn denylisted_tool_is_rejected_before_any_network_io() {
    let openai = Arc::new(StubProvider::ok("openai"));
    let router = router_with(settings(&["openai"], "openai"), vec![Arc::clone(&openai)]);

    let mut req = user_request("hi");
    req.tools.push(ToolSpec {
        name: "shell_exec".to_owned(),
        description: "run shell".to_owned(),
        json_schema: json!({"type": "object"}),
        version: "v1".to_owned(),
    });

    let err = router.generate(req).await.expect_err("should reject");
    assert_eq!(err.code(), "bad_request");
    assert_eq!(openai.call_count(), 0);
}

#[tokio::test]
async fn empty_message_list_is_rejected() {
    let router = router_with(
        settings(&["openai"], "openai"),
        vec![Arc::new(StubProvider::ok("openai"))],
    );
    let mut req = user_request("hi");
    req.messages.clear();
    let err = router.generate(req).await.expect_err("should reject");
    assert_eq!(err.code(), "bad_request");
}

#[tokio::test]
async fn stream_flagged_request_is_rejected_by_generate() {
    let router = router_with(
        settings(&["openai"], "openai"),
        vec![Arc::new(StubProvider::ok("openai"))],
    );
    let mut req = user_request("hi");
    req.stream = true;
    let err = router.generate(req).await.expect_err("should reject");
    assert_eq!(err.code(), "bad_request");
}

#[tokio::test]
async fn no_enabled_providers_is_unavailable() {
    let router = router_with(
        settings(&["nonexistent"], "nonexistent"),
        vec![Arc::new(StubProvider::ok("openai"))],
    );
    let err = router
        .generate(user_request("hi"))
        .await
        .expect_err("should fail");
    assert_eq!(err.code(), "provider_unavailable");
}
