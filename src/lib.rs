//! # opsgate
//!
//! A multi-provider LLM gateway: one normalized request/response surface over
//! the OpenAI, Anthropic, and Gemini chat-completion APIs.
//!
//! The router selects a provider per request (configured default first, then
//! ascending rolling p95 latency), enforces tool policy and budget ceilings,
//! caches replayable responses, falls back to the next candidate on
//! retryable failures, and emits one structured telemetry event per attempt.
//! Provider wire formats — including their three incompatible tool-call and
//! usage schemas — are normalized into a single canonical shape by the
//! adapters.
//!
//! ```no_run
//! use opsgate::{GatewaySettings, LLMRequest, LlmRouter, Message, Role};
//!
//! # async fn run() -> Result<(), opsgate::GatewayError> {
//! let settings = GatewaySettings::load().map_err(|e| {
//!     opsgate::GatewayError::bad_request(e.to_string())
//! })?;
//! let router = LlmRouter::from_settings(settings);
//!
//! let req = LLMRequest::new("fast", vec![Message::text(Role::User, "hello")]);
//! let res = router.generate(req).await?;
//! println!("{} said: {}", res.provider, res.output_text);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod cost;
pub mod error;
pub mod logging;
pub mod policy;
pub mod providers;
pub mod router;
pub mod secrets;
pub mod telemetry;
pub mod types;

pub use config::GatewaySettings;
pub use error::GatewayError;
pub use router::LlmRouter;
pub use types::{LLMRequest, LLMResponse, Message, Role, ToolCall, ToolSpec};
