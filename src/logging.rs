//! Subscriber setup for host processes embedding the gateway.
//!
//! The gateway itself only emits through the `tracing` facade; [`init`]
//! installs a subscriber that splits that output by audience. Structured
//! attempt events (target [`TELEMETRY_TARGET`]) are machine-destined: they go
//! to a daily-rotated JSON file when a logs directory is given, and are kept
//! off the human-readable console either way. Everything else goes to stderr,
//! filtered by `RUST_LOG` (default `info`).

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::telemetry::TELEMETRY_TARGET;

/// Keeps the non-blocking file writer alive.
///
/// Hold this for the life of the process; dropping it flushes pending
/// entries and closes the current log file. When [`init`] was called without
/// a logs directory there is nothing to flush and the guard is inert.
pub struct LoggingGuard {
    _guard: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// With `logs_dir` set, telemetry events and regular logs are written as
/// JSON to `{logs_dir}/opsgate.json.YYYY-MM-DD` (daily rotation) while the
/// console shows only non-telemetry output. Without it, the console layer is
/// all there is and telemetry events are dropped rather than interleaved
/// with human-readable logs.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created.
pub fn init(logs_dir: Option<&Path>) -> anyhow::Result<LoggingGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(dir) = logs_dir else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(filter_fn(|metadata| metadata.target() != TELEMETRY_TARGET)),
            )
            .init();
        return Ok(LoggingGuard { _guard: None });
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create logs directory {}", dir.display()))?;
    let (non_blocking, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "opsgate.json"));
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter_fn(|metadata| metadata.target() != TELEMETRY_TARGET)),
        )
        .init();
    Ok(LoggingGuard {
        _guard: Some(guard),
    })
}
