//! Structured logging setup for rtc-bridge hosts

use std::fmt::Display;
use tracing::Span;
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Span wrapping everything a bridge session task does.
///
/// Records emitted inside it carry `session_id`, so interleaved sessions
/// can be told apart in one log stream.
pub fn session_span(session_id: impl Display) -> Span {
    tracing::info_span!("session", session_id = %session_id)
}

fn json_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .json()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_writer(writer)
}

/// Initialize JSON logging
///
/// `RUST_LOG` overrides `default_level` when set. Every record carries its
/// target, file and line, plus the fields of the enclosing session span.
pub fn init_logging(service_name: &str, default_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(json_layer(std::io::stdout))
        .init();

    tracing::info!(
        service = service_name,
        "Logging initialized"
    );
}

/// Initialize human-readable console logging (for development)
pub fn init_console_logging(service_name: &str, default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_target(true)
        .with_thread_names(true)
        .init();

    tracing::info!(
        service = service_name,
        "Console logging initialized"
    );
}
