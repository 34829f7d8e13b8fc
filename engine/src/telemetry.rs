//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for structured logging. Log lines go to
//! stderr so that `--json` output on stdout stays machine readable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter directive for a log level.
///
/// External crates (hyper, sqlx, reqwest) stay at `warn` unless the level
/// is `trace`, so debug sessions are not drowned in connection noise.
fn filter_directive(log_level: &str) -> String {
    let deps_level = if log_level == "trace" { "trace" } else { "warn" };
    format!(
        "{deps},parley_engine={lvl},parley={lvl},session_notes={lvl},query_proxy={lvl}",
        deps = deps_level,
        lvl = log_level
    )
}

/// Initialize the tracing subscriber with the given log level from config.
///
/// Priority: `RUST_LOG` env var > `log_level` parameter > default "info"
///
/// In debug builds: pretty-printed terminal output.
/// In release builds: JSON structured output with spans.
pub fn init_telemetry_with_level(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(log_level)));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}

/// Initialize the tracing subscriber with default settings.
pub fn init_telemetry() {
    init_telemetry_with_level("info");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_quiets_dependencies() {
        let directive = filter_directive("debug");
        assert!(directive.starts_with("warn,"));
        assert!(directive.contains("parley_engine=debug"));
        assert!(filter_directive("trace").starts_with("trace,"));
    }

    #[test]
    fn test_init_is_idempotent() {
        init_telemetry_with_level("debug");
        init_telemetry();
    }
}
