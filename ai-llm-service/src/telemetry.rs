use std::io::{self, IsTerminal};

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, filter, fmt};

/// Targets of the review pipeline crates; everything else is filtered out of [`layer`].
pub const TARGET_PREFIXES: [&str; 2] = ["ai_llm_service", "mr_reviewer"];

/// RFC3339 UTC timer implemented via `chrono` (no extra features).
/// Example output: `2025-09-12T10:20:30Z`
#[derive(Clone, Debug, Default)]
struct ChronoRfc3339Utc;

impl FormatTime for ChronoRfc3339Utc {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = chrono::Utc::now();
        let s = now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        w.write_str(&s)
    }
}

fn is_pipeline_target(target: &str) -> bool {
    TARGET_PREFIXES.iter().any(|p| target.starts_with(p))
}

/// Formatting layer that renders only events emitted by the pipeline crates.
///
/// - RFC3339 UTC timestamps
/// - Compact single-line format with `file:line` and target
/// - Span close events (durations of instrumented functions)
/// - ANSI colors only when stdout is a terminal
///
/// Uses a per-event filter, so logs of other crates are untouched.
pub fn layer<S>() -> impl Layer<S> + Send + Sync
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let use_ansi = io::stdout().is_terminal();
    let only_pipeline = filter::filter_fn(|meta| is_pipeline_target(meta.target()));

    fmt::layer()
        .with_timer(ChronoRfc3339Utc)
        .with_level(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(use_ansi)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .event_format(fmt::format().compact().with_source_location(true))
        .with_filter(only_pipeline)
}

/// Level directives for every pipeline crate, e.g. `mr_reviewer=debug`.
pub fn level_directives(level: Level) -> Vec<Directive> {
    TARGET_PREFIXES
        .iter()
        .filter_map(|target| {
            format!("{target}={}", level.as_str().to_lowercase())
                .parse::<Directive>()
                .ok()
        })
        .collect()
}

/// EnvFilter from `RUST_LOG` (or `default`), raised to `level` for the pipeline crates.
///
/// `env_filter_with_level("info", Level::DEBUG)` shows INFO globally and
/// DEBUG for `ai_llm_service` and `mr_reviewer`.
pub fn env_filter_with_level(default: &str, level: Level) -> EnvFilter {
    let base = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    level_directives(level)
        .into_iter()
        .fold(base, |f, d| f.add_directive(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pipeline_targets_pass() {
        assert!(is_pipeline_target("ai_llm_service::session"));
        assert!(is_pipeline_target("mr_reviewer::review"));
        assert!(!is_pipeline_target("hyper::proto"));
    }

    #[test]
    fn directives_name_each_crate() {
        let rendered: Vec<String> = level_directives(Level::DEBUG)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(rendered, vec!["ai_llm_service=debug", "mr_reviewer=debug"]);
    }
}
