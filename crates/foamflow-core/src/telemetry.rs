//! Log output for the `foamflow` binary.
//!
//! Case progress is reported through the `foamflow.*` spans and events in
//! [`crate::obs`]. Logs always go to stderr so `--json` command output on
//! stdout stays machine-readable. Without `RUST_LOG`, only the foamflow
//! crates log at the requested level; HTTP and runtime crates stay at `warn`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const FOAMFLOW_CRATES: &[&str] = &[
    "foamflow",
    "foamflow_core",
    "foamflow_knowledge",
    "foamflow_llm",
];

/// Default filter: `warn` globally, `level` for the foamflow crates.
fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    std::iter::once("warn".to_string())
        .chain(FOAMFLOW_CRATES.iter().map(|krate| format!("{krate}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. Only the first call in a process has an
/// effect.
///
/// `json` selects newline-delimited JSON records with the case span fields
/// flattened in; otherwise lines are human-readable.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}
