//! Tracing setup for the `vcr` binary.
//!
//! Orchestrator events follow the requested level while dependency noise
//! (tokio, regex, ...) stays at `warn`. `RUST_LOG`, when set, replaces that
//! default entirely. Everything is written to stderr; stdout is reserved for
//! the JSON report.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Targets that follow the requested level.
const OWN_TARGETS: &[&str] = &["vcr_core", "vcr"];

/// Default filter directives for `level`, e.g. `warn,vcr_core=debug,vcr=debug`.
fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    OWN_TARGETS
        .iter()
        .fold(String::from("warn"), |mut directives, target| {
            directives.push_str(&format!(",{}={}", target, level));
            directives
        })
}

/// Install the global subscriber: JSON lines with `json`, human-readable
/// text otherwise.
///
/// The global subscriber can only be set once, so later calls are no-ops.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let (json_layer, text_layer) = if json {
        let layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr);
        (Some(layer), None)
    } else {
        let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .ok();
}
