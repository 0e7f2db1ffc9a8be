//! Log subscriber setup.
//!
//! Logs go to stderr so stdout carries only command output. The level comes
//! from `RUST_LOG` and defaults to `info`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber; plain text, or one JSON object per line.
///
/// Calling this twice is harmless: the second subscriber is ignored.
pub fn init(json: bool) {
    let registry = tracing_subscriber::registry().with(filter());
    let result = if json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(err) = result {
        tracing::debug!(error = %err, "log subscriber already installed");
    }
}
