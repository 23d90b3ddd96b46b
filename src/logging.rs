//! `tracing` subscriber setup.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSection;

/// Resolve the filter: `RUST_LOG` wins, then `-v` (debug), then the
/// configured directive.
pub fn build_filter(configured: &str, verbose: bool, rust_log: Option<&str>) -> Result<EnvFilter> {
    let directive = match rust_log {
        Some(env) if !env.trim().is_empty() => env,
        _ if verbose => "debug",
        _ => configured,
    };
    EnvFilter::try_new(directive).with_context(|| format!("Invalid log filter '{}'", directive))
}

/// Install the global subscriber. Call once, before serving.
pub fn init_logging(logging: &LoggingSection, verbose: bool) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(&logging.filter, verbose, rust_log.as_deref())?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))
}
