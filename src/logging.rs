//! Diagnostic logging.
//!
//! Logs go to stderr through a `tracing-subscriber` fmt layer so stdout
//! stays clean for command output. `RUST_LOG` wins over the configured
//! level; `--verbose` forces `debug`.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let filter = build_env_filter(config, verbose, std::env::var("RUST_LOG").ok().as_deref())?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

fn build_env_filter(
    config: &LoggingConfig,
    verbose: bool,
    rust_log: Option<&str>,
) -> Result<EnvFilter> {
    let directives = match (verbose, rust_log) {
        (true, _) => "debug",
        (false, Some(env)) if !env.trim().is_empty() => env,
        _ => config.level.as_str(),
    };
    EnvFilter::try_new(directives)
        .map_err(|e| anyhow!("Invalid log filter '{}': {}", directives, e))
}
