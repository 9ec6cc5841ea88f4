//! Logging setup for the daemon
//!
//! The `[log]` section picks a level and an output format. `RUST_LOG`
//! overrides the level when set, which is handy for tracing a single
//! module (`RUST_LOG=pppd::fsm=trace`).

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// The `[log]` config section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// error, warn, info, debug or trace
    pub level: String,
    /// pretty, compact or json
    pub format: String,
}

impl LogConfig {
    pub fn new() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Pretty,
    Compact,
    /// One JSON object per event, fields at top level
    Json,
}

/// Install the global subscriber
///
/// Without a config (the `config` subcommands) only warnings and errors
/// from the daemon are shown. Calling this twice keeps the first
/// subscriber.
pub fn init_logging(config: Option<&LogConfig>) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(directive(config)),
    };

    let format = config.map_or(Format::Compact, |c| parse_format(&c.format));
    let layer = match format {
        Format::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .boxed(),
        Format::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .boxed(),
        Format::Pretty => tracing_subscriber::fmt::layer().boxed(),
    };

    let _ = tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init();
}

/// Filter directive limiting output to this crate at the configured level
fn directive(config: Option<&LogConfig>) -> String {
    let level = config.map_or(Level::WARN, |c| parse_level(&c.level));
    format!("{}={}", env!("CARGO_CRATE_NAME"), level.as_str().to_lowercase())
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

fn parse_format(format: &str) -> Format {
    match format {
        "json" => Format::Json,
        "compact" => Format::Compact,
        _ => Format::Pretty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format("json"), Format::Json);
        assert_eq!(parse_format("compact"), Format::Compact);
        assert_eq!(parse_format("pretty"), Format::Pretty);
        assert_eq!(parse_format("xml"), Format::Pretty);
    }

    #[test]
    fn test_directive_scoped_to_crate() {
        let config = LogConfig {
            level: "debug".into(),
            ..LogConfig::default()
        };
        assert_eq!(directive(Some(&config)), "pppd=debug");
        assert_eq!(directive(None), "pppd=warn");
    }

    #[test]
    fn test_log_config_partial_toml() {
        let config: LogConfig = toml::from_str("level = \"debug\"").unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, "pretty");
    }
}
