//! Structured logging setup for argus
//!
//! Built on `tracing-subscriber` with an `EnvFilter`: `RUST_LOG` wins when it
//! is set, otherwise the configured level applies to argus and noisy
//! dependencies are held at `warn`. Output goes to stderr so stdout stays free
//! for command results.
//!
//! # Example
//!
//! ```no_run
//! use argus::util::logging;
//!
//! logging::init_from_env();
//!
//! use tracing::{info, warn};
//! info!("Application started");
//! warn!(tool = "slither", "Image pull is slow");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{
    filter::Directive, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

pub const LOG_LEVEL_ENV: &str = "ARGUS_LOG_LEVEL";
pub const LOG_JSON_ENV: &str = "ARGUS_LOG_JSON";

const QUIET_TARGETS: &[&str] = &["h2", "hyper", "hyper_util", "reqwest", "bollard"];

/// Ensures logging is only initialized once
static INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum log level to display
    pub level: Level,

    /// Use JSON output format
    pub use_json: bool,

    /// Include the module target (e.g., argus::docker) in logs
    pub include_target: bool,

    /// Include file and line number information
    pub include_location: bool,

    /// Include thread ID and name in logs
    pub include_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
            include_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// JSON output with full metadata, for machine consumption
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            use_json: true,
            include_target: true,
            include_location: true,
            include_thread_ids: true,
        }
    }
}

/// Parses a log level, falling back to `INFO` for anything unrecognised
pub fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

/// Level from command-line flags: an explicit level first, then
/// `--verbose` / `--quiet`, then `ARGUS_LOG_LEVEL`, then `info`
pub fn resolve_level(explicit: Option<&str>, verbose: bool, quiet: bool) -> Level {
    if let Some(level_str) = explicit {
        parse_level(level_str)
    } else if verbose {
        Level::DEBUG
    } else if quiet {
        Level::ERROR
    } else {
        let level_str = env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
        parse_level(&level_str)
    }
}

fn directive(spec: &str) -> Option<Directive> {
    match spec.parse() {
        Ok(directive) => Some(directive),
        Err(e) => {
            eprintln!("Ignoring invalid log directive '{}': {}", spec, e);
            None
        }
    }
}

fn build_filter(level: Level) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env();
    if env::var("RUST_LOG").is_err() {
        let own = format!("argus={}", level);
        let quiet = QUIET_TARGETS.iter().map(|t| format!("{}=warn", t));
        for spec in std::iter::once(own).chain(quiet) {
            if let Some(d) = directive(&spec) {
                filter = filter.add_directive(d);
            }
        }
    }
    filter
}

/// Installs the global subscriber; later calls are ignored
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level);

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_thread_ids(config.include_thread_ids)
                        .with_thread_names(config.include_thread_ids),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_thread_ids(config.include_thread_ids)
                        .with_thread_names(config.include_thread_ids),
                )
                .init();
        }
    });
}

pub fn init_default() {
    init_logging(LoggingConfig::default());
}

/// Reads `ARGUS_LOG_LEVEL` and `ARGUS_LOG_JSON`
pub fn init_from_env() {
    let level = resolve_level(None, false, false);
    let use_json = env::var(LOG_JSON_ENV)
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);

    init_logging(LoggingConfig {
        level,
        use_json,
        ..Default::default()
    });
}
