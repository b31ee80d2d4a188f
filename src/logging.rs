//! Structured logging setup.
//!
//! All diagnostics go through `tracing`. This module installs the subscriber: an [`EnvFilter`]
//! built from `PIN_LOG_LEVEL` (or `RUST_LOG` when set), a JSON or pretty formatter, and
//! optionally a non-blocking daily log file from `tracing-appender`.
//!
//! ```no_run
//! use pinhttp::logging::{init_logging, LogConfig};
//!
//! let _guard = init_logging(&LogConfig::from_env()).expect("logging");
//! ```

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// trace/debug/info/warn/error
    pub log_level: String,
    pub format: LogFormat,
    /// Directory for a daily rolling log file; stdout when unset.
    pub log_dir: Option<PathBuf>,
    /// Extra comma-separated filter directives, e.g. `tiny_http=warn`.
    pub target_filter: Option<String>,
    /// Include file:line location
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Pretty,
            log_dir: None,
            target_filter: None,
            include_location: false,
        }
    }
}

impl LogConfig {
    /// Read `PIN_LOG_*` variables, falling back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            log_level: lookup("PIN_LOG_LEVEL").unwrap_or(defaults.log_level),
            format: lookup("PIN_LOG_FORMAT").map_or(defaults.format, |s| LogFormat::parse(&s)),
            log_dir: lookup("PIN_LOG_FILE")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            target_filter: lookup("PIN_LOG_TARGET_FILTER"),
            include_location: lookup("PIN_LOG_INCLUDE_LOCATION")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.include_location),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_level.to_lowercase()));
        if let Some(targets) = &self.target_filter {
            for directive in targets.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                match directive.parse() {
                    Ok(d) => filter = filter.add_directive(d),
                    Err(_) => eprintln!("Warning: Invalid log filter directive: {directive}"),
                }
            }
        }
        filter
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the log file on drop; keep it alive for the life of the process.
/// A second call leaves the first subscriber in place and returns `Ok(None)`.
///
/// # Errors
///
/// Fails when the log directory cannot be created.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let (writer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "pinhttp.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (writer, Some(guard))
        }
        None => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            (writer, Some(guard))
        }
    };

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_list(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_names(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
    };

    let installed = tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .try_init();
    match installed {
        Ok(()) => Ok(guard),
        Err(_) => Ok(None),
    }
}
