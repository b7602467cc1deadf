//! Subscriber setup for the `tracing` events Kiln emits.
//!
//! The library crates only emit events; nothing is printed until the
//! application installs a subscriber. [`init`] installs a `fmt` subscriber
//! on stderr with thread names enabled, so worker events show up as
//! `kiln-worker-N`.
//!
//! Filtering, highest priority first: [`LogConfig::filter`], the `KILN_LOG`
//! environment variable, `RUST_LOG`, then [`LogConfig::level`].

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// Environment variable read for filter directives before `RUST_LOG`.
pub const ENV_VAR: &str = "KILN_LOG";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-readable.
    Pretty,
    /// One line per event.
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level used when no filter directives are found.
    pub level: Level,
    /// Output format.
    pub format: LogFormat,
    /// Explicit filter directives (e.g. `"kiln_pool=debug,kiln_arena=trace"`).
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Defaults: `INFO`, compact output, no explicit filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set explicit filter directives.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    config
        .filter
        .as_deref()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_env(ENV_VAR).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(config.level.as_str()))
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already set.
pub fn try_init(config: &LogConfig) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(build_filter(config));
    match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_thread_names(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_thread_names(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    }
}

/// Install the global subscriber, keeping any subscriber that is already
/// set.
pub fn init(config: &LogConfig) {
    if try_init(config).is_err() {
        tracing::debug!("global tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let config = LogConfig::new()
            .with_level(Level::DEBUG)
            .with_format(LogFormat::Pretty)
            .with_filter("kiln_pool=trace");
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.filter.as_deref(), Some("kiln_pool=trace"));
    }

    #[test]
    fn explicit_filter_wins() {
        let config = LogConfig::new().with_filter("kiln_arena=trace");
        let filter = build_filter(&config);
        assert!(filter.to_string().contains("kiln_arena=trace"));
    }

    #[test]
    fn second_install_is_rejected() {
        let config = LogConfig::new().with_filter("warn");
        // The first call may or may not win, depending on test order.
        let _ = try_init(&config);
        assert!(try_init(&config).is_err());
        init(&config);
    }
}
