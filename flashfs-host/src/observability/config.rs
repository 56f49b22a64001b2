//! Configuration types for logging.

use std::env;
use std::str::FromStr;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Human-readable multi-line format with colors.
    Pretty,
    /// Compact single-line format.
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            "compact" => Self::Compact,
            _ => Self::default(),
        })
    }
}

/// Configuration for the tracing subscriber.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    log_format: LogFormat,
    /// Filter directives (e.g. "info", "debug,flashfs::guest=info").
    log_filter: String,
    include_location: bool,
    include_target: bool,
    include_thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            log_filter: "warn".to_string(),
            include_location: false,
            include_target: true,
            include_thread_ids: false,
        }
    }
}

impl TracingConfig {
    /// Create a new builder.
    pub fn builder() -> TracingConfigBuilder {
        TracingConfigBuilder::default()
    }

    /// Create configuration from environment variables.
    ///
    /// - `FLASHFS_LOG_FORMAT`: "json", "pretty", or "compact"
    /// - `FLASHFS_LOG_LEVEL` or `RUST_LOG`: filter directives
    /// - `FLASHFS_LOG_LOCATION`: "true" to include file and line
    pub fn from_env() -> Self {
        TracingConfigBuilder::default().from_env().build()
    }

    /// Get the log format.
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Get the filter directives.
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Check if source location should be included.
    pub fn include_location(&self) -> bool {
        self.include_location
    }

    /// Check if the target should be included.
    pub fn include_target(&self) -> bool {
        self.include_target
    }

    /// Check if thread IDs should be included.
    pub fn include_thread_ids(&self) -> bool {
        self.include_thread_ids
    }
}

/// Builder for [`TracingConfig`].
#[derive(Debug, Clone, Default)]
pub struct TracingConfigBuilder {
    log_format: Option<LogFormat>,
    log_filter: Option<String>,
    include_location: Option<bool>,
    include_target: Option<bool>,
    include_thread_ids: Option<bool>,
}

impl TracingConfigBuilder {
    /// Fill unset fields from the environment.
    pub fn from_env(mut self) -> Self {
        if self.log_format.is_none() {
            self.log_format = Some(
                env::var("FLASHFS_LOG_FORMAT")
                    .ok()
                    .and_then(|s| s.parse::<LogFormat>().ok())
                    .unwrap_or_else(|| {
                        if stderr_is_terminal() {
                            LogFormat::Pretty
                        } else {
                            LogFormat::Compact
                        }
                    }),
            );
        }
        if self.log_filter.is_none() {
            self.log_filter = env::var("FLASHFS_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .ok();
        }
        if self.include_location.is_none() {
            self.include_location = env::var("FLASHFS_LOG_LOCATION")
                .map(|s| s == "true" || s == "1")
                .ok();
        }
        self
    }

    /// Set the log format.
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.log_format = Some(format);
        self
    }

    /// Set the filter directives.
    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// Set the filter from a `-v` count: 0 warn, 1 info, 2 debug, more trace.
    pub fn verbosity(self, count: u8) -> Self {
        let level = match count {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        self.log_filter(level)
    }

    /// Include source location in logs.
    pub fn include_location(mut self, include: bool) -> Self {
        self.include_location = Some(include);
        self
    }

    /// Include the target in logs.
    pub fn include_target(mut self, include: bool) -> Self {
        self.include_target = Some(include);
        self
    }

    /// Include thread IDs in logs.
    pub fn include_thread_ids(mut self, include: bool) -> Self {
        self.include_thread_ids = Some(include);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> TracingConfig {
        let defaults = TracingConfig::default();
        TracingConfig {
            log_format: self.log_format.unwrap_or(defaults.log_format),
            log_filter: self.log_filter.unwrap_or(defaults.log_filter),
            include_location: self.include_location.unwrap_or(defaults.include_location),
            include_target: self.include_target.unwrap_or(defaults.include_target),
            include_thread_ids: self
                .include_thread_ids
                .unwrap_or(defaults.include_thread_ids),
        }
    }
}

fn stderr_is_terminal() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stderr())
}
