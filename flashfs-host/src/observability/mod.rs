//! Logging setup.
//!
//! Every component logs through `tracing` with structured fields; this
//! module installs a subscriber for binaries and tests that want output.
//!
//! Output goes to stderr so command output on stdout stays clean. The
//! format is controlled by `FLASHFS_LOG_FORMAT`:
//! - `json` - one JSON object per event
//! - `pretty` - multi-line human-readable output (default for a TTY)
//! - `compact` - single-line output (default otherwise)
//!
//! The filter comes from `FLASHFS_LOG_LEVEL`, then `RUST_LOG`, then `warn`.
//! Guest console output is logged under the `flashfs::guest` target.
//!
//! # Example
//!
//! ```ignore
//! use flashfs_host::observability::{LogFormat, TracingConfig, init_tracing};
//!
//! let _guard = init_tracing(TracingConfig::from_env())?;
//!
//! let config = TracingConfig::builder()
//!     .log_format(LogFormat::Json)
//!     .log_filter("debug,flashfs::guest=info")
//!     .build();
//! let _guard = init_tracing(config)?;
//! ```

mod config;
mod tracing_setup;

pub use config::{LogFormat, TracingConfig, TracingConfigBuilder};
pub use tracing_setup::{TracingGuard, init_tracing};

/// Target under which guest console output is logged.
pub const GUEST_TARGET: &str = "flashfs::guest";
