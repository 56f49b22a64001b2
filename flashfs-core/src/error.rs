//! Error types for FlashFS.
//!
//! Every guest-reported failure is translated into one of these variants at
//! the point of the call, so no bare numeric code ever leaves a client. Guest
//! errors keep the original numeric code alongside a description of the
//! attempted action and target path.

use crate::types::FsFamily;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for FlashFS operations.
#[derive(Error, Debug)]
pub enum FsError {
    // =========================================================================
    // Lifecycle Errors (E001-E099)
    // =========================================================================
    /// The engine rejected its initialization parameters. Not recoverable.
    #[error("E001: Failed to initialize {family} engine: unable to {action} (code {code})")]
    Initialization {
        /// Engine family.
        family: FsFamily,
        /// Guest error code.
        code: i32,
        /// The initialization step that failed.
        action: String,
    },

    /// Mounting failed (after the optional format-and-retry).
    #[error("E002: Failed to mount {family} filesystem (code {code})")]
    Mount {
        /// Engine family.
        family: FsFamily,
        /// Guest error code of the last mount attempt.
        code: i32,
    },

    /// The client was closed and can no longer be used.
    #[error("E003: Filesystem has been closed")]
    Closed,

    // =========================================================================
    // Guest ABI Errors (E100-E199)
    // =========================================================================
    /// The guest allocator returned a null pointer.
    #[error("E101: Out of guest memory: requested {requested} bytes")]
    OutOfGuestMemory {
        /// Number of bytes requested.
        requested: u64,
    },

    /// The engine reported that the device is full.
    #[error("E102: No space left on device: unable to {action} (code {code})")]
    CapacityExhausted {
        /// The attempted action, including the target path.
        action: String,
        /// Guest error code.
        code: i32,
    },

    /// The target path does not exist.
    #[error("E103: Not found: unable to {action}: {reason} (code {code})")]
    NotFound {
        /// The attempted action, including the target path.
        action: String,
        /// Guest error code.
        code: i32,
        /// What the code means in the engine's error domain.
        reason: &'static str,
    },

    /// Any other negative guest return.
    #[error("E104: Unable to {action}: {reason} (code {code})")]
    Guest {
        /// The attempted action, including the target path.
        action: String,
        /// Guest error code.
        code: i32,
        /// What the code means in the engine's error domain.
        reason: &'static str,
    },

    /// A read or write fell outside the guest's linear memory.
    #[error("E105: Guest memory access out of bounds: offset={offset}, size={size}")]
    MemoryAccess {
        /// Start of the access.
        offset: u32,
        /// Length of the access.
        size: u64,
    },

    /// The guest trapped while executing an export.
    #[error("E106: Guest export '{export}' trapped: {cause}")]
    Trap {
        /// Export being called.
        export: String,
        /// Trap description.
        cause: String,
    },

    /// The guest does not provide a required export.
    #[error("E107: Guest module does not export '{name}'")]
    MissingExport {
        /// Export name.
        name: String,
    },

    /// The guest family does not implement an optional capability.
    #[error("E108: {family} engine does not support {operation}")]
    Unsupported {
        /// Engine family.
        family: FsFamily,
        /// Operation name.
        operation: &'static str,
    },

    /// A listing export claimed to write more than the buffer it was given.
    #[error("E109: Unable to {action}: engine wrote {written} bytes into a {capacity} byte buffer")]
    ListingOverflow {
        /// The attempted action.
        action: String,
        /// Byte count the engine returned.
        written: usize,
        /// Capacity of the destination buffer.
        capacity: usize,
    },

    // =========================================================================
    // Host Validation Errors (E200-E299)
    // =========================================================================
    /// A user-supplied path was rejected before reaching the guest.
    #[error("E201: Invalid path '{path}': {cause}")]
    InvalidPath {
        /// The path as supplied.
        path: String,
        /// Why it was rejected.
        cause: String,
    },

    /// An image does not match the configured geometry.
    #[error("E202: Invalid image: {cause}")]
    InvalidImage {
        /// Description of the mismatch.
        cause: String,
    },

    /// Configuration values are unusable.
    #[error("E203: Invalid configuration: {cause}")]
    InvalidConfig {
        /// Description of the problem.
        cause: String,
    },

    // =========================================================================
    // Module Errors (E300-E399)
    // =========================================================================
    /// Fetching, compiling or instantiating the guest module failed.
    #[error("E301: Failed to load guest module '{module}': {cause}")]
    ModuleLoad {
        /// Module name or path.
        module: String,
        /// Reason for the failure.
        cause: String,
    },

    /// Registering a host import failed.
    #[error("E302: Failed to register host function '{function}': {cause}")]
    HostFunction {
        /// Import name.
        function: String,
        /// Reason for the failure.
        cause: String,
    },

    // =========================================================================
    // I/O Errors (E400-E499)
    // =========================================================================
    /// Host file I/O failed.
    #[error("E401: I/O error at {path}: {cause}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// Reason for the failure.
        cause: String,
    },
}

impl FsError {
    /// Get the error code (e.g., "E001").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Initialization { .. } => "E001",
            Self::Mount { .. } => "E002",
            Self::Closed => "E003",
            Self::OutOfGuestMemory { .. } => "E101",
            Self::CapacityExhausted { .. } => "E102",
            Self::NotFound { .. } => "E103",
            Self::Guest { .. } => "E104",
            Self::MemoryAccess { .. } => "E105",
            Self::Trap { .. } => "E106",
            Self::MissingExport { .. } => "E107",
            Self::Unsupported { .. } => "E108",
            Self::ListingOverflow { .. } => "E109",
            Self::InvalidPath { .. } => "E201",
            Self::InvalidImage { .. } => "E202",
            Self::InvalidConfig { .. } => "E203",
            Self::ModuleLoad { .. } => "E301",
            Self::HostFunction { .. } => "E302",
            Self::Io { .. } => "E401",
        }
    }

    /// The numeric code reported by the guest, if this error came from one.
    #[must_use]
    pub fn guest_code(&self) -> Option<i32> {
        match self {
            Self::Initialization { code, .. }
            | Self::Mount { code, .. }
            | Self::CapacityExhausted { code, .. }
            | Self::NotFound { code, .. }
            | Self::Guest { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Check if the target did not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if the device ran out of space.
    #[must_use]
    pub fn is_capacity_exhausted(&self) -> bool {
        matches!(self, Self::CapacityExhausted { .. })
    }

    /// Check if this error was raised by host-side validation, without
    /// touching the guest.
    #[must_use]
    pub fn is_host_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidPath { .. } | Self::InvalidImage { .. } | Self::InvalidConfig { .. }
        )
    }

    pub(crate) fn invalid_path(path: &str, cause: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.to_string(),
            cause: cause.into(),
        }
    }
}

/// Result type alias using `FsError`.
pub type Result<T> = std::result::Result<T, FsError>;
