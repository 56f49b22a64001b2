//! Prelude for convenient imports.
//!
//! ```ignore
//! use flashfs_core::prelude::*;
//! ```

// Error handling
pub use crate::codes::ErrorDomain;
pub use crate::error::{FsError, Result};

// Configuration
pub use crate::config::{FsConfig, Geometry, MountConfig};

// Paths and listings
pub use crate::listing::{join_entry_path, parse_list_payload};
pub use crate::path::{normalize_dir_path, normalize_file_path};

// Types
pub use crate::types::{DiskVersion, Entry, EntryKind, FsFamily, Usage};
