//! FlashFS Core Library
//!
//! Host-side building blocks shared by every flash filesystem client:
//! nothing in this crate calls into a guest engine.
//!
//! # Key Components
//!
//! - **Error**: the error taxonomy every client operation reports through
//! - **Config**: user-facing options and the validated mount geometry
//! - **Path**: canonicalization of user-supplied paths into engine form
//! - **Listing**: decoder for the tab/newline listing wire format
//! - **Codes**: per-family guest error-code tables
//! - **Types**: entries, usage figures and disk versions
//!
//! # Example
//!
//! ```ignore
//! use flashfs_core::prelude::*;
//!
//! let mount = FsConfig::new(FsFamily::LittleFs)
//!     .with_block_count(128)
//!     .resolve()?;
//! assert_eq!(mount.geometry.capacity_bytes(), 4096 * 128);
//!
//! let path = normalize_file_path("\\docs//readme.txt")?;
//! assert_eq!(path, "docs/readme.txt");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codes;
pub mod config;
pub mod error;
pub mod listing;
pub mod path;
pub mod prelude;
pub mod types;

pub use codes::ErrorDomain;
pub use config::{FsConfig, Geometry, MountConfig};
pub use error::{FsError, Result};
pub use types::{DiskVersion, Entry, EntryKind, FsFamily, Usage};
