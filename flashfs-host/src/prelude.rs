//! Prelude for convenient imports.
//!
//! ```ignore
//! use flashfs_host::prelude::*;
//! ```

pub use flashfs_core::prelude::*;

// Clients
pub use crate::client::{DeleteOptions, FatFsClient, Filesystem, LfsJsClient, LittleFsClient};

// Construction
pub use crate::guest::{GuestModule, GuestRuntime, GuestRuntimeConfig, WasmGuest};
pub use crate::loader::{
    create_filesystem, create_filesystem_from_image, start_filesystem,
    start_filesystem_from_image,
};

// Logging
pub use crate::observability::{LogFormat, TracingConfig, init_tracing};
