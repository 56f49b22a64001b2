//! FlashFS Host
//!
//! Drives LittleFS and FatFs engines compiled to WebAssembly, so raw flash
//! images (as flashed to microcontrollers) can be created, inspected and
//! edited from the host.
//!
//! # Layers
//!
//! - **Guest**: the [`GuestModule`](guest::GuestModule) seam and its
//!   wasmtime implementation, with host imports
//! - **Arena**: scoped guest allocations that never outlive an operation,
//!   and byte views that survive memory growth
//! - **Marshal**: strings, byte buffers and integers across the boundary
//! - **Listing**: the grow-and-retry and handle/iterator listing protocols
//! - **Client**: one [`Filesystem`](client::Filesystem) implementation per
//!   engine family
//! - **Lifecycle**: init, format and mount with optional format-and-retry
//! - **Loader**: async module loading and filesystem construction
//! - **Testing**: a simulated engine for deterministic tests
//!
//! # Example
//!
//! ```ignore
//! use flashfs_host::prelude::*;
//!
//! let config = FsConfig::littlefs()
//!     .with_module_path("littlefs.wasm")
//!     .with_format_on_init(true);
//! let mut fs = create_filesystem(&config).await?;
//!
//! fs.mkdir("config")?;
//! fs.write("config/wifi.json", br#"{"ssid":"lab"}"#)?;
//! let image = fs.to_image()?;
//! fs.close()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod client;
pub mod guest;
pub mod lifecycle;
pub mod listing;
pub mod loader;
pub mod marshal;
pub mod observability;
pub mod prelude;
pub mod testing;

pub use client::{DeleteOptions, FatFsClient, Filesystem, LfsJsClient, LittleFsClient};
pub use loader::{
    create_filesystem, create_filesystem_from_image, start_filesystem,
    start_filesystem_from_image,
};
