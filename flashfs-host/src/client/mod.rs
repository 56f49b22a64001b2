//! Filesystem clients.
//!
//! The three engine families offer near-identical operations through
//! incompatible export tables, so each has its own client behind the
//! shared [`Filesystem`] trait. Nothing is shared beneath the trait except
//! the arena, marshalling and listing helpers.
//!
//! Every operation follows the same shape: refuse if closed, normalize the
//! path, marshal arguments inside an arena scope, call the export, translate
//! the return code through the family's error domain, copy results out.
//! The scope releases every allocation before the operation returns.

mod fatfs;
mod lfsjs;
mod littlefs;

pub use fatfs::{FatFsClient, FatFsDriver};
pub use lfsjs::{LfsJsClient, LfsJsDriver};
pub use littlefs::{LittleFsClient, LittleFsDriver};

use flashfs_core::config::Geometry;
use flashfs_core::error::Result;
use flashfs_core::types::{DiskVersion, Entry, FsFamily, Usage};
use std::fmt;

/// Options for [`Filesystem::delete`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Delete directory contents first, and succeed when the target is
    /// already gone.
    pub recursive: bool,
}

impl DeleteOptions {
    /// Options for a recursive delete.
    pub const fn recursive() -> Self {
        Self { recursive: true }
    }
}

/// A mounted filesystem backed by a guest engine.
///
/// Operations take `&mut self`: a client has exclusive use of its guest
/// memory and directory iterators, so callers sharing one across tasks
/// must serialize access themselves (for example behind a mutex).
pub trait Filesystem: Send + fmt::Debug {
    /// Engine family.
    fn family(&self) -> FsFamily;

    /// Block geometry fixed at creation.
    fn geometry(&self) -> Geometry;

    /// Recreate empty on-disk structures. The client stays usable.
    fn format(&mut self) -> Result<()>;

    /// List a directory. An empty path or `/` lists the root.
    fn list(&mut self, path: &str) -> Result<Vec<Entry>>;

    /// Read a whole file.
    fn read(&mut self, path: &str) -> Result<Vec<u8>>;

    /// Create or replace a file.
    ///
    /// A full device fails with `CapacityExhausted`.
    fn write(&mut self, path: &str, data: &[u8]) -> Result<()>;

    /// Delete a file or directory.
    fn delete(&mut self, path: &str, options: DeleteOptions) -> Result<()>;

    /// Create a directory. Creating an existing directory succeeds.
    fn mkdir(&mut self, path: &str) -> Result<()>;

    /// Rename or move an entry.
    fn rename(&mut self, from: &str, to: &str) -> Result<()>;

    /// Copy out the raw device image.
    fn to_image(&mut self) -> Result<Vec<u8>>;

    /// Storage usage. Advisory: falls back to "all free" when the engine
    /// cannot report it.
    fn usage(&mut self) -> Result<Usage>;

    /// On-disk version of the mounted volume, for engines that track one.
    fn disk_version(&mut self) -> Result<Option<DiskVersion>> {
        Ok(None)
    }

    /// Check whether `size` more bytes fit, according to [`usage`](Self::usage).
    fn can_fit(&mut self, size: u64) -> Result<bool> {
        Ok(self.usage()?.free_bytes >= size)
    }

    /// Unmount and release engine resources. Idempotent; every later
    /// operation fails with `Closed`.
    fn close(&mut self) -> Result<()>;

    /// Check whether [`close`](Self::close) has run.
    fn is_closed(&self) -> bool;
}

impl<F: Filesystem + ?Sized> Filesystem for Box<F> {
    fn family(&self) -> FsFamily {
        (**self).family()
    }

    fn geometry(&self) -> Geometry {
        (**self).geometry()
    }

    fn format(&mut self) -> Result<()> {
        (**self).format()
    }

    fn list(&mut self, path: &str) -> Result<Vec<Entry>> {
        (**self).list(path)
    }

    fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path)
    }

    fn write(&mut self, path: &str, data: &[u8]) -> Result<()> {
        (**self).write(path, data)
    }

    fn delete(&mut self, path: &str, options: DeleteOptions) -> Result<()> {
        (**self).delete(path, options)
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        (**self).mkdir(path)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        (**self).rename(from, to)
    }

    fn to_image(&mut self) -> Result<Vec<u8>> {
        (**self).to_image()
    }

    fn usage(&mut self) -> Result<Usage> {
        (**self).usage()
    }

    fn disk_version(&mut self) -> Result<Option<DiskVersion>> {
        (**self).disk_version()
    }

    fn can_fit(&mut self, size: u64) -> Result<bool> {
        (**self).can_fit(size)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}
