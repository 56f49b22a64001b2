//! FatFs client.
//!
//! FatFs mounts lazily on first access and copies its image into
//! host-allocated memory. Its listing export takes no path: it writes
//! every file on the volume as `path\tsize` records into a caller-sized
//! buffer, so directories never appear and listing one directory means
//! filtering on the host. `mkdir`, `rename`, `mount` and `fs_stat` are
//! optional exports: engines built without them report
//! [`FsError::Unsupported`] or fall back.

use super::{DeleteOptions, Filesystem};
use crate::arena::MemoryArena;
use crate::lifecycle::EngineDriver;
use crate::listing::ListBuffer;
use flashfs_core::codes::{FATFS, fatfs};
use flashfs_core::config::{Geometry, MountConfig};
use flashfs_core::error::{FsError, Result};
use flashfs_core::listing::within_dir;
use flashfs_core::path::{normalize_dir_path, normalize_file_path, parent};
use flashfs_core::types::{Entry, FsFamily, Usage};
use std::cmp::Reverse;
use std::collections::BTreeSet;

/// FatFs export names.
pub mod exports {
    /// `init(block_size, block_count) -> code`.
    pub const INIT: &str = "fatfsjs_init";
    /// `init_from_image(block_size, block_count, ptr, len) -> code`.
    pub const INIT_FROM_IMAGE: &str = "fatfsjs_init_from_image";
    /// `format() -> code`.
    pub const FORMAT: &str = "fatfsjs_format";
    /// `mount() -> code`. Optional.
    pub const MOUNT: &str = "fatfsjs_mount";
    /// `list(dest, cap) -> bytes | code`. Every file on the volume.
    pub const LIST: &str = "fatfsjs_list";
    /// `file_size(path) -> size | code`.
    pub const FILE_SIZE: &str = "fatfsjs_file_size";
    /// `read_file(path, dest, cap) -> bytes | code`.
    pub const READ_FILE: &str = "fatfsjs_read_file";
    /// `write_file(path, src, len) -> code`.
    pub const WRITE_FILE: &str = "fatfsjs_write_file";
    /// `delete_file(path) -> code`.
    pub const DELETE_FILE: &str = "fatfsjs_delete_file";
    /// `mkdir(path) -> code`. Optional.
    pub const MKDIR: &str = "fatfsjs_mkdir";
    /// `rename(old, new) -> code`. Optional.
    pub const RENAME: &str = "fatfsjs_rename";
    /// `storage_size() -> bytes`.
    pub const STORAGE_SIZE: &str = "fatfsjs_storage_size";
    /// `export_image(dest, cap) -> bytes | code`.
    pub const EXPORT_IMAGE: &str = "fatfsjs_export_image";
    /// `fs_stat(used_ptr, total_ptr) -> code`. Optional.
    pub const FS_STAT: &str = "fatfsjs_fs_stat";
    /// `cleanup()`. Optional.
    pub const CLEANUP: &str = "fatfsjs_cleanup";
}

/// Lifecycle exports of a FatFs engine.
#[derive(Debug)]
pub struct FatFsDriver {
    arena: MemoryArena,
    list_buffer_size: usize,
}

impl FatFsDriver {
    /// Wrap an uninitialized engine. `list_buffer_size` is where listings
    /// start at.
    pub fn new(arena: MemoryArena, list_buffer_size: usize) -> Self {
        Self {
            arena,
            list_buffer_size,
        }
    }
}

impl EngineDriver for FatFsDriver {
    type Client = FatFsClient;

    fn family(&self) -> FsFamily {
        FsFamily::FatFs
    }

    fn init(&mut self, mount: &MountConfig) -> Result<i32> {
        self.arena.call(
            exports::INIT,
            &[
                mount.geometry.block_size as i32,
                mount.geometry.block_count as i32,
            ],
        )
    }

    fn init_from_image(&mut self, image: &[u8], mount: &MountConfig) -> Result<i32> {
        let mut scope = self.arena.scope();
        let source = scope.write_bytes(image)?;
        scope.call(
            exports::INIT_FROM_IMAGE,
            &[
                mount.geometry.block_size as i32,
                mount.geometry.block_count as i32,
                source.arg(),
                source.len_arg(),
            ],
        )
    }

    fn format(&mut self) -> Result<i32> {
        self.arena.call(exports::FORMAT, &[])
    }

    fn mount(&mut self) -> Result<Option<i32>> {
        if !self.arena.has_export(exports::MOUNT) {
            return Ok(None);
        }
        self.arena.call(exports::MOUNT, &[]).map(Some)
    }

    fn cleanup(&mut self) -> Result<()> {
        if self.arena.has_export(exports::CLEANUP) {
            self.arena.call(exports::CLEANUP, &[])?;
        }
        Ok(())
    }

    fn into_client(self, mount: &MountConfig) -> FatFsClient {
        FatFsClient {
            arena: self.arena,
            geometry: mount.geometry,
            list_buffer: ListBuffer::new(self.list_buffer_size),
            closed: false,
        }
    }
}

/// A mounted FatFs volume.
#[derive(Debug)]
pub struct FatFsClient {
    arena: MemoryArena,
    geometry: Geometry,
    list_buffer: ListBuffer,
    closed: bool,
}

impl FatFsClient {
    /// The arena, for inspection.
    pub fn arena(&self) -> &MemoryArena {
        &self.arena
    }

    /// Capacity the next listing starts at.
    pub fn list_buffer_capacity(&self) -> usize {
        self.list_buffer.capacity()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(FsError::Closed);
        }
        Ok(())
    }

    fn require(&self, export: &str, operation: &'static str) -> Result<()> {
        if self.arena.has_export(export) {
            Ok(())
        } else {
            Err(FsError::Unsupported {
                family: FsFamily::FatFs,
                operation,
            })
        }
    }

    fn delete_one(&mut self, path: &str, tolerate_missing: bool) -> Result<()> {
        let mut scope = self.arena.scope();
        let path_arg = scope.write_c_string(path)?;
        let code = scope.call(exports::DELETE_FILE, &[path_arg.arg()])?;
        match FATFS.check(code, || format!("delete \"{}\"", path)) {
            Ok(_) => Ok(()),
            Err(e) if tolerate_missing && e.is_not_found() => {
                tracing::debug!(path, "Delete target already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Files below the normalized directory `dir`.
    fn files_under(&mut self, dir: &str) -> Result<Vec<Entry>> {
        let files = self
            .list_buffer
            .fetch(&mut self.arena, exports::LIST, None, &FATFS)?;
        Ok(files
            .into_iter()
            .filter(|entry| within_dir(dir, &entry.path))
            .collect())
    }

    /// Deletes the files below `path` deepest first, then the directories
    /// their paths pass through, then `path` itself.
    ///
    /// Directories holding no file anywhere below them never show up in a
    /// listing, so deleting `path` fails if it still contains one.
    fn delete_tree(&mut self, path: &str) -> Result<()> {
        let dir = normalize_dir_path(path)?;
        let mut files = Vec::new();
        for entry in self.files_under(&dir)? {
            files.push(normalize_file_path(&entry.path)?);
        }

        let mut dirs = BTreeSet::new();
        for file in &files {
            let mut current = file.as_str();
            while let Some(up) = parent(current) {
                if up.len() <= path.len() {
                    break;
                }
                dirs.insert(up.to_string());
                current = up;
            }
        }

        files.sort_by_key(|file| Reverse(file.matches('/').count()));
        for file in &files {
            self.delete_one(file, true)?;
        }
        let mut dirs: Vec<String> = dirs.into_iter().collect();
        dirs.sort_by_key(|dir| Reverse(dir.matches('/').count()));
        for dir in &dirs {
            self.delete_one(dir, true)?;
        }

        tracing::debug!(path, files = files.len(), dirs = dirs.len(), "Deleted tree");
        self.delete_one(path, true)
    }
}

impl Filesystem for FatFsClient {
    fn family(&self) -> FsFamily {
        FsFamily::FatFs
    }

    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn format(&mut self) -> Result<()> {
        self.ensure_open()?;
        let code = self.arena.call(exports::FORMAT, &[])?;
        FATFS.check(code, || "format filesystem".to_string())?;
        Ok(())
    }

    fn list(&mut self, path: &str) -> Result<Vec<Entry>> {
        self.ensure_open()?;
        let dir = normalize_dir_path(path)?;
        self.files_under(&dir)
    }

    fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let path = normalize_file_path(path)?;
        let mut scope = self.arena.scope();
        let path_arg = scope.write_c_string(&path)?;

        let size = scope.call(exports::FILE_SIZE, &[path_arg.arg()])?;
        let size = FATFS.check(size, || format!("stat file \"{}\"", path))? as usize;
        if size == 0 {
            return Ok(Vec::new());
        }

        let dest = scope.alloc(size)?;
        let read = scope.call(
            exports::READ_FILE,
            &[path_arg.arg(), dest.arg(), dest.len_arg()],
        )?;
        let read = FATFS.check(read, || format!("read file \"{}\"", path))? as usize;
        scope.read_bytes(dest.ptr(), read.min(size))
    }

    fn write(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let path = normalize_file_path(path)?;
        tracing::debug!(path = %path, bytes = data.len(), "Writing file");

        let mut scope = self.arena.scope();
        let path_arg = scope.write_c_string(&path)?;
        let source = scope.write_bytes(data)?;
        let code = scope.call(
            exports::WRITE_FILE,
            &[path_arg.arg(), source.arg(), data.len() as i32],
        )?;
        FATFS.check_space(code, || format!("write file \"{}\"", path))?;
        Ok(())
    }

    fn delete(&mut self, path: &str, options: DeleteOptions) -> Result<()> {
        self.ensure_open()?;
        let path = normalize_file_path(path)?;
        if options.recursive {
            self.delete_tree(&path)
        } else {
            self.delete_one(&path, false)
        }
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        self.ensure_open()?;
        self.require(exports::MKDIR, "mkdir")?;
        let path = normalize_file_path(path)?;
        let mut scope = self.arena.scope();
        let path_arg = scope.write_c_string(&path)?;
        let code = scope.call(exports::MKDIR, &[path_arg.arg()])?;
        if code == FATFS.exists {
            return Ok(());
        }
        FATFS.check_space(code, || format!("create directory \"{}\"", path))?;
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.ensure_open()?;
        self.require(exports::RENAME, "rename")?;
        let from = normalize_file_path(from)?;
        let to = normalize_file_path(to)?;
        let mut scope = self.arena.scope();
        let from_arg = scope.write_c_string(&from)?;
        let to_arg = scope.write_c_string(&to)?;
        let code = scope.call(exports::RENAME, &[from_arg.arg(), to_arg.arg()])?;
        FATFS.check(code, || format!("rename \"{}\" to \"{}\"", from, to))?;
        Ok(())
    }

    fn to_image(&mut self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let size = self.arena.call(exports::STORAGE_SIZE, &[])?;
        let size = FATFS.check(size, || "read storage size".to_string())? as usize;
        if size == 0 {
            return Ok(Vec::new());
        }

        let mut scope = self.arena.scope();
        let dest = scope.alloc(size)?;
        let written = scope.call(exports::EXPORT_IMAGE, &[dest.arg(), dest.len_arg()])?;
        let written = FATFS.check(written, || "export image".to_string())? as usize;
        if written != size {
            return Err(FsError::InvalidImage {
                cause: format!("engine exported {} of {} bytes", written, size),
            });
        }
        scope.read_bytes(dest.ptr(), size)
    }

    fn usage(&mut self) -> Result<Usage> {
        self.ensure_open()?;
        let capacity = self.geometry.capacity_bytes();
        if !self.arena.has_export(exports::FS_STAT) {
            return Ok(Usage::all_free(capacity));
        }

        let mut scope = self.arena.scope();
        let used = scope.alloc_zeroed(4)?;
        let total = scope.alloc_zeroed(4)?;
        let code = scope.call(exports::FS_STAT, &[used.arg(), total.arg()])?;
        if code < 0 {
            tracing::warn!(code, "Engine could not report usage, assuming all free");
            return Ok(Usage::all_free(capacity));
        }

        Ok(Usage::from_blocks(
            u64::from(scope.read_u32(used.ptr())?),
            u64::from(scope.read_u32(total.ptr())?),
            u64::from(self.geometry.block_size),
        ))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.arena.has_export(exports::CLEANUP) {
            self.arena.call(exports::CLEANUP, &[])?;
        }
        tracing::debug!(guest = self.arena.guest_name(), "FatFs client closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for FatFsClient {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close FatFs client on drop");
        }
    }
}
