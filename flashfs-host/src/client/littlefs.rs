//! LittleFS client.
//!
//! LittleFS takes NUL-terminated paths, lists directories through a
//! handle/iterator API, needs an explicit mount (also after a format) and
//! exposes its RAM device directly, so image export copies from an
//! engine-owned pointer.

use super::{DeleteOptions, Filesystem};
use crate::arena::MemoryArena;
use crate::lifecycle::EngineDriver;
use crate::listing::{DirExports, read_dir};
use flashfs_core::codes::{LITTLEFS, lfs};
use flashfs_core::config::{Geometry, MountConfig};
use flashfs_core::error::{FsError, Result};
use flashfs_core::path::{check_segment_lengths, normalize_dir_path, normalize_file_path};
use flashfs_core::types::{DiskVersion, Entry, FsFamily, Usage};

/// LittleFS export names.
pub mod exports {
    /// `set_disk_version(version)`.
    pub const SET_DISK_VERSION: &str = "lfs_wasm_set_disk_version";
    /// `init(block_size, block_count, lookahead) -> code`.
    pub const INIT: &str = "lfs_wasm_init";
    /// `init_from_image(ptr, len, block_size, block_count, lookahead) -> code`.
    pub const INIT_FROM_IMAGE: &str = "lfs_wasm_init_from_image";
    /// `format() -> code`.
    pub const FORMAT: &str = "lfs_wasm_format";
    /// `mount() -> code`.
    pub const MOUNT: &str = "lfs_wasm_mount";
    /// `unmount() -> code`.
    pub const UNMOUNT: &str = "lfs_wasm_unmount";
    /// `cleanup()`.
    pub const CLEANUP: &str = "lfs_wasm_cleanup";
    /// `dir_open(path) -> handle | code`.
    pub const DIR_OPEN: &str = "lfs_wasm_dir_open";
    /// `dir_read(handle, name, name_cap, type, size) -> 1 | 0 | code`.
    pub const DIR_READ: &str = "lfs_wasm_dir_read";
    /// `dir_close(handle) -> code`.
    pub const DIR_CLOSE: &str = "lfs_wasm_dir_close";
    /// `file_size(path) -> size | code`.
    pub const FILE_SIZE: &str = "lfs_wasm_file_size";
    /// `read_file(path, dest, cap) -> bytes | code`.
    pub const READ_FILE: &str = "lfs_wasm_read_file";
    /// `write_file(path, src, len) -> code`.
    pub const WRITE_FILE: &str = "lfs_wasm_write_file";
    /// `remove(path) -> code`.
    pub const REMOVE: &str = "lfs_wasm_remove";
    /// `mkdir(path) -> code`.
    pub const MKDIR: &str = "lfs_wasm_mkdir";
    /// `rename(old, new) -> code`.
    pub const RENAME: &str = "lfs_wasm_rename";
    /// `get_image_size() -> size`.
    pub const GET_IMAGE_SIZE: &str = "lfs_wasm_get_image_size";
    /// `get_image() -> ptr`, borrowed from the engine.
    pub const GET_IMAGE: &str = "lfs_wasm_get_image";
    /// `fs_stat(used_ptr, total_ptr) -> code`.
    pub const FS_STAT: &str = "lfs_wasm_fs_stat";
    /// `get_fs_info(version_ptr) -> code`.
    pub const GET_FS_INFO: &str = "lfs_wasm_get_fs_info";
}

const DIR_EXPORTS: DirExports = DirExports {
    open: exports::DIR_OPEN,
    read: exports::DIR_READ,
    close: exports::DIR_CLOSE,
    dir_type: lfs::TYPE_DIR,
    name_max: lfs::NAME_MAX,
};

/// Lifecycle exports of a LittleFS engine.
#[derive(Debug)]
pub struct LittleFsDriver {
    arena: MemoryArena,
}

impl LittleFsDriver {
    /// Wrap an uninitialized engine.
    pub fn new(arena: MemoryArena) -> Self {
        Self { arena }
    }
}

impl EngineDriver for LittleFsDriver {
    type Client = LittleFsClient;

    fn family(&self) -> FsFamily {
        FsFamily::LittleFs
    }

    fn set_disk_version(&mut self, version: DiskVersion) -> Result<()> {
        if self.arena.has_export(exports::SET_DISK_VERSION) {
            self.arena
                .call(exports::SET_DISK_VERSION, &[version.raw() as i32])?;
        }
        Ok(())
    }

    fn init(&mut self, mount: &MountConfig) -> Result<i32> {
        let Geometry {
            block_size,
            block_count,
        } = mount.geometry;
        self.arena.call(
            exports::INIT,
            &[
                block_size as i32,
                block_count as i32,
                mount.lookahead_size as i32,
            ],
        )
    }

    fn init_from_image(&mut self, image: &[u8], mount: &MountConfig) -> Result<i32> {
        let mut scope = self.arena.scope();
        let source = scope.write_bytes(image)?;
        scope.call(
            exports::INIT_FROM_IMAGE,
            &[
                source.arg(),
                source.len_arg(),
                mount.geometry.block_size as i32,
                mount.geometry.block_count as i32,
                mount.lookahead_size as i32,
            ],
        )
    }

    fn format(&mut self) -> Result<i32> {
        self.arena.call(exports::FORMAT, &[])
    }

    fn mount(&mut self) -> Result<Option<i32>> {
        self.arena.call(exports::MOUNT, &[]).map(Some)
    }

    fn cleanup(&mut self) -> Result<()> {
        if self.arena.has_export(exports::CLEANUP) {
            self.arena.call(exports::CLEANUP, &[])?;
        }
        Ok(())
    }

    fn into_client(self, mount: &MountConfig) -> LittleFsClient {
        LittleFsClient {
            arena: self.arena,
            geometry: mount.geometry,
            closed: false,
        }
    }
}

/// A mounted LittleFS volume.
#[derive(Debug)]
pub struct LittleFsClient {
    arena: MemoryArena,
    geometry: Geometry,
    closed: bool,
}

impl LittleFsClient {
    /// Select the on-disk version written by the next [`format`](Filesystem::format).
    pub fn set_disk_version(&mut self, version: DiskVersion) -> Result<()> {
        self.ensure_open()?;
        if !self.arena.has_export(exports::SET_DISK_VERSION) {
            return Err(FsError::Unsupported {
                family: FsFamily::LittleFs,
                operation: "set_disk_version",
            });
        }
        self.arena
            .call(exports::SET_DISK_VERSION, &[version.raw() as i32])?;
        Ok(())
    }

    /// The arena, for inspection.
    pub fn arena(&self) -> &MemoryArena {
        &self.arena
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(FsError::Closed);
        }
        Ok(())
    }

    fn file_path(path: &str) -> Result<String> {
        let path = normalize_file_path(path)?;
        check_segment_lengths(&path, lfs::NAME_MAX)?;
        Ok(path)
    }

    /// Remove one entry. With `tolerate_missing`, a target that is already
    /// gone is not an error.
    fn remove(&mut self, path: &str, tolerate_missing: bool) -> Result<()> {
        let mut scope = self.arena.scope();
        let path_arg = scope.write_c_string(path)?;
        let code = scope.call(exports::REMOVE, &[path_arg.arg()])?;
        match LITTLEFS.check(code, || format!("delete \"{}\"", path)) {
            Ok(_) => Ok(()),
            Err(e) if tolerate_missing && e.is_not_found() => {
                tracing::debug!(path, "Delete target already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Delete everything below `path`, then `path` itself.
    fn remove_tree(&mut self, path: &str) -> Result<()> {
        let dir = normalize_dir_path(path)?;
        let entries = match read_dir(&mut self.arena, &DIR_EXPORTS, &dir, &LITTLEFS) {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() || e.guest_code() == Some(lfs::NOTDIR) => Vec::new(),
            Err(e) => return Err(e),
        };

        for entry in entries {
            let child = normalize_file_path(&entry.path)?;
            if entry.is_dir() {
                self.remove_tree(&child)?;
            } else {
                self.remove(&child, false)?;
            }
        }
        self.remove(path, true)
    }

    fn mount(&mut self) -> Result<()> {
        let code = self.arena.call(exports::MOUNT, &[])?;
        if code < 0 {
            return Err(FsError::Mount {
                family: FsFamily::LittleFs,
                code,
            });
        }
        Ok(())
    }
}

impl Filesystem for LittleFsClient {
    fn family(&self) -> FsFamily {
        FsFamily::LittleFs
    }

    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn format(&mut self) -> Result<()> {
        self.ensure_open()?;
        let code = self.arena.call(exports::FORMAT, &[])?;
        LITTLEFS.check(code, || "format filesystem".to_string())?;
        self.mount()
    }

    fn list(&mut self, path: &str) -> Result<Vec<Entry>> {
        self.ensure_open()?;
        let dir = normalize_dir_path(path)?;
        check_segment_lengths(&dir, lfs::NAME_MAX)?;
        read_dir(&mut self.arena, &DIR_EXPORTS, &dir, &LITTLEFS)
    }

    fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let path = Self::file_path(path)?;
        let mut scope = self.arena.scope();
        let path_arg = scope.write_c_string(&path)?;

        let size = scope.call(exports::FILE_SIZE, &[path_arg.arg()])?;
        let size = LITTLEFS.check(size, || format!("stat file \"{}\"", path))? as usize;
        if size == 0 {
            return Ok(Vec::new());
        }

        let dest = scope.alloc(size)?;
        let read = scope.call(
            exports::READ_FILE,
            &[path_arg.arg(), dest.arg(), dest.len_arg()],
        )?;
        let read = LITTLEFS.check(read, || format!("read file \"{}\"", path))? as usize;
        scope.read_bytes(dest.ptr(), read.min(size))
    }

    fn write(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let path = Self::file_path(path)?;
        tracing::debug!(path = %path, bytes = data.len(), "Writing file");

        let mut scope = self.arena.scope();
        let path_arg = scope.write_c_string(&path)?;
        let source = scope.write_bytes(data)?;
        let code = scope.call(
            exports::WRITE_FILE,
            &[path_arg.arg(), source.arg(), data.len() as i32],
        )?;
        LITTLEFS.check_space(code, || format!("write file \"{}\"", path))?;
        Ok(())
    }

    fn delete(&mut self, path: &str, options: DeleteOptions) -> Result<()> {
        self.ensure_open()?;
        let path = Self::file_path(path)?;
        if options.recursive {
            self.remove_tree(&path)
        } else {
            self.remove(&path, false)
        }
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        self.ensure_open()?;
        let path = Self::file_path(path)?;
        let mut scope = self.arena.scope();
        let path_arg = scope.write_c_string(&path)?;
        let code = scope.call(exports::MKDIR, &[path_arg.arg()])?;
        if code == LITTLEFS.exists {
            return Ok(());
        }
        LITTLEFS.check_space(code, || format!("create directory \"{}\"", path))?;
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.ensure_open()?;
        let from = Self::file_path(from)?;
        let to = Self::file_path(to)?;
        let mut scope = self.arena.scope();
        let from_arg = scope.write_c_string(&from)?;
        let to_arg = scope.write_c_string(&to)?;
        let code = scope.call(exports::RENAME, &[from_arg.arg(), to_arg.arg()])?;
        LITTLEFS.check_space(code, || format!("rename \"{}\" to \"{}\"", from, to))?;
        Ok(())
    }

    fn to_image(&mut self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let size = self.arena.call(exports::GET_IMAGE_SIZE, &[])?;
        let size = LITTLEFS.check(size, || "read image size".to_string())? as usize;
        if size == 0 {
            return Ok(Vec::new());
        }

        // The pointer is the engine's own device buffer; it is copied out
        // and never released.
        let ptr = self.arena.call(exports::GET_IMAGE, &[])? as u32;
        if ptr == 0 {
            return Err(FsError::MemoryAccess {
                offset: 0,
                size: size as u64,
            });
        }
        let image = self.arena.read_bytes(ptr, size)?;

        if image.len() as u64 != self.geometry.capacity_bytes() {
            return Err(FsError::InvalidImage {
                cause: format!(
                    "engine reported {} bytes for a {} byte volume",
                    image.len(),
                    self.geometry.capacity_bytes()
                ),
            });
        }
        Ok(image)
    }

    fn usage(&mut self) -> Result<Usage> {
        self.ensure_open()?;
        let mut scope = self.arena.scope();
        let used = scope.alloc_zeroed(4)?;
        let total = scope.alloc_zeroed(4)?;
        let code = scope.call(exports::FS_STAT, &[used.arg(), total.arg()])?;
        if code < 0 {
            tracing::warn!(code, "Engine could not report usage, assuming all free");
            return Ok(Usage::all_free(self.geometry.capacity_bytes()));
        }

        Ok(Usage::from_blocks(
            u64::from(scope.read_u32(used.ptr())?),
            u64::from(scope.read_u32(total.ptr())?),
            u64::from(self.geometry.block_size),
        ))
    }

    fn disk_version(&mut self) -> Result<Option<DiskVersion>> {
        self.ensure_open()?;
        if !self.arena.has_export(exports::GET_FS_INFO) {
            return Ok(None);
        }
        let mut scope = self.arena.scope();
        let version = scope.alloc_zeroed(4)?;
        let code = scope.call(exports::GET_FS_INFO, &[version.arg()])?;
        if code < 0 {
            tracing::warn!(code, "Engine could not report the disk version");
            return Ok(None);
        }
        Ok(Some(DiskVersion(scope.read_u32(version.ptr())?)))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let unmounted = self
            .arena
            .call(exports::UNMOUNT, &[])
            .and_then(|code| LITTLEFS.check(code, || "unmount filesystem".to_string()));
        let cleaned = if self.arena.has_export(exports::CLEANUP) {
            self.arena.call(exports::CLEANUP, &[]).map(|_| ())
        } else {
            Ok(())
        };
        tracing::debug!(guest = self.arena.guest_name(), "LittleFS client closed");

        unmounted?;
        cleaned
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for LittleFsClient {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close LittleFS client on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleController;
    use crate::testing::{SimMonitor, SimulatedEngine};
    use flashfs_core::config::FsConfig;

    fn client() -> (LittleFsClient, SimMonitor) {
        let engine = SimulatedEngine::littlefs();
        let monitor = engine.monitor();
        let mount = FsConfig::littlefs()
            .with_block_size(512)
            .with_block_count(128)
            .with_format_on_init(true)
            .resolve()
            .unwrap();
        let driver = LittleFsDriver::new(MemoryArena::new(Box::new(engine)));
        let client = LifecycleController::new(driver, mount).start().unwrap();
        (client, monitor)
    }

    #[test]
    fn long_segments_never_reach_the_guest() {
        let (mut fs, monitor) = client();
        let long = "x".repeat(lfs::NAME_MAX + 1);
        let err = fs.write(&long, b"data").unwrap_err();
        assert!(matches!(err, FsError::InvalidPath { .. }));
        assert_eq!(monitor.calls(exports::WRITE_FILE), 0);
        assert_eq!(monitor.calls("malloc"), 0);
    }

    #[test]
    fn format_remounts() {
        let (mut fs, monitor) = client();
        fs.write("a.txt", b"hello").unwrap();
        fs.format().unwrap();
        assert_eq!(monitor.calls(exports::MOUNT), 2);
        assert!(fs.list("/").unwrap().is_empty());
    }

    #[test]
    fn image_pointer_is_not_released() {
        let (mut fs, monitor) = client();
        fs.write("a.txt", b"hello").unwrap();
        let image = fs.to_image().unwrap();
        assert_eq!(image.len(), 512 * 128);
        assert_eq!(monitor.invalid_frees(), 0);
        assert_eq!(monitor.live_allocations(), 0);
    }

    #[test]
    fn disk_version_reports_selected_version() {
        let (mut fs, _monitor) = client();
        assert_eq!(fs.disk_version().unwrap(), Some(DiskVersion::V2_0));

        fs.set_disk_version(DiskVersion::V2_1).unwrap();
        fs.format().unwrap();
        assert_eq!(fs.disk_version().unwrap(), Some(DiskVersion::V2_1));
    }

    #[test]
    fn directory_handle_closed_when_iteration_fails() {
        let (mut fs, monitor) = client();
        fs.write("a.txt", b"1").unwrap();
        monitor.fail_next(exports::DIR_READ, lfs::IO);

        let err = fs.list("/").unwrap_err();
        assert_eq!(err.guest_code(), Some(lfs::IO));
        assert_eq!(monitor.calls(exports::DIR_CLOSE), 1);
        assert_eq!(monitor.live_allocations(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let (mut fs, monitor) = client();
        fs.close().unwrap();
        fs.close().unwrap();
        assert!(fs.is_closed());
        assert_eq!(monitor.calls(exports::UNMOUNT), 1);
        assert_eq!(monitor.calls(exports::CLEANUP), 1);
        assert!(matches!(fs.read("a.txt"), Err(FsError::Closed)));
    }

    #[test]
    fn drop_closes() {
        let (fs, monitor) = client();
        drop(fs);
        assert_eq!(monitor.calls(exports::UNMOUNT), 1);
    }
}
