//! Client for the path-oriented `lfsjs_*` LittleFS build.
//!
//! Same on-disk format as the handle-based build, different surface: the
//! engine mounts inside `init`, has no mount, unmount or cleanup export,
//! lists one directory subtree per call into a caller-sized buffer and
//! removes whole trees itself when asked to.

use super::{DeleteOptions, Filesystem};
use crate::arena::MemoryArena;
use crate::lifecycle::EngineDriver;
use crate::listing::ListBuffer;
use flashfs_core::codes::{LFSJS, lfs};
use flashfs_core::config::{Geometry, MountConfig};
use flashfs_core::error::{FsError, Result};
use flashfs_core::path::{check_segment_lengths, normalize_dir_path, normalize_file_path};
use flashfs_core::types::{Entry, FsFamily, Usage};

/// `lfsjs` export names.
pub mod exports {
    /// `init(block_size, block_count, lookahead) -> code`. Mounts.
    pub const INIT: &str = "lfsjs_init";
    /// `init_from_image(block_size, block_count, lookahead, ptr, len) -> code`.
    pub const INIT_FROM_IMAGE: &str = "lfsjs_init_from_image";
    /// `format() -> code`.
    pub const FORMAT: &str = "lfsjs_format";
    /// `list(path, dest, cap) -> bytes | code`.
    pub const LIST: &str = "lfsjs_list";
    /// `add_file(path, src, len) -> code`.
    pub const ADD_FILE: &str = "lfsjs_add_file";
    /// `remove(path, recursive) -> code`.
    pub const REMOVE: &str = "lfsjs_remove";
    /// `mkdir(path) -> code`.
    pub const MKDIR: &str = "lfsjs_mkdir";
    /// `rename(old, new) -> code`.
    pub const RENAME: &str = "lfsjs_rename";
    /// `export_image(dest, cap) -> bytes | code`.
    pub const EXPORT_IMAGE: &str = "lfsjs_export_image";
    /// `storage_size() -> bytes`.
    pub const STORAGE_SIZE: &str = "lfsjs_storage_size";
    /// `file_size(path) -> size | code`.
    pub const FILE_SIZE: &str = "lfsjs_file_size";
    /// `read_file(path, dest, cap) -> bytes | code`.
    pub const READ_FILE: &str = "lfsjs_read_file";
}

/// Lifecycle exports of an `lfsjs` engine.
///
/// The engine has no mount export; an image it cannot mount makes
/// `init_from_image` return `CORRUPT`. The driver holds that code back and
/// reports it as the mount result, so the controller's format-and-retry
/// applies to this family too.
#[derive(Debug)]
pub struct LfsJsDriver {
    arena: MemoryArena,
    list_buffer_size: usize,
    params: Option<[i32; 3]>,
    deferred_mount: Option<i32>,
}

impl LfsJsDriver {
    /// Wrap an uninitialized engine. `list_buffer_size` is where listings
    /// start.
    pub fn new(arena: MemoryArena, list_buffer_size: usize) -> Self {
        Self {
            arena,
            list_buffer_size,
            params: None,
            deferred_mount: None,
        }
    }

    fn params(mount: &MountConfig) -> [i32; 3] {
        [
            mount.geometry.block_size as i32,
            mount.geometry.block_count as i32,
            mount.lookahead_size as i32,
        ]
    }
}

impl EngineDriver for LfsJsDriver {
    type Client = LfsJsClient;

    fn family(&self) -> FsFamily {
        FsFamily::LfsJs
    }

    fn init(&mut self, mount: &MountConfig) -> Result<i32> {
        let params = Self::params(mount);
        self.params = Some(params);
        self.arena.call(exports::INIT, &params)
    }

    fn init_from_image(&mut self, image: &[u8], mount: &MountConfig) -> Result<i32> {
        let [block_size, block_count, lookahead] = Self::params(mount);
        self.params = Some([block_size, block_count, lookahead]);
        let mut scope = self.arena.scope();
        let source = scope.write_bytes(image)?;
        let code = scope.call(
            exports::INIT_FROM_IMAGE,
            &[
                block_size,
                block_count,
                lookahead,
                source.arg(),
                source.len_arg(),
            ],
        )?;
        if code == lfs::CORRUPT {
            tracing::debug!(code, "Image did not mount");
            self.deferred_mount = Some(code);
            return Ok(0);
        }
        Ok(code)
    }

    fn format(&mut self) -> Result<i32> {
        if self.deferred_mount.is_some() {
            // The failed image left the engine without a volume.
            let Some(params) = self.params else {
                return Ok(lfs::INVAL);
            };
            let code = self.arena.call(exports::INIT, &params)?;
            if code < 0 {
                return Ok(code);
            }
        }
        let code = self.arena.call(exports::FORMAT, &[])?;
        if code >= 0 {
            self.deferred_mount = None;
        }
        Ok(code)
    }

    fn mount(&mut self) -> Result<Option<i32>> {
        Ok(self.deferred_mount)
    }

    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }

    fn into_client(self, mount: &MountConfig) -> LfsJsClient {
        LfsJsClient {
            arena: self.arena,
            geometry: mount.geometry,
            list_buffer: ListBuffer::new(self.list_buffer_size),
            storage_size: 0,
            closed: false,
        }
    }
}

/// A mounted `lfsjs` volume.
#[derive(Debug)]
pub struct LfsJsClient {
    arena: MemoryArena,
    geometry: Geometry,
    list_buffer: ListBuffer,
    storage_size: usize,
    closed: bool,
}

impl LfsJsClient {
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

    fn file_path(path: &str) -> Result<String> {
        let path = normalize_file_path(path)?;
        check_segment_lengths(&path, lfs::NAME_MAX)?;
        Ok(path)
    }

    /// Device size, asked once and remembered.
    fn storage_size(&mut self) -> Result<usize> {
        if self.storage_size == 0 {
            let size = self.arena.call(exports::STORAGE_SIZE, &[])?;
            self.storage_size = LFSJS.check(size, || "read storage size".to_string())? as usize;
        }
        Ok(self.storage_size)
    }
}

impl Filesystem for LfsJsClient {
    fn family(&self) -> FsFamily {
        FsFamily::LfsJs
    }

    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn format(&mut self) -> Result<()> {
        self.ensure_open()?;
        let code = self.arena.call(exports::FORMAT, &[])?;
        LFSJS.check(code, || "format filesystem".to_string())?;
        Ok(())
    }

    fn list(&mut self, path: &str) -> Result<Vec<Entry>> {
        self.ensure_open()?;
        let dir = normalize_dir_path(path)?;
        check_segment_lengths(&dir, lfs::NAME_MAX)?;
        self.list_buffer
            .fetch(&mut self.arena, exports::LIST, Some(&dir), &LFSJS)
    }

    fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let path = Self::file_path(path)?;
        let mut scope = self.arena.scope();
        let path_arg = scope.write_c_string(&path)?;

        let size = scope.call(exports::FILE_SIZE, &[path_arg.arg()])?;
        let size = LFSJS.check(size, || format!("stat file \"{}\"", path))? as usize;
        if size == 0 {
            return Ok(Vec::new());
        }

        let dest = scope.alloc(size)?;
        let read = scope.call(
            exports::READ_FILE,
            &[path_arg.arg(), dest.arg(), dest.len_arg()],
        )?;
        let read = LFSJS.check(read, || format!("read file \"{}\"", path))? as usize;
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
            exports::ADD_FILE,
            &[path_arg.arg(), source.arg(), data.len() as i32],
        )?;
        LFSJS.check_space(code, || format!("add file \"{}\"", path))?;
        Ok(())
    }

    fn delete(&mut self, path: &str, options: DeleteOptions) -> Result<()> {
        self.ensure_open()?;
        let path = Self::file_path(path)?;
        let mut scope = self.arena.scope();
        let path_arg = scope.write_c_string(&path)?;
        let code = scope.call(
            exports::REMOVE,
            &[path_arg.arg(), i32::from(options.recursive)],
        )?;
        let action = || {
            if options.recursive {
                format!("delete \"{}\" (recursive)", path)
            } else {
                format!("delete \"{}\"", path)
            }
        };
        match LFSJS.check(code, action) {
            Ok(_) => Ok(()),
            Err(e) if options.recursive && e.is_not_found() => {
                tracing::debug!(path = %path, "Delete target already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        self.ensure_open()?;
        let path = Self::file_path(path)?;
        let mut scope = self.arena.scope();
        let path_arg = scope.write_c_string(&path)?;
        let code = scope.call(exports::MKDIR, &[path_arg.arg()])?;
        if code == LFSJS.exists {
            return Ok(());
        }
        LFSJS.check_space(code, || format!("mkdir \"{}\"", path))?;
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
        LFSJS.check_space(code, || format!("rename \"{}\" to \"{}\"", from, to))?;
        Ok(())
    }

    fn to_image(&mut self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let size = self.storage_size()?;
        if size == 0 {
            return Ok(Vec::new());
        }

        let mut scope = self.arena.scope();
        let dest = scope.alloc(size)?;
        let written = scope.call(exports::EXPORT_IMAGE, &[dest.arg(), dest.len_arg()])?;
        let written = LFSJS.check(written, || "export filesystem image".to_string())? as usize;
        if written != size {
            return Err(FsError::InvalidImage {
                cause: format!("engine exported {} of {} bytes", written, size),
            });
        }
        scope.read_bytes(dest.ptr(), size)
    }

    /// The engine cannot report usage.
    fn usage(&mut self) -> Result<Usage> {
        self.ensure_open()?;
        Ok(Usage::all_free(self.geometry.capacity_bytes()))
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            tracing::debug!(guest = self.arena.guest_name(), "lfsjs client closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleController;
    use crate::testing::{SimMonitor, SimulatedEngine};
    use flashfs_core::config::FsConfig;

    fn start(config: FsConfig) -> (LfsJsClient, SimMonitor) {
        let engine = SimulatedEngine::lfsjs();
        let monitor = engine.monitor();
        let mount = config.with_block_count(128).resolve().unwrap();
        let driver = LfsJsDriver::new(MemoryArena::new(Box::new(engine)), mount.list_buffer_size);
        let client = LifecycleController::new(driver, mount).start().unwrap();
        (client, monitor)
    }

    fn client() -> (LfsJsClient, SimMonitor) {
        start(FsConfig::lfsjs())
    }

    #[test]
    fn init_mounts_without_format() {
        let (mut fs, monitor) = client();
        fs.write("a.txt", b"abc").unwrap();
        assert_eq!(fs.read("/a.txt").unwrap(), b"abc");
        assert_eq!(monitor.calls(exports::FORMAT), 0);
        assert_eq!(monitor.live_allocations(), 0);
    }

    #[test]
    fn format_on_init_calls_format() {
        let (_fs, monitor) = start(FsConfig::lfsjs().with_format_on_init(true));
        assert_eq!(monitor.calls(exports::FORMAT), 1);
    }

    #[test]
    fn recursive_delete_is_one_engine_call() {
        let (mut fs, monitor) = client();
        fs.mkdir("a").unwrap();
        fs.mkdir("a/b").unwrap();
        fs.write("a/b/c.txt", b"c").unwrap();

        let err = fs.delete("a", DeleteOptions::default()).unwrap_err();
        assert_eq!(err.guest_code(), Some(lfs::NOTEMPTY));
        fs.delete("a", DeleteOptions::recursive()).unwrap();
        assert_eq!(monitor.calls(exports::REMOVE), 2);
        assert!(fs.list("/").unwrap().is_empty());

        fs.delete("a", DeleteOptions::recursive()).unwrap();
        assert!(fs.delete("a", DeleteOptions::default()).unwrap_err().is_not_found());
    }

    #[test]
    fn listing_is_per_directory_with_kinds() {
        let (mut fs, _monitor) = client();
        fs.mkdir("d").unwrap();
        fs.write("d/x.bin", &[1, 2]).unwrap();
        fs.write("top.txt", b"t").unwrap();

        assert_eq!(
            fs.list("d").unwrap(),
            vec![Entry::file("/d/x.bin", 2)]
        );
        let root = fs.list("/").unwrap();
        assert!(root.contains(&Entry::dir("/d")));
        assert!(root.contains(&Entry::file("/top.txt", 1)));
    }

    #[test]
    fn storage_size_is_asked_once() {
        let (mut fs, monitor) = client();
        let first = fs.to_image().unwrap();
        let second = fs.to_image().unwrap();
        assert_eq!(first.len(), 512 * 128);
        assert_eq!(first, second);
        assert_eq!(monitor.calls(exports::STORAGE_SIZE), 1);
        assert_eq!(monitor.live_allocations(), 0);
    }

    #[test]
    fn usage_is_all_free() {
        let (mut fs, _monitor) = client();
        fs.write("a", &[0; 2048]).unwrap();
        let usage = fs.usage().unwrap();
        assert_eq!(usage.capacity_bytes, 512 * 128);
        assert_eq!(usage.free_bytes, usage.capacity_bytes);
    }

    #[test]
    fn long_names_stay_on_the_host() {
        let (mut fs, monitor) = client();
        let name = "n".repeat(lfs::NAME_MAX + 1);
        assert!(fs.write(&name, b"x").unwrap_err().is_host_validation());
        assert_eq!(monitor.calls(exports::ADD_FILE), 0);
    }

    #[test]
    fn closed_client_refuses_work() {
        let (mut fs, _monitor) = client();
        fs.close().unwrap();
        fs.close().unwrap();
        assert!(matches!(fs.list("/"), Err(FsError::Closed)));
    }
}
