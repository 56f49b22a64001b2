//! The simulated engine.

use super::volume::{self, Node, Volume, VolumeError};
use super::{Fault, SimMonitor};
use crate::guest::{BufferIdentity, GuestModule};
use flashfs_core::codes::{fatfs, lfs};
use flashfs_core::config::Geometry;
use flashfs_core::error::{FsError, Result};
use flashfs_core::types::{DiskVersion, FsFamily};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

const PAGE_SIZE: usize = 65536;
const HEAP_BASE: u32 = 1024;
const ALIGN: u32 = 8;
const DEFAULT_MAX_PAGES: usize = 1024;

const COMMON_EXPORTS: &[(&str, usize)] = &[("malloc", 1), ("free", 1)];

const LITTLEFS_EXPORTS: &[(&str, usize)] = &[
    ("lfs_wasm_set_disk_version", 1),
    ("lfs_wasm_init", 3),
    ("lfs_wasm_init_from_image", 5),
    ("lfs_wasm_format", 0),
    ("lfs_wasm_mount", 0),
    ("lfs_wasm_unmount", 0),
    ("lfs_wasm_cleanup", 0),
    ("lfs_wasm_dir_open", 1),
    ("lfs_wasm_dir_read", 5),
    ("lfs_wasm_dir_close", 1),
    ("lfs_wasm_file_size", 1),
    ("lfs_wasm_read_file", 3),
    ("lfs_wasm_write_file", 3),
    ("lfs_wasm_remove", 1),
    ("lfs_wasm_mkdir", 1),
    ("lfs_wasm_rename", 2),
    ("lfs_wasm_get_image_size", 0),
    ("lfs_wasm_get_image", 0),
    ("lfs_wasm_fs_stat", 2),
    ("lfs_wasm_get_fs_info", 1),
];

const FATFS_EXPORTS: &[(&str, usize)] = &[
    ("fatfsjs_init", 2),
    ("fatfsjs_init_from_image", 4),
    ("fatfsjs_format", 0),
    ("fatfsjs_mount", 0),
    ("fatfsjs_list", 2),
    ("fatfsjs_file_size", 1),
    ("fatfsjs_read_file", 3),
    ("fatfsjs_write_file", 3),
    ("fatfsjs_delete_file", 1),
    ("fatfsjs_mkdir", 1),
    ("fatfsjs_rename", 2),
    ("fatfsjs_storage_size", 0),
    ("fatfsjs_export_image", 2),
    ("fatfsjs_fs_stat", 2),
    ("fatfsjs_cleanup", 0),
];

const LFSJS_EXPORTS: &[(&str, usize)] = &[
    ("lfsjs_init", 3),
    ("lfsjs_init_from_image", 5),
    ("lfsjs_format", 0),
    ("lfsjs_list", 3),
    ("lfsjs_add_file", 3),
    ("lfsjs_remove", 2),
    ("lfsjs_mkdir", 1),
    ("lfsjs_rename", 2),
    ("lfsjs_export_image", 2),
    ("lfsjs_storage_size", 0),
    ("lfsjs_file_size", 1),
    ("lfsjs_read_file", 3),
];

/// A guest memory access outside linear memory; surfaces as a trap.
struct OutOfBounds;

type Step<T> = std::result::Result<T, OutOfBounds>;

#[derive(Debug, Clone, Copy)]
struct Region {
    len: u32,
    engine_owned: bool,
}

struct DirCursor {
    entries: VecDeque<(String, i32, u32)>,
}

/// Engine state outside linear memory.
struct Disk {
    geometry: Option<Geometry>,
    device: Vec<u8>,
    mounted: Option<Volume>,
    pending_version: u32,
    dirs: HashMap<i32, DirCursor>,
    next_handle: i32,
    image_region: Option<u32>,
}

/// Pure-Rust stand-in for a compiled LittleFS, `lfsjs` or FatFs engine.
pub struct SimulatedEngine {
    family: FsFamily,
    name: String,
    memory: Vec<u8>,
    max_pages: usize,
    regions: BTreeMap<u32, Region>,
    missing: HashSet<String>,
    monitor: SimMonitor,
    disk: Disk,
}

impl SimulatedEngine {
    /// A simulated engine of `family` with one page of memory.
    pub fn new(family: FsFamily) -> Self {
        Self {
            family,
            name: format!("sim-{}", family),
            memory: vec![0; PAGE_SIZE],
            max_pages: DEFAULT_MAX_PAGES,
            regions: BTreeMap::new(),
            missing: HashSet::new(),
            monitor: SimMonitor::default(),
            disk: Disk {
                geometry: None,
                device: Vec::new(),
                mounted: None,
                pending_version: DiskVersion::V2_1.raw(),
                dirs: HashMap::new(),
                next_handle: 0,
                image_region: None,
            },
        }
    }

    /// A simulated LittleFS engine.
    pub fn littlefs() -> Self {
        Self::new(FsFamily::LittleFs)
    }

    /// A simulated `lfsjs` engine.
    pub fn lfsjs() -> Self {
        Self::new(FsFamily::LfsJs)
    }

    /// A simulated FatFs engine.
    pub fn fatfs() -> Self {
        Self::new(FsFamily::FatFs)
    }

    /// Remove an export, as an engine built without it would.
    pub fn without_export(mut self, export: &str) -> Self {
        self.missing.insert(export.to_string());
        self
    }

    /// Cap linear memory at `pages` wasm pages.
    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = pages.max(1);
        self
    }

    /// Shared handle to counters and fault injection.
    pub fn monitor(&self) -> SimMonitor {
        self.monitor.clone()
    }

    /// Make the next call of `export` return `code`.
    pub fn fail_next(&self, export: &str, code: i32) {
        self.monitor.fail_next(export, code);
    }

    fn arity(&self, export: &str) -> Option<usize> {
        let table = match self.family {
            FsFamily::LittleFs => LITTLEFS_EXPORTS,
            FsFamily::LfsJs => LFSJS_EXPORTS,
            FsFamily::FatFs => FATFS_EXPORTS,
        };
        COMMON_EXPORTS
            .iter()
            .chain(table)
            .find(|(name, _)| *name == export)
            .map(|(_, arity)| *arity)
    }

    // ---------------------------------------------------------------------
    // Heap
    // ---------------------------------------------------------------------

    fn malloc(&mut self, size: i32, engine_owned: bool) -> u32 {
        if size < 0 {
            return 0;
        }
        let size = (size as u32).max(1);

        let mut candidate = HEAP_BASE;
        for (&ptr, region) in &self.regions {
            if candidate.saturating_add(size) <= ptr {
                break;
            }
            candidate = candidate.max(align_up(ptr.saturating_add(region.len)));
        }

        let end = candidate as usize + size as usize;
        if end > self.memory.len() && !self.grow_to(end) {
            return 0;
        }

        self.regions.insert(
            candidate,
            Region {
                len: size,
                engine_owned,
            },
        );
        if !engine_owned {
            self.monitor.allocated();
        }
        candidate
    }

    fn free(&mut self, ptr: u32) {
        if ptr == 0 {
            return;
        }
        match self.regions.get(&ptr) {
            Some(region) if !region.engine_owned => {
                self.regions.remove(&ptr);
                self.monitor.freed();
            }
            _ => self.monitor.invalid_free(),
        }
    }

    fn release_engine_region(&mut self, ptr: u32) {
        self.regions.remove(&ptr);
    }

    /// Grow memory to hold `end` bytes. The buffer is reallocated, so its
    /// identity changes.
    fn grow_to(&mut self, end: usize) -> bool {
        let pages = end.div_ceil(PAGE_SIZE);
        if pages > self.max_pages {
            return false;
        }
        let mut grown = vec![0u8; pages * PAGE_SIZE];
        grown[..self.memory.len()].copy_from_slice(&self.memory);
        self.memory = grown;
        self.monitor.grew();
        true
    }

    // ---------------------------------------------------------------------
    // Memory access
    // ---------------------------------------------------------------------

    fn slice(&self, ptr: i32, len: usize) -> Step<&[u8]> {
        let start = ptr as u32 as usize;
        self.memory.get(start..start + len).ok_or(OutOfBounds)
    }

    fn store(&mut self, ptr: i32, bytes: &[u8]) -> Step<()> {
        let start = ptr as u32 as usize;
        self.memory
            .get_mut(start..start + bytes.len())
            .ok_or(OutOfBounds)?
            .copy_from_slice(bytes);
        Ok(())
    }

    fn store_u32(&mut self, ptr: i32, value: u32) -> Step<()> {
        self.store(ptr, &value.to_le_bytes())
    }

    fn c_string(&self, ptr: i32) -> Step<String> {
        let start = ptr as u32 as usize;
        let tail = self.memory.get(start..).ok_or(OutOfBounds)?;
        let end = tail.iter().position(|&b| b == 0).ok_or(OutOfBounds)?;
        Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
    }

    fn path_key(&self, ptr: i32) -> Step<String> {
        Ok(volume::key(&self.c_string(ptr)?))
    }

    // ---------------------------------------------------------------------
    // Volume plumbing
    // ---------------------------------------------------------------------

    fn code(&self, error: VolumeError) -> i32 {
        match self.family {
            FsFamily::LittleFs | FsFamily::LfsJs => match error {
                VolumeError::NotMounted | VolumeError::Invalid => lfs::INVAL,
                VolumeError::NotFound | VolumeError::ParentMissing => lfs::NOENT,
                VolumeError::Exists => lfs::EXIST,
                VolumeError::NotDir => lfs::NOTDIR,
                VolumeError::IsDir => lfs::ISDIR,
                VolumeError::NotEmpty => lfs::NOTEMPTY,
                VolumeError::NoSpace => lfs::NOSPC,
                VolumeError::Corrupt => lfs::CORRUPT,
            },
            FsFamily::FatFs => match error {
                VolumeError::NotMounted => fatfs::NOT_ENABLED,
                VolumeError::Invalid => fatfs::INVALID_NAME,
                VolumeError::NotFound => fatfs::NO_FILE,
                VolumeError::ParentMissing | VolumeError::NotDir => fatfs::NO_PATH,
                VolumeError::Exists => fatfs::EXIST,
                VolumeError::IsDir | VolumeError::NotEmpty | VolumeError::NoSpace => {
                    fatfs::DENIED
                }
                VolumeError::Corrupt => fatfs::NO_FILESYSTEM,
            },
        }
    }

    fn reply(&self, result: std::result::Result<i32, VolumeError>) -> i32 {
        result.unwrap_or_else(|error| self.code(error))
    }

    fn configure(&mut self, block_size: i32, block_count: i32) -> std::result::Result<(), i32> {
        let invalid = match self.family {
            FsFamily::LittleFs | FsFamily::LfsJs => lfs::INVAL,
            FsFamily::FatFs => fatfs::INVALID_PARAMETER,
        };
        if block_size <= 0 || block_count <= 0 {
            return Err(invalid);
        }
        let geometry = Geometry::new(block_size as u32, block_count as u32);
        let capacity = usize::try_from(geometry.capacity_bytes()).map_err(|_| invalid)?;
        self.disk.geometry = Some(geometry);
        self.disk.device = vec![0; capacity];
        self.disk.mounted = None;
        self.disk.dirs.clear();
        Ok(())
    }

    fn empty_volume(&self, geometry: Geometry) -> Volume {
        let version = match self.family {
            FsFamily::LittleFs | FsFamily::LfsJs => self.disk.pending_version,
            FsFamily::FatFs => 0,
        };
        Volume::empty(self.family, geometry, version)
    }

    fn format(&mut self) -> std::result::Result<i32, VolumeError> {
        let geometry = self.disk.geometry.ok_or(VolumeError::NotMounted)?;
        let volume = self.empty_volume(geometry);
        self.persist(&volume)?;
        self.disk.dirs.clear();
        // The handle-based LittleFS build leaves the volume unmounted after
        // a format; the others keep working on the new volume.
        self.disk.mounted = match self.family {
            FsFamily::LittleFs => None,
            FsFamily::LfsJs | FsFamily::FatFs => Some(volume),
        };
        Ok(0)
    }

    fn mount(&mut self) -> std::result::Result<i32, VolumeError> {
        let geometry = self.disk.geometry.ok_or(VolumeError::NotMounted)?;
        let volume = Volume::decode(self.family, geometry, &self.disk.device)?;
        self.disk.mounted = Some(volume);
        Ok(0)
    }

    /// The mounted volume. FatFs mounts on first use.
    fn volume(&mut self) -> std::result::Result<&Volume, VolumeError> {
        if self.disk.mounted.is_none() && self.family == FsFamily::FatFs {
            self.mount()?;
        }
        self.disk.mounted.as_ref().ok_or(VolumeError::NotMounted)
    }

    fn persist(&mut self, volume: &Volume) -> std::result::Result<(), VolumeError> {
        let geometry = self.disk.geometry.ok_or(VolumeError::NotMounted)?;
        if volume.blocks_used() > u64::from(geometry.block_count) {
            return Err(VolumeError::NoSpace);
        }
        let encoded = volume.encode();
        if encoded.len() > self.disk.device.len() {
            return Err(VolumeError::NoSpace);
        }
        self.disk.device[..encoded.len()].copy_from_slice(&encoded);
        self.disk.device[encoded.len()..].fill(0);
        Ok(())
    }

    /// Apply a mutation to a copy of the volume and keep it only if it fits.
    fn commit(
        &mut self,
        change: impl FnOnce(&mut Volume) -> std::result::Result<(), VolumeError>,
    ) -> std::result::Result<i32, VolumeError> {
        let mut next = self.volume()?.clone();
        change(&mut next)?;
        self.persist(&next)?;
        self.disk.mounted = Some(next);
        Ok(0)
    }

    fn stat(&mut self, used_ptr: i32, total_ptr: i32) -> Step<i32> {
        let block_count = match self.disk.geometry {
            Some(geometry) => geometry.block_count,
            None => return Ok(self.code(VolumeError::NotMounted)),
        };
        let used = match self.volume() {
            Ok(volume) => volume.blocks_used(),
            Err(error) => return Ok(self.code(error)),
        };
        self.store_u32(used_ptr, used as u32)?;
        self.store_u32(total_ptr, block_count)?;
        Ok(0)
    }

    fn file_size(&mut self, path: i32) -> Step<i32> {
        let key = self.path_key(path)?;
        let result = self
            .volume()
            .and_then(|volume| volume.read(&key).map(|data| data.len() as i32));
        Ok(self.reply(result))
    }

    fn read_file(&mut self, path: i32, dest: i32, capacity: i32) -> Step<i32> {
        let key = self.path_key(path)?;
        let data = match self.volume().and_then(|volume| volume.read(&key)) {
            Ok(data) => data[..data.len().min(capacity.max(0) as usize)].to_vec(),
            Err(error) => return Ok(self.code(error)),
        };
        self.store(dest, &data)?;
        Ok(data.len() as i32)
    }

    fn write_file(&mut self, path: i32, src: i32, len: i32) -> Step<i32> {
        let key = self.path_key(path)?;
        if len < 0 {
            return Ok(self.code(VolumeError::Invalid));
        }
        let data = if len == 0 {
            Vec::new()
        } else {
            self.slice(src, len as usize)?.to_vec()
        };
        let result = self.commit(|volume| volume.write(&key, data));
        Ok(self.reply(result))
    }

    fn init_from_image(
        &mut self,
        ptr: i32,
        len: i32,
        block_size: i32,
        block_count: i32,
    ) -> Step<i32> {
        if let Err(code) = self.configure(block_size, block_count) {
            return Ok(code);
        }
        if len < 0 || len as usize != self.disk.device.len() {
            self.disk.geometry = None;
            return Ok(match self.family {
                FsFamily::LittleFs | FsFamily::LfsJs => lfs::INVAL,
                FsFamily::FatFs => fatfs::INVALID_PARAMETER,
            });
        }
        let image = self.slice(ptr, len as usize)?.to_vec();
        self.disk.device.copy_from_slice(&image);
        Ok(0)
    }

    fn cleanup(&mut self) {
        if let Some(ptr) = self.disk.image_region.take() {
            self.release_engine_region(ptr);
        }
        self.disk.geometry = None;
        self.disk.device = Vec::new();
        self.disk.mounted = None;
        self.disk.dirs.clear();
    }

    // ---------------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------------

    fn dispatch(&mut self, export: &str, a: &[i32]) -> Step<i32> {
        match export {
            "malloc" => Ok(self.malloc(a[0], false) as i32),
            "free" => {
                self.free(a[0] as u32);
                Ok(0)
            }
            _ => match self.family {
                FsFamily::LittleFs => self.dispatch_littlefs(export, a),
                FsFamily::LfsJs => self.dispatch_lfsjs(export, a),
                FsFamily::FatFs => self.dispatch_fatfs(export, a),
            },
        }
    }

    fn dispatch_littlefs(&mut self, export: &str, a: &[i32]) -> Step<i32> {
        match export {
            "lfs_wasm_set_disk_version" => {
                self.disk.pending_version = a[0] as u32;
                Ok(0)
            }
            "lfs_wasm_init" => {
                if a[2] <= 0 {
                    return Ok(lfs::INVAL);
                }
                Ok(self.configure(a[0], a[1]).err().unwrap_or(0))
            }
            "lfs_wasm_init_from_image" => {
                if a[4] <= 0 {
                    return Ok(lfs::INVAL);
                }
                self.init_from_image(a[0], a[1], a[2], a[3])
            }
            "lfs_wasm_format" => {
                let result = self.format();
                Ok(self.reply(result))
            }
            "lfs_wasm_mount" => {
                let result = self.mount();
                Ok(self.reply(result))
            }
            "lfs_wasm_unmount" => {
                self.disk.mounted = None;
                self.disk.dirs.clear();
                Ok(0)
            }
            "lfs_wasm_cleanup" => {
                self.cleanup();
                Ok(0)
            }
            "lfs_wasm_dir_open" => self.dir_open(a[0]),
            "lfs_wasm_dir_read" => self.dir_read(a[0], a[1], a[2], a[3], a[4]),
            "lfs_wasm_dir_close" => Ok(match self.disk.dirs.remove(&a[0]) {
                Some(_) => 0,
                None => lfs::BADF,
            }),
            "lfs_wasm_file_size" => self.file_size(a[0]),
            "lfs_wasm_read_file" => self.read_file(a[0], a[1], a[2]),
            "lfs_wasm_write_file" => self.write_file(a[0], a[1], a[2]),
            "lfs_wasm_remove" => {
                let key = self.path_key(a[0])?;
                let result = self.commit(|volume| volume.remove(&key));
                Ok(self.reply(result))
            }
            "lfs_wasm_mkdir" => {
                let key = self.path_key(a[0])?;
                let result = self.commit(|volume| volume.mkdir(&key));
                Ok(self.reply(result))
            }
            "lfs_wasm_rename" => {
                let from = self.path_key(a[0])?;
                let to = self.path_key(a[1])?;
                let result = self.commit(|volume| volume.rename(&from, &to, true));
                Ok(self.reply(result))
            }
            "lfs_wasm_get_image_size" => Ok(self.disk.device.len() as i32),
            "lfs_wasm_get_image" => Ok(self.image_pointer() as i32),
            "lfs_wasm_fs_stat" => self.stat(a[0], a[1]),
            "lfs_wasm_get_fs_info" => {
                let version = match self.volume() {
                    Ok(volume) => volume.version(),
                    Err(error) => return Ok(self.code(error)),
                };
                self.store_u32(a[0], version)?;
                Ok(0)
            }
            _ => Ok(lfs::INVAL),
        }
    }

    fn dispatch_fatfs(&mut self, export: &str, a: &[i32]) -> Step<i32> {
        match export {
            "fatfsjs_init" => Ok(self.configure(a[0], a[1]).err().unwrap_or(0)),
            "fatfsjs_init_from_image" => self.init_from_image(a[2], a[3], a[0], a[1]),
            "fatfsjs_format" => {
                let result = self.format();
                Ok(self.reply(result))
            }
            "fatfsjs_mount" => {
                let result = self.mount();
                Ok(self.reply(result))
            }
            "fatfsjs_list" => self.list_files(a[0], a[1]),
            "fatfsjs_file_size" => self.file_size(a[0]),
            "fatfsjs_read_file" => self.read_file(a[0], a[1], a[2]),
            "fatfsjs_write_file" => self.write_file(a[0], a[1], a[2]),
            "fatfsjs_delete_file" => {
                let key = self.path_key(a[0])?;
                let result = self.commit(|volume| volume.remove(&key));
                Ok(self.reply(result))
            }
            "fatfsjs_mkdir" => {
                let key = self.path_key(a[0])?;
                let result = self.commit(|volume| volume.mkdir(&key));
                Ok(self.reply(result))
            }
            "fatfsjs_rename" => {
                let from = self.path_key(a[0])?;
                let to = self.path_key(a[1])?;
                let result = self.commit(|volume| volume.rename(&from, &to, false));
                Ok(self.reply(result))
            }
            "fatfsjs_storage_size" => Ok(self.disk.device.len() as i32),
            "fatfsjs_export_image" => self.export_image(a[0], a[1]),
            "fatfsjs_fs_stat" => self.stat(a[0], a[1]),
            "fatfsjs_cleanup" => {
                self.cleanup();
                Ok(0)
            }
            _ => Ok(fatfs::INVALID_PARAMETER),
        }
    }

    fn dispatch_lfsjs(&mut self, export: &str, a: &[i32]) -> Step<i32> {
        match export {
            "lfsjs_init" => {
                if a[2] <= 0 {
                    return Ok(lfs::INVAL);
                }
                if let Err(code) = self.configure(a[0], a[1]) {
                    return Ok(code);
                }
                let result = self.format();
                Ok(self.reply(result))
            }
            "lfsjs_init_from_image" => {
                if a[2] <= 0 {
                    return Ok(lfs::INVAL);
                }
                let code = self.init_from_image(a[3], a[4], a[0], a[1])?;
                if code < 0 {
                    return Ok(code);
                }
                let result = self.mount();
                Ok(self.reply(result))
            }
            "lfsjs_format" => {
                let result = self.format();
                Ok(self.reply(result))
            }
            "lfsjs_list" => self.list_dir(a[0], a[1], a[2]),
            "lfsjs_add_file" => self.write_file(a[0], a[1], a[2]),
            "lfsjs_remove" => {
                let key = self.path_key(a[0])?;
                let recursive = a[1] != 0;
                let result = self.commit(|volume| {
                    if recursive {
                        volume.remove_tree(&key)
                    } else {
                        volume.remove(&key)
                    }
                });
                Ok(self.reply(result))
            }
            "lfsjs_mkdir" => {
                let key = self.path_key(a[0])?;
                let result = self.commit(|volume| volume.mkdir(&key));
                Ok(self.reply(result))
            }
            "lfsjs_rename" => {
                let from = self.path_key(a[0])?;
                let to = self.path_key(a[1])?;
                let result = self.commit(|volume| volume.rename(&from, &to, true));
                Ok(self.reply(result))
            }
            "lfsjs_export_image" => self.export_image(a[0], a[1]),
            "lfsjs_storage_size" => Ok(self.disk.device.len() as i32),
            "lfsjs_file_size" => self.file_size(a[0]),
            "lfsjs_read_file" => self.read_file(a[0], a[1], a[2]),
            _ => Ok(lfs::INVAL),
        }
    }

    fn export_image(&mut self, dest: i32, capacity: i32) -> Step<i32> {
        let size = self.disk.device.len();
        if size == 0 {
            return Ok(self.code(VolumeError::NotMounted));
        }
        if (capacity.max(0) as usize) < size {
            return Ok(self.code(VolumeError::Invalid));
        }
        let device = self.disk.device.clone();
        self.store(dest, &device)?;
        Ok(size as i32)
    }

    fn dir_open(&mut self, path: i32) -> Step<i32> {
        let key = self.path_key(path)?;
        let entries = match self.volume().and_then(|volume| volume.children(&key)) {
            Ok(children) => {
                let mut entries = VecDeque::with_capacity(children.len() + 2);
                entries.push_back((".".to_string(), lfs::TYPE_DIR, 0));
                entries.push_back(("..".to_string(), lfs::TYPE_DIR, 0));
                for (name, node) in children {
                    entries.push_back(match node {
                        Node::Dir => (name, lfs::TYPE_DIR, 0),
                        Node::File(data) => (name, lfs::TYPE_REG, data.len() as u32),
                    });
                }
                entries
            }
            Err(error) => return Ok(self.code(error)),
        };

        let handle = self.disk.next_handle;
        self.disk.next_handle = self.disk.next_handle.wrapping_add(1).max(0);
        self.disk.dirs.insert(handle, DirCursor { entries });
        Ok(handle)
    }

    fn dir_read(
        &mut self,
        handle: i32,
        name_ptr: i32,
        name_cap: i32,
        type_ptr: i32,
        size_ptr: i32,
    ) -> Step<i32> {
        let Some(cursor) = self.disk.dirs.get_mut(&handle) else {
            return Ok(lfs::BADF);
        };
        let Some((name, kind, size)) = cursor.entries.pop_front() else {
            return Ok(0);
        };

        let name = name.as_bytes();
        let len = name.len().min(name_cap.max(0) as usize);
        let mut out = name[..len].to_vec();
        out.push(0);
        self.store(name_ptr, &out)?;
        self.store(type_ptr, &kind.to_le_bytes())?;
        self.store_u32(size_ptr, size)?;
        Ok(1)
    }

    /// Every file on the volume as `path\tsize` records, the way the FatFs
    /// engine lists.
    fn list_files(&mut self, dest: i32, capacity: i32) -> Step<i32> {
        let payload = match self.volume().and_then(|volume| volume.descendants("")) {
            Ok(nodes) => {
                let mut payload = String::new();
                for (key, node) in nodes {
                    if let Node::File(data) = node {
                        payload.push_str(&format!("/{}\t{}\n", key, data.len()));
                    }
                }
                payload
            }
            Err(error) => return Ok(self.code(error)),
        };
        self.store_listing(&payload, dest, capacity, fatfs::NOT_ENOUGH_CORE)
    }

    /// The subtree below `path` as `path\tsize\ttype` records.
    fn list_dir(&mut self, path: i32, dest: i32, capacity: i32) -> Step<i32> {
        let key = self.path_key(path)?;
        let payload = match self.volume().and_then(|volume| volume.descendants(&key)) {
            Ok(nodes) => {
                let mut payload = String::new();
                for (key, node) in nodes {
                    let (size, kind) = match node {
                        Node::Dir => (0, 'd'),
                        Node::File(data) => (data.len(), 'f'),
                    };
                    payload.push_str(&format!("/{}\t{}\t{}\n", key, size, kind));
                }
                payload
            }
            Err(error) => return Ok(self.code(error)),
        };
        self.store_listing(&payload, dest, capacity, lfs::NOSPC)
    }

    fn store_listing(
        &mut self,
        payload: &str,
        dest: i32,
        capacity: i32,
        too_small: i32,
    ) -> Step<i32> {
        if payload.len() > capacity.max(0) as usize {
            return Ok(too_small);
        }
        self.store(dest, payload.as_bytes())?;
        Ok(payload.len() as i32)
    }

    /// Pointer to an engine-owned copy of the device, as LittleFS hands out
    /// its RAM storage.
    fn image_pointer(&mut self) -> u32 {
        let size = self.disk.device.len();
        if size == 0 {
            return 0;
        }
        if let Some(ptr) = self.disk.image_region.take() {
            self.release_engine_region(ptr);
        }
        let ptr = self.malloc(size as i32, true);
        if ptr == 0 {
            return 0;
        }
        let start = ptr as usize;
        self.memory[start..start + size].copy_from_slice(&self.disk.device);
        self.disk.image_region = Some(ptr);
        ptr
    }
}

fn align_up(value: u32) -> u32 {
    value.div_ceil(ALIGN).saturating_mul(ALIGN)
}

impl GuestModule for SimulatedEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_export(&self, export: &str) -> bool {
        self.arity(export).is_some() && !self.missing.contains(export)
    }

    fn call(&mut self, export: &str, args: &[i32]) -> Result<i32> {
        let fault = self.monitor.record_call(export);
        if !self.has_export(export) {
            return Err(FsError::MissingExport {
                name: export.to_string(),
            });
        }
        let trap = |cause: &str| FsError::Trap {
            export: export.to_string(),
            cause: cause.to_string(),
        };

        match fault {
            Some(Fault::Return(code)) => return Ok(code),
            Some(Fault::Trap) => return Err(trap("injected trap")),
            None => {}
        }

        if self.arity(export) != Some(args.len()) {
            return Err(trap("signature mismatch"));
        }

        self.dispatch(export, args)
            .map_err(|OutOfBounds| trap("memory access out of bounds"))
    }

    fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    fn buffer_identity(&self) -> BufferIdentity {
        BufferIdentity {
            base: self.memory.as_ptr() as usize,
            len: self.memory.len(),
        }
    }
}
