//! Filesystem configuration.
//!
//! [`FsConfig`] is what users write (in code or YAML); every field is
//! optional and falls back to a family default. [`FsConfig::resolve`] turns
//! it into a validated [`MountConfig`], which is what the lifecycle
//! controller actually consumes. Geometry is fixed once resolved: changing
//! block size or count means creating a new filesystem.

use crate::error::{FsError, Result};
use crate::types::{DiskVersion, FsFamily};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default LittleFS block size (ESP32 flash erase unit).
pub const LITTLEFS_DEFAULT_BLOCK_SIZE: u32 = 4096;
/// Default LittleFS block count (1 MiB partition).
pub const LITTLEFS_DEFAULT_BLOCK_COUNT: u32 = 256;
/// Default LittleFS lookahead window in bytes.
pub const LITTLEFS_DEFAULT_LOOKAHEAD: u32 = 32;
/// Default block size of the `lfsjs` engine.
pub const LFSJS_DEFAULT_BLOCK_SIZE: u32 = 512;
/// Default block count of the `lfsjs` engine (256 KiB).
pub const LFSJS_DEFAULT_BLOCK_COUNT: u32 = 512;
/// Default FatFs sector size.
pub const FATFS_DEFAULT_BLOCK_SIZE: u32 = 512;
/// Default FatFs sector count (512 KiB volume).
pub const FATFS_DEFAULT_BLOCK_COUNT: u32 = 1024;
/// Initial capacity of the flat listing buffer.
pub const DEFAULT_LIST_BUFFER_SIZE: usize = 4096;

/// Environment variable overriding the LittleFS module location.
pub const LITTLEFS_MODULE_ENV: &str = "FLASHFS_LITTLEFS_WASM";
/// Environment variable overriding the `lfsjs` module location.
pub const LFSJS_MODULE_ENV: &str = "FLASHFS_LFSJS_WASM";
/// Environment variable overriding the FatFs module location.
pub const FATFS_MODULE_ENV: &str = "FLASHFS_FATFS_WASM";

/// User-facing filesystem options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct FsConfig {
    /// Engine family.
    pub family: FsFamily,

    /// Physical erase-unit size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_size: Option<u32>,

    /// Number of blocks. Inferred from the image length on import.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_count: Option<u32>,

    /// Allocator lookahead window (LittleFS only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookahead_size: Option<u32>,

    /// On-format version selector (LittleFS only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_version: Option<DiskVersion>,

    /// Format immediately after init.
    pub format_on_init: bool,

    /// Format and retry once when mounting fails.
    pub auto_format_on_mount_failure: bool,

    /// Location of the compiled guest module.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_path: Option<PathBuf>,

    /// Initial capacity of the flat listing buffer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_buffer_size: Option<usize>,
}

/// Block geometry of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    /// Block size in bytes.
    pub block_size: u32,
    /// Number of blocks.
    pub block_count: u32,
}

impl Geometry {
    /// Create a geometry.
    pub const fn new(block_size: u32, block_count: u32) -> Self {
        Self {
            block_size,
            block_count,
        }
    }

    /// Total size in bytes; also the exact length of an image.
    pub const fn capacity_bytes(&self) -> u64 {
        self.block_size as u64 * self.block_count as u64
    }
}

/// Validated configuration handed to the lifecycle controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    /// Engine family.
    pub family: FsFamily,
    /// Block geometry.
    pub geometry: Geometry,
    /// Lookahead window; ignored by FatFs.
    pub lookahead_size: u32,
    /// Version applied before a fresh format; `None` when the engine has
    /// no version selector.
    pub disk_version: Option<DiskVersion>,
    /// Format immediately after init.
    pub format_on_init: bool,
    /// Format and retry once when mounting fails.
    pub auto_format_on_mount_failure: bool,
    /// Initial capacity of the flat listing buffer.
    pub list_buffer_size: usize,
}

impl FsConfig {
    /// Create a configuration with all defaults for `family`.
    pub fn new(family: FsFamily) -> Self {
        Self {
            family,
            ..Self::default()
        }
    }

    /// Default LittleFS configuration.
    pub fn littlefs() -> Self {
        Self::new(FsFamily::LittleFs)
    }

    /// Default configuration for the path-oriented LittleFS engine.
    pub fn lfsjs() -> Self {
        Self::new(FsFamily::LfsJs)
    }

    /// Default FatFs configuration.
    pub fn fatfs() -> Self {
        Self::new(FsFamily::FatFs)
    }

    /// Set the block size.
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = Some(block_size);
        self
    }

    /// Set the block count.
    pub fn with_block_count(mut self, block_count: u32) -> Self {
        self.block_count = Some(block_count);
        self
    }

    /// Set the lookahead window.
    pub fn with_lookahead_size(mut self, lookahead_size: u32) -> Self {
        self.lookahead_size = Some(lookahead_size);
        self
    }

    /// Select the on-disk version used by fresh formats.
    pub fn with_disk_version(mut self, version: DiskVersion) -> Self {
        self.disk_version = Some(version);
        self
    }

    /// Format immediately after init.
    pub fn with_format_on_init(mut self, enabled: bool) -> Self {
        self.format_on_init = enabled;
        self
    }

    /// Format and retry once when mounting fails.
    pub fn with_auto_format_on_mount_failure(mut self, enabled: bool) -> Self {
        self.auto_format_on_mount_failure = enabled;
        self
    }

    /// Set the guest module location.
    pub fn with_module_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.module_path = Some(path.into());
        self
    }

    /// Set the initial listing buffer capacity.
    pub fn with_list_buffer_size(mut self, size: usize) -> Self {
        self.list_buffer_size = Some(size);
        self
    }

    /// Parse a configuration from YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| FsError::InvalidConfig {
            cause: e.to_string(),
        })
    }

    /// Load a configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| FsError::Io {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| FsError::InvalidConfig {
            cause: e.to_string(),
        })
    }

    /// Where to find the guest module: explicit path, then the family's
    /// environment variable, then a default file name in the working
    /// directory.
    pub fn module_location(&self) -> PathBuf {
        if let Some(path) = &self.module_path {
            return path.clone();
        }
        let (env, default_name) = match self.family {
            FsFamily::LittleFs => (LITTLEFS_MODULE_ENV, "littlefs.wasm"),
            FsFamily::LfsJs => (LFSJS_MODULE_ENV, "littlefs.wasm"),
            FsFamily::FatFs => (FATFS_MODULE_ENV, "fatfs.wasm"),
        };
        match std::env::var_os(env) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => PathBuf::from(default_name),
        }
    }

    fn default_geometry(&self) -> Geometry {
        match self.family {
            FsFamily::LittleFs => {
                Geometry::new(LITTLEFS_DEFAULT_BLOCK_SIZE, LITTLEFS_DEFAULT_BLOCK_COUNT)
            }
            FsFamily::LfsJs => Geometry::new(LFSJS_DEFAULT_BLOCK_SIZE, LFSJS_DEFAULT_BLOCK_COUNT),
            FsFamily::FatFs => Geometry::new(FATFS_DEFAULT_BLOCK_SIZE, FATFS_DEFAULT_BLOCK_COUNT),
        }
    }

    /// Resolve defaults and validate, for a fresh filesystem.
    pub fn resolve(&self) -> Result<MountConfig> {
        let defaults = self.default_geometry();
        let geometry = Geometry::new(
            self.block_size.unwrap_or(defaults.block_size),
            self.block_count.unwrap_or(defaults.block_count),
        );
        self.finish(geometry)
    }

    /// Resolve defaults and validate against an image of `image_len` bytes.
    ///
    /// The block count is inferred from the image when not configured; the
    /// image must be an exact multiple of the block size either way.
    pub fn resolve_for_image(&self, image_len: usize) -> Result<MountConfig> {
        let block_size = self
            .block_size
            .unwrap_or(self.default_geometry().block_size);
        if block_size == 0 {
            return Err(invalid_config("block_size must be a positive integer"));
        }
        if image_len == 0 {
            return Err(FsError::InvalidImage {
                cause: "image is empty".to_string(),
            });
        }

        let image_len = image_len as u64;
        if image_len % u64::from(block_size) != 0 {
            return Err(FsError::InvalidImage {
                cause: format!(
                    "image length {} is not a multiple of the block size {}",
                    image_len, block_size
                ),
            });
        }

        let inferred = image_len / u64::from(block_size);
        let block_count = match self.block_count {
            Some(count) if u64::from(count) != inferred => {
                return Err(FsError::InvalidImage {
                    cause: format!(
                        "image size must equal block_size * block_count ({} * {} != {})",
                        block_size, count, image_len
                    ),
                });
            }
            Some(count) => count,
            None => u32::try_from(inferred).map_err(|_| FsError::InvalidImage {
                cause: format!("image of {} bytes has too many blocks", image_len),
            })?,
        };

        self.finish(Geometry::new(block_size, block_count))
    }

    fn finish(&self, geometry: Geometry) -> Result<MountConfig> {
        if geometry.block_size == 0 {
            return Err(invalid_config("block_size must be a positive integer"));
        }
        if geometry.block_count == 0 {
            return Err(invalid_config("block_count must be a positive integer"));
        }
        if geometry.capacity_bytes() > u64::from(u32::MAX) {
            return Err(invalid_config(format!(
                "volume of {} bytes does not fit a 32-bit guest",
                geometry.capacity_bytes()
            )));
        }

        let lookahead_size = self.lookahead_size.unwrap_or(LITTLEFS_DEFAULT_LOOKAHEAD);
        if self.family.is_littlefs() && (lookahead_size == 0 || lookahead_size % 8 != 0) {
            return Err(invalid_config(format!(
                "lookahead_size must be a positive multiple of 8, got {}",
                lookahead_size
            )));
        }

        let list_buffer_size = self.list_buffer_size.unwrap_or(DEFAULT_LIST_BUFFER_SIZE);
        if list_buffer_size == 0 {
            return Err(invalid_config("list_buffer_size must be a positive integer"));
        }

        let disk_version = match self.family {
            FsFamily::LittleFs => Some(self.disk_version.unwrap_or_default()),
            FsFamily::LfsJs | FsFamily::FatFs => None,
        };

        Ok(MountConfig {
            family: self.family,
            geometry,
            lookahead_size,
            disk_version,
            format_on_init: self.format_on_init,
            auto_format_on_mount_failure: self.auto_format_on_mount_failure,
            list_buffer_size,
        })
    }
}

fn invalid_config(cause: impl Into<String>) -> FsError {
    FsError::InvalidConfig {
        cause: cause.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_defaults() {
        let lfs = FsConfig::littlefs().resolve().unwrap();
        assert_eq!(lfs.geometry, Geometry::new(4096, 256));
        assert_eq!(lfs.lookahead_size, 32);
        assert_eq!(lfs.disk_version, Some(DiskVersion::V2_0));
        assert_eq!(lfs.list_buffer_size, 4096);

        let fat = FsConfig::fatfs().resolve().unwrap();
        assert_eq!(fat.geometry, Geometry::new(512, 1024));
        assert_eq!(fat.disk_version, None);

        let js = FsConfig::lfsjs().resolve().unwrap();
        assert_eq!(js.geometry, Geometry::new(512, 512));
        assert_eq!(js.lookahead_size, 32);
        assert_eq!(js.disk_version, None);
    }

    #[test]
    fn lfsjs_validates_lookahead() {
        assert!(FsConfig::lfsjs().with_lookahead_size(20).resolve().is_err());
        assert!(FsConfig::lfsjs().with_lookahead_size(64).resolve().is_ok());
    }

    #[test]
    fn builder_overrides() {
        let mount = FsConfig::littlefs()
            .with_block_size(512)
            .with_block_count(64)
            .with_lookahead_size(16)
            .with_disk_version(DiskVersion::V2_1)
            .with_auto_format_on_mount_failure(true)
            .resolve()
            .unwrap();
        assert_eq!(mount.geometry.capacity_bytes(), 512 * 64);
        assert_eq!(mount.lookahead_size, 16);
        assert_eq!(mount.disk_version, Some(DiskVersion::V2_1));
        assert!(mount.auto_format_on_mount_failure);
        assert!(!mount.format_on_init);
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(FsConfig::littlefs().with_block_size(0).resolve().is_err());
        assert!(FsConfig::fatfs().with_block_count(0).resolve().is_err());
        assert!(FsConfig::littlefs().with_lookahead_size(12).resolve().is_err());
        let err = FsConfig::littlefs()
            .with_block_size(65536)
            .with_block_count(u32::MAX)
            .resolve()
            .unwrap_err();
        assert_eq!(err.code(), "E203");
    }

    #[test]
    fn fatfs_ignores_lookahead() {
        assert!(FsConfig::fatfs().with_lookahead_size(12).resolve().is_ok());
    }

    #[test]
    fn image_block_count_is_inferred() {
        let mount = FsConfig::fatfs().resolve_for_image(512 * 40).unwrap();
        assert_eq!(mount.geometry, Geometry::new(512, 40));
    }

    #[test]
    fn image_length_is_validated() {
        let err = FsConfig::fatfs().resolve_for_image(1000).unwrap_err();
        assert!(matches!(err, FsError::InvalidImage { .. }));

        let err = FsConfig::fatfs().resolve_for_image(0).unwrap_err();
        assert!(matches!(err, FsError::InvalidImage { .. }));

        let err = FsConfig::littlefs()
            .with_block_count(8)
            .resolve_for_image(4096 * 4)
            .unwrap_err();
        assert!(err.is_host_validation());

        assert!(
            FsConfig::littlefs()
                .with_block_count(4)
                .resolve_for_image(4096 * 4)
                .is_ok()
        );
    }

    #[test]
    fn yaml_round_trip() {
        let config = FsConfig::from_yaml_str(
            r#"
family: fatfs
block_size: 4096
format_on_init: true
"#,
        )
        .unwrap();
        assert_eq!(config.family, FsFamily::FatFs);
        assert_eq!(config.block_size, Some(4096));
        assert_eq!(config.block_count, None);
        assert!(config.format_on_init);

        let yaml = config.to_yaml().unwrap();
        assert_eq!(FsConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn yaml_disk_version_accepts_text() {
        let config = FsConfig::from_yaml_str("disk_version: \"2.1\"").unwrap();
        assert_eq!(config.disk_version, Some(DiskVersion::V2_1));
        let config = FsConfig::from_yaml_str("disk_version: 131072").unwrap();
        assert_eq!(config.disk_version, Some(DiskVersion::V2_0));
    }

    #[test]
    fn yaml_rejects_unknown_family() {
        let err = FsConfig::from_yaml_str("family: ext4").unwrap_err();
        assert_eq!(err.code(), "E203");
    }

    #[test]
    fn explicit_module_path_wins() {
        let config = FsConfig::fatfs().with_module_path("/opt/engines/fat.wasm");
        assert_eq!(config.module_location(), PathBuf::from("/opt/engines/fat.wasm"));
    }
}
