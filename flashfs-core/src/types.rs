//! Value types produced and consumed by filesystem clients.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The guest engine families this crate knows how to drive.
///
/// The families expose near-identical operations through ABI-incompatible
/// export tables, so each has its own client. Two of them wrap LittleFS:
/// `LittleFs` speaks the handle/iterator `lfs_wasm_*` ABI, `LfsJs` the
/// flat-listing `lfsjs_*` ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsFamily {
    /// Log-structured, power-loss resilient LittleFS.
    #[default]
    #[serde(alias = "lfs")]
    LittleFs,
    /// LittleFS behind the `lfsjs_*` export table.
    #[serde(alias = "littlefs-js")]
    LfsJs,
    /// FAT12/16/32 via FatFs.
    #[serde(alias = "fat")]
    FatFs,
}

impl FsFamily {
    /// Every family.
    pub const ALL: [FsFamily; 3] = [Self::LittleFs, Self::LfsJs, Self::FatFs];

    /// Short lowercase name, as used in configuration files.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LittleFs => "littlefs",
            Self::LfsJs => "lfsjs",
            Self::FatFs => "fatfs",
        }
    }

    /// Check whether the engine is LittleFS (lookahead window, name limit).
    pub const fn is_littlefs(self) -> bool {
        matches!(self, Self::LittleFs | Self::LfsJs)
    }
}

impl fmt::Display for FsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FsFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "littlefs" | "lfs" => Ok(Self::LittleFs),
            "lfsjs" | "littlefs-js" => Ok(Self::LfsJs),
            "fatfs" | "fat" => Ok(Self::FatFs),
            other => Err(format!("unknown filesystem family '{}'", other)),
        }
    }
}

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file.
    #[default]
    File,
    /// Directory.
    #[serde(rename = "dir")]
    Directory,
}

impl EntryKind {
    /// Check if this is a directory.
    pub const fn is_dir(self) -> bool {
        matches!(self, Self::Directory)
    }
}

/// A snapshot of one directory entry. Not a live handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    /// Absolute path of the entry (`/dir/file`).
    pub path: String,
    /// Size in bytes; zero for directories.
    pub size: u64,
    /// File or directory.
    pub kind: EntryKind,
}

impl Entry {
    /// Create a file entry.
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            kind: EntryKind::File,
        }
    }

    /// Create a directory entry.
    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            kind: EntryKind::Directory,
        }
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Check if this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Number of path segments, used to order deletions deepest first.
    pub fn depth(&self) -> usize {
        self.path.split('/').filter(|s| !s.is_empty()).count()
    }
}

/// Storage usage figures in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Total capacity.
    pub capacity_bytes: u64,
    /// Bytes occupied by allocated blocks.
    pub used_bytes: u64,
    /// Bytes still available.
    pub free_bytes: u64,
}

impl Usage {
    /// Compute usage from guest-reported block counts.
    pub fn from_blocks(blocks_used: u64, blocks_total: u64, block_size: u64) -> Self {
        let capacity_bytes = blocks_total * block_size;
        let used_bytes = blocks_used * block_size;
        Self {
            capacity_bytes,
            used_bytes,
            free_bytes: capacity_bytes.saturating_sub(used_bytes),
        }
    }

    /// Advisory fallback when the guest cannot report usage: everything free.
    pub fn all_free(capacity_bytes: u64) -> Self {
        Self {
            capacity_bytes,
            used_bytes: 0,
            free_bytes: capacity_bytes,
        }
    }
}

/// On-media format version marker (`major << 16 | minor`).
///
/// Deserializes from either the raw integer or a `"major.minor"` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "DiskVersionRepr", into = "u32")]
pub struct DiskVersion(pub u32);

#[derive(Deserialize)]
#[serde(untagged)]
enum DiskVersionRepr {
    Raw(u32),
    Text(String),
}

impl TryFrom<DiskVersionRepr> for DiskVersion {
    type Error = String;

    fn try_from(repr: DiskVersionRepr) -> Result<Self, Self::Error> {
        match repr {
            DiskVersionRepr::Raw(raw) => Ok(Self(raw)),
            DiskVersionRepr::Text(text) => text.parse(),
        }
    }
}

impl From<DiskVersion> for u32 {
    fn from(version: DiskVersion) -> Self {
        version.0
    }
}

impl DiskVersion {
    /// LittleFS on-disk version 2.0, readable by every v2 implementation.
    pub const V2_0: Self = Self(0x0002_0000);
    /// LittleFS on-disk version 2.1.
    pub const V2_1: Self = Self(0x0002_0001);

    /// Build a version from its parts.
    pub const fn new(major: u16, minor: u16) -> Self {
        Self(((major as u32) << 16) | minor as u32)
    }

    /// Major component.
    pub const fn major(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Minor component.
    pub const fn minor(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    /// Raw encoded value.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl Default for DiskVersion {
    fn default() -> Self {
        Self::V2_0
    }
}

impl fmt::Display for DiskVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

impl FromStr for DiskVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| format!("disk version '{}' is not of the form major.minor", s))?;
        let major = major
            .trim()
            .parse::<u16>()
            .map_err(|e| format!("invalid major version '{}': {}", major, e))?;
        let minor = minor
            .trim()
            .parse::<u16>()
            .map_err(|e| format!("invalid minor version '{}': {}", minor, e))?;
        Ok(Self::new(major, minor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_parsing() {
        assert_eq!("littlefs".parse::<FsFamily>().unwrap(), FsFamily::LittleFs);
        assert_eq!("FAT".parse::<FsFamily>().unwrap(), FsFamily::FatFs);
        assert_eq!("littlefs-js".parse::<FsFamily>().unwrap(), FsFamily::LfsJs);
        assert!("ext4".parse::<FsFamily>().is_err());
        assert_eq!(FsFamily::FatFs.to_string(), "fatfs");
        assert_eq!(FsFamily::LfsJs.to_string(), "lfsjs");
        assert!(FsFamily::LfsJs.is_littlefs());
        assert!(!FsFamily::FatFs.is_littlefs());
    }

    #[test]
    fn entry_helpers() {
        let entry = Entry::file("/docs/readme.txt", 12);
        assert_eq!(entry.name(), "readme.txt");
        assert_eq!(entry.depth(), 2);
        assert!(!entry.is_dir());
        assert!(Entry::dir("/docs").is_dir());
    }

    #[test]
    fn usage_from_blocks() {
        let usage = Usage::from_blocks(3, 10, 512);
        assert_eq!(usage.capacity_bytes, 5120);
        assert_eq!(usage.used_bytes, 1536);
        assert_eq!(usage.free_bytes, 3584);

        // Guest over-reporting never underflows.
        let usage = Usage::from_blocks(12, 10, 512);
        assert_eq!(usage.free_bytes, 0);
    }

    #[test]
    fn disk_version_display_and_parse() {
        assert_eq!(DiskVersion::V2_0.to_string(), "2.0");
        assert_eq!(DiskVersion::V2_1.to_string(), "2.1");
        assert_eq!("2.1".parse::<DiskVersion>().unwrap(), DiskVersion::V2_1);
        assert_eq!(DiskVersion::new(2, 1).raw(), 0x0002_0001);
        assert!("two".parse::<DiskVersion>().is_err());
    }
}
