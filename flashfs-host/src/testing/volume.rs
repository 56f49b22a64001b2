//! In-memory volume model behind the simulated engine.
//!
//! A volume is a sorted map from root-relative keys (`a/b.txt`, root is the
//! empty key) to nodes. It is persisted to the simulated block device after
//! every successful mutation, so images taken from the engine carry the
//! whole tree and can be mounted again.
//!
//! Device layout (little-endian):
//!
//! ```text
//! magic[8] version:u32 block_size:u32 block_count:u32 entries:u32
//! entries * { kind:u8 path_len:u16 path data_len:u32 data }
//! zero padding up to block_size * block_count
//! ```

use flashfs_core::config::Geometry;
use flashfs_core::types::FsFamily;
use std::collections::BTreeMap;

const LITTLEFS_MAGIC: &[u8; 8] = b"SIMLFS\0\0";
const FATFS_MAGIC: &[u8; 8] = b"SIMFAT\0\0";
const HEADER_LEN: usize = 8 + 4 * 4;

/// Blocks every formatted volume spends on its own metadata.
pub const METADATA_BLOCKS: u64 = 2;

const KIND_FILE: u8 = 1;
const KIND_DIR: u8 = 2;

/// Failure of a volume operation, translated to family codes by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeError {
    /// No volume is mounted.
    NotMounted,
    /// The target does not exist.
    NotFound,
    /// A parent directory does not exist.
    ParentMissing,
    /// The target already exists.
    Exists,
    /// A path component is a file.
    NotDir,
    /// The target is a directory.
    IsDir,
    /// The directory still has children.
    NotEmpty,
    /// The device cannot hold the result.
    NoSpace,
    /// The device does not hold a valid volume.
    Corrupt,
    /// The operation makes no sense for the target.
    Invalid,
}

/// A file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Directory.
    Dir,
    /// Regular file and its contents.
    File(Vec<u8>),
}

impl Node {
    fn kind(&self) -> u8 {
        match self {
            Self::Dir => KIND_DIR,
            Self::File(_) => KIND_FILE,
        }
    }
}

/// A mounted tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    family: FsFamily,
    geometry: Geometry,
    version: u32,
    nodes: BTreeMap<String, Node>,
}

/// Turn an engine path (`/a/b`, `a/b`, `/`) into a volume key.
pub fn key(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn parent_key(key: &str) -> Option<&str> {
    if key.is_empty() {
        return None;
    }
    Some(key.rsplit_once('/').map_or("", |(parent, _)| parent))
}

fn is_under(key: &str, dir: &str) -> bool {
    dir.is_empty() || key.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

impl Volume {
    /// An empty, freshly formatted volume.
    pub fn empty(family: FsFamily, geometry: Geometry, version: u32) -> Self {
        Self {
            family,
            geometry,
            version,
            nodes: BTreeMap::new(),
        }
    }

    /// On-disk version of this volume.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Node at `key`; the root is always a directory.
    pub fn node(&self, key: &str) -> Option<&Node> {
        static ROOT: Node = Node::Dir;
        if key.is_empty() {
            return Some(&ROOT);
        }
        self.nodes.get(key)
    }

    fn require_parent(&self, key: &str) -> Result<(), VolumeError> {
        match parent_key(key).map(|parent| self.node(parent)) {
            None => Err(VolumeError::Invalid),
            Some(Some(Node::Dir)) => Ok(()),
            Some(Some(Node::File(_))) => Err(VolumeError::NotDir),
            Some(None) => Err(VolumeError::ParentMissing),
        }
    }

    /// Contents of the file at `key`.
    pub fn read(&self, key: &str) -> Result<&[u8], VolumeError> {
        match self.node(key) {
            Some(Node::File(data)) => Ok(data),
            Some(Node::Dir) => Err(VolumeError::IsDir),
            None => Err(VolumeError::NotFound),
        }
    }

    /// Create or replace the file at `key`.
    pub fn write(&mut self, key: &str, data: Vec<u8>) -> Result<(), VolumeError> {
        if let Some(Node::Dir) = self.node(key) {
            return Err(VolumeError::IsDir);
        }
        self.require_parent(key)?;
        self.nodes.insert(key.to_string(), Node::File(data));
        Ok(())
    }

    /// Create the directory at `key`.
    pub fn mkdir(&mut self, key: &str) -> Result<(), VolumeError> {
        if self.node(key).is_some() {
            return Err(VolumeError::Exists);
        }
        self.require_parent(key)?;
        self.nodes.insert(key.to_string(), Node::Dir);
        Ok(())
    }

    /// Remove a file or an empty directory.
    pub fn remove(&mut self, key: &str) -> Result<(), VolumeError> {
        match self.node(key) {
            None => return Err(VolumeError::NotFound),
            Some(_) if key.is_empty() => return Err(VolumeError::Invalid),
            Some(Node::Dir) if self.nodes.keys().any(|k| is_under(k, key)) => {
                return Err(VolumeError::NotEmpty);
            }
            Some(_) => {}
        }
        self.nodes.remove(key);
        Ok(())
    }

    /// Remove `key` and everything below it.
    pub fn remove_tree(&mut self, key: &str) -> Result<(), VolumeError> {
        match self.node(key) {
            None => return Err(VolumeError::NotFound),
            Some(_) if key.is_empty() => return Err(VolumeError::Invalid),
            Some(_) => {}
        }
        self.nodes.retain(|k, _| k != key && !is_under(k, key));
        Ok(())
    }

    /// Move `from` (and everything below it) to `to`.
    ///
    /// With `replace`, an existing file at `to` is overwritten by a file.
    pub fn rename(&mut self, from: &str, to: &str, replace: bool) -> Result<(), VolumeError> {
        let source = self.node(from).cloned().ok_or(VolumeError::NotFound)?;
        if from.is_empty() || to.is_empty() || is_under(to, from) {
            return Err(VolumeError::Invalid);
        }
        if from == to {
            return Ok(());
        }
        match (self.node(to), &source) {
            (None, _) => {}
            (Some(Node::File(_)), Node::File(_)) if replace => {}
            (Some(_), _) => return Err(VolumeError::Exists),
        }
        self.require_parent(to)?;

        let moved: Vec<String> = self
            .nodes
            .keys()
            .filter(|k| is_under(k, from))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = self.nodes.remove(&old) {
                let new = format!("{}{}", to, &old[from.len()..]);
                self.nodes.insert(new, node);
            }
        }
        self.nodes.remove(from);
        self.nodes.insert(to.to_string(), source);
        Ok(())
    }

    /// Direct children of the directory at `key`, as `(name, node)`.
    pub fn children(&self, key: &str) -> Result<Vec<(String, &Node)>, VolumeError> {
        match self.node(key) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => return Err(VolumeError::NotDir),
            None => return Err(VolumeError::NotFound),
        }
        Ok(self
            .nodes
            .iter()
            .filter(|(k, _)| parent_key(k) == Some(key))
            .map(|(k, node)| (k.rsplit('/').next().unwrap_or(k).to_string(), node))
            .collect())
    }

    /// Every node below the directory at `key`, parents first.
    pub fn descendants(&self, key: &str) -> Result<Vec<(&str, &Node)>, VolumeError> {
        match self.node(key) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => return Err(VolumeError::NotDir),
            None => return Err(VolumeError::NotFound),
        }
        Ok(self
            .nodes
            .iter()
            .filter(|(k, _)| is_under(k, key))
            .map(|(k, node)| (k.as_str(), node))
            .collect())
    }

    /// Blocks allocated: metadata, one per directory, and each file rounded
    /// up to whole blocks.
    pub fn blocks_used(&self) -> u64 {
        let block_size = u64::from(self.geometry.block_size);
        METADATA_BLOCKS
            + self
                .nodes
                .values()
                .map(|node| match node {
                    Node::Dir => 1,
                    Node::File(data) => (data.len() as u64).div_ceil(block_size),
                })
                .sum::<u64>()
    }

    /// Serialize to device bytes (unpadded).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(magic(self.family));
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.geometry.block_size.to_le_bytes());
        out.extend_from_slice(&self.geometry.block_count.to_le_bytes());
        out.extend_from_slice(&(self.nodes.len() as u32).to_le_bytes());
        for (path, node) in &self.nodes {
            out.push(node.kind());
            out.extend_from_slice(&(path.len() as u16).to_le_bytes());
            out.extend_from_slice(path.as_bytes());
            let data: &[u8] = match node {
                Node::File(data) => data,
                Node::Dir => &[],
            };
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(data);
        }
        out
    }

    /// Parse device bytes written by [`encode`](Self::encode).
    pub fn decode(family: FsFamily, geometry: Geometry, device: &[u8]) -> Result<Self, VolumeError> {
        let mut reader = Reader { bytes: device, pos: 0 };
        if reader.take(8)? != magic(family) {
            return Err(VolumeError::Corrupt);
        }
        let version = reader.u32()?;
        if reader.u32()? != geometry.block_size || reader.u32()? != geometry.block_count {
            return Err(VolumeError::Corrupt);
        }

        let count = reader.u32()?;
        let mut nodes = BTreeMap::new();
        for _ in 0..count {
            let kind = reader.take(1)?[0];
            let path_len = reader.u16()? as usize;
            let path = std::str::from_utf8(reader.take(path_len)?)
                .map_err(|_| VolumeError::Corrupt)?
                .to_string();
            let data_len = reader.u32()? as usize;
            let data = reader.take(data_len)?.to_vec();
            let node = match kind {
                KIND_FILE => Node::File(data),
                KIND_DIR => Node::Dir,
                _ => return Err(VolumeError::Corrupt),
            };
            nodes.insert(path, node);
        }

        Ok(Self {
            family,
            geometry,
            version,
            nodes,
        })
    }
}

fn magic(family: FsFamily) -> &'static [u8; 8] {
    match family {
        // Both LittleFS builds share one on-disk format.
        FsFamily::LittleFs | FsFamily::LfsJs => LITTLEFS_MAGIC,
        FsFamily::FatFs => FATFS_MAGIC,
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], VolumeError> {
        let end = self.pos.checked_add(len).ok_or(VolumeError::Corrupt)?;
        let slice = self.bytes.get(self.pos..end).ok_or(VolumeError::Corrupt)?;
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, VolumeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, VolumeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume() -> Volume {
        Volume::empty(FsFamily::LittleFs, Geometry::new(512, 64), 0x0002_0000)
    }

    #[test]
    fn keys_are_root_relative() {
        assert_eq!(key("/"), "");
        assert_eq!(key("/a//b/"), "a/b");
        assert_eq!(key("a"), "a");
    }

    #[test]
    fn tree_operations() {
        let mut vol = volume();
        vol.mkdir("d").unwrap();
        vol.write("d/a", b"one".to_vec()).unwrap();
        assert_eq!(vol.write("x/a", vec![]), Err(VolumeError::ParentMissing));
        assert_eq!(vol.mkdir("d"), Err(VolumeError::Exists));
        assert_eq!(vol.remove("d"), Err(VolumeError::NotEmpty));
        assert_eq!(vol.read("d"), Err(VolumeError::IsDir));

        vol.rename("d", "e", false).unwrap();
        assert_eq!(vol.read("e/a").unwrap(), b"one");
        assert_eq!(vol.read("d/a"), Err(VolumeError::NotFound));

        let children = vol.children("").unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].0, "e");
    }

    #[test]
    fn rename_into_itself_is_invalid() {
        let mut vol = volume();
        vol.mkdir("d").unwrap();
        assert_eq!(vol.rename("d", "d/e", false), Err(VolumeError::Invalid));
    }

    #[test]
    fn descendants_are_parents_first() {
        let mut vol = volume();
        vol.mkdir("a").unwrap();
        vol.mkdir("a/b").unwrap();
        vol.write("a/b/c", vec![1]).unwrap();
        vol.write("a-c", vec![1]).unwrap();
        let keys: Vec<&str> = vol.descendants("a").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a/b", "a/b/c"]);
    }

    #[test]
    fn remove_tree_takes_the_subtree_only() {
        let mut vol = volume();
        vol.mkdir("a").unwrap();
        vol.mkdir("a/b").unwrap();
        vol.write("a/b/c", vec![1]).unwrap();
        vol.write("a-c", vec![1]).unwrap();
        vol.remove_tree("a").unwrap();
        assert_eq!(vol.node("a"), None);
        assert_eq!(vol.read("a-c").unwrap(), &[1]);
        assert_eq!(vol.remove_tree("a"), Err(VolumeError::NotFound));
        assert_eq!(vol.remove_tree(""), Err(VolumeError::Invalid));
    }

    #[test]
    fn block_accounting_rounds_up() {
        let mut vol = volume();
        assert_eq!(vol.blocks_used(), METADATA_BLOCKS);
        vol.write("f", vec![0; 513]).unwrap();
        assert_eq!(vol.blocks_used(), METADATA_BLOCKS + 2);
        vol.write("empty", vec![]).unwrap();
        assert_eq!(vol.blocks_used(), METADATA_BLOCKS + 2);
    }

    #[test]
    fn decode_rejects_foreign_devices() {
        let geometry = Geometry::new(512, 64);
        let mut vol = Volume::empty(FsFamily::FatFs, geometry, 0);
        vol.write("a.txt", b"hi".to_vec()).unwrap();
        let bytes = vol.encode();

        assert_eq!(Volume::decode(FsFamily::FatFs, geometry, &bytes).unwrap(), vol);
        assert_eq!(
            Volume::decode(FsFamily::LittleFs, geometry, &bytes),
            Err(VolumeError::Corrupt)
        );
        assert_eq!(
            Volume::decode(FsFamily::FatFs, Geometry::new(512, 32), &bytes),
            Err(VolumeError::Corrupt)
        );
        assert_eq!(
            Volume::decode(FsFamily::FatFs, geometry, &vec![0; 512]),
            Err(VolumeError::Corrupt)
        );
    }
}
