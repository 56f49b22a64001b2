//! Shared helpers for flashfs-host integration tests.

#![allow(dead_code)]

use flashfs_host::prelude::*;
use flashfs_host::testing::{SimMonitor, SimulatedEngine};

/// Every engine family.
pub const FAMILIES: [FsFamily; 3] = FsFamily::ALL;

/// Whether listings of `family` include directories. FatFs lists files only.
pub fn lists_directories(family: FsFamily) -> bool {
    family != FsFamily::FatFs
}

/// Whether `family` reports real usage rather than an all-free volume.
pub fn reports_usage(family: FsFamily) -> bool {
    family != FsFamily::LfsJs
}

/// Block size used by every test volume.
pub const BLOCK_SIZE: u32 = 512;

/// A small formatted-on-init configuration for `family`.
pub fn config(family: FsFamily) -> FsConfig {
    FsConfig::new(family)
        .with_block_size(BLOCK_SIZE)
        .with_block_count(1024)
        .with_format_on_init(true)
}

/// A fresh filesystem of `family` on a simulated engine.
pub fn fresh(family: FsFamily) -> (Box<dyn Filesystem>, SimMonitor) {
    fresh_with(family, &config(family))
}

/// A fresh filesystem on a simulated engine with a custom configuration.
pub fn fresh_with(family: FsFamily, config: &FsConfig) -> (Box<dyn Filesystem>, SimMonitor) {
    let engine = SimulatedEngine::new(family);
    let monitor = engine.monitor();
    let fs = start_filesystem(Box::new(engine), config).expect("filesystem should start");
    (fs, monitor)
}

/// Open `image` on a new simulated engine.
pub fn reopen(
    family: FsFamily,
    image: &[u8],
    config: &FsConfig,
) -> Result<(Box<dyn Filesystem>, SimMonitor)> {
    let engine = SimulatedEngine::new(family);
    let monitor = engine.monitor();
    let fs = start_filesystem_from_image(Box::new(engine), image, config)?;
    Ok((fs, monitor))
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Sorted `(path, size, is_dir)` triples, for comparing listings.
pub fn snapshot(entries: &[Entry]) -> Vec<(String, u64, bool)> {
    let mut out: Vec<_> = entries
        .iter()
        .map(|e| (e.path.clone(), e.size, e.is_dir()))
        .collect();
    out.sort();
    out
}

/// Names of `entries`, sorted.
pub fn names(entries: &[Entry]) -> Vec<String> {
    let mut out: Vec<_> = entries.iter().map(|e| e.name().to_string()).collect();
    out.sort();
    out
}
