//! LittleFS-specific behavior.

mod common;

use common::{BLOCK_SIZE, config, fresh, fresh_with, reopen};
use flashfs_host::prelude::*;

#[test]
fn disk_version_follows_configuration() {
    let (mut fs, monitor) = fresh(FsFamily::LittleFs);
    assert_eq!(fs.disk_version().unwrap(), Some(DiskVersion::V2_0));
    assert_eq!(monitor.calls("lfs_wasm_set_disk_version"), 1);

    let v21 = config(FsFamily::LittleFs).with_disk_version(DiskVersion::V2_1);
    let (mut fs, _monitor) = fresh_with(FsFamily::LittleFs, &v21);
    assert_eq!(fs.disk_version().unwrap(), Some(DiskVersion::V2_1));
    assert_eq!(fs.disk_version().unwrap().unwrap().to_string(), "2.1");
}

#[test]
fn image_import_preserves_disk_version() {
    let v21 = config(FsFamily::LittleFs).with_disk_version(DiskVersion::V2_1);
    let (mut fs, _monitor) = fresh_with(FsFamily::LittleFs, &v21);
    fs.write("marker", b"1").unwrap();
    let image = fs.to_image().unwrap();

    // The import config asks for 2.0; an existing layout must not be migrated.
    let open = FsConfig::littlefs()
        .with_block_size(BLOCK_SIZE)
        .with_disk_version(DiskVersion::V2_0);
    let (mut copy, monitor) = reopen(FsFamily::LittleFs, &image, &open).unwrap();
    assert_eq!(monitor.calls("lfs_wasm_set_disk_version"), 0);
    assert_eq!(copy.disk_version().unwrap(), Some(DiskVersion::V2_1));
    assert_eq!(copy.read("marker").unwrap(), b"1");
}

#[test]
fn nested_listing_is_one_level() {
    let (mut fs, monitor) = fresh(FsFamily::LittleFs);
    fs.mkdir("a").unwrap();
    fs.mkdir("a/b").unwrap();
    fs.write("a/b/deep.txt", b"deep").unwrap();
    fs.write("a/top.txt", b"top").unwrap();

    let root = fs.list("/").unwrap();
    assert_eq!(root, vec![Entry::dir("/a")]);

    let mut a = fs.list("a").unwrap();
    a.sort_by(|x, y| x.path.cmp(&y.path));
    assert_eq!(a, vec![Entry::dir("/a/b"), Entry::file("/a/top.txt", 3)]);

    assert_eq!(fs.list("/a/b/").unwrap(), vec![Entry::file("/a/b/deep.txt", 4)]);
    let opened = monitor.calls("lfs_wasm_dir_open");
    assert_eq!(monitor.calls("lfs_wasm_dir_close"), opened);
}

#[test]
fn listing_a_file_fails() {
    let (mut fs, monitor) = fresh(FsFamily::LittleFs);
    fs.write("plain.txt", b"x").unwrap();
    let err = fs.list("plain.txt").unwrap_err();
    assert_eq!(err.guest_code(), Some(flashfs_core::codes::lfs::NOTDIR));
    assert_eq!(monitor.calls("lfs_wasm_dir_close"), 0);
    assert_eq!(monitor.live_allocations(), 0);
}

#[test]
fn long_names_are_rejected_on_every_operation() {
    let (mut fs, monitor) = fresh(FsFamily::LittleFs);
    let long = format!("dir/{}", "n".repeat(65));
    let calls = monitor.calls("malloc");

    assert!(matches!(fs.write(&long, b"x"), Err(FsError::InvalidPath { .. })));
    assert!(matches!(fs.mkdir(&long), Err(FsError::InvalidPath { .. })));
    assert!(matches!(fs.list(&long), Err(FsError::InvalidPath { .. })));
    assert!(matches!(fs.rename("a", &long), Err(FsError::InvalidPath { .. })));
    assert_eq!(monitor.calls("malloc"), calls);

    fs.write(&"n".repeat(64), b"ok").unwrap();
}

#[test]
fn mkdir_without_parent_is_not_found() {
    let (mut fs, _monitor) = fresh(FsFamily::LittleFs);
    let err = fs.mkdir("missing/child").unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.code(), "E103");
}

#[test]
fn non_recursive_delete_of_populated_directory_fails() {
    let (mut fs, _monitor) = fresh(FsFamily::LittleFs);
    fs.mkdir("d").unwrap();
    fs.write("d/f", b"f").unwrap();
    let err = fs.delete("d", DeleteOptions::default()).unwrap_err();
    assert_eq!(err.guest_code(), Some(flashfs_core::codes::lfs::NOTEMPTY));
    assert_eq!(fs.read("d/f").unwrap(), b"f");
}

#[test]
fn usage_falls_back_when_engine_fails() {
    let (mut fs, monitor) = fresh(FsFamily::LittleFs);
    monitor.fail_next("lfs_wasm_fs_stat", flashfs_core::codes::lfs::IO);
    let usage = fs.usage().unwrap();
    assert_eq!(usage, Usage::all_free(fs.geometry().capacity_bytes()));
    assert_eq!(monitor.live_allocations(), 0);
}

#[test]
fn close_unmounts_then_cleans_up() {
    let (mut fs, monitor) = fresh(FsFamily::LittleFs);
    fs.close().unwrap();
    assert_eq!(monitor.calls("lfs_wasm_unmount"), 1);
    assert_eq!(monitor.calls("lfs_wasm_cleanup"), 1);
    drop(fs);
    assert_eq!(monitor.calls("lfs_wasm_unmount"), 1);
}
