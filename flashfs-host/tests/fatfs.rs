//! FatFs-specific behavior.

mod common;

use common::{config, fresh, fresh_with, snapshot};
use flashfs_core::codes::fatfs;
use flashfs_host::prelude::*;
use flashfs_host::testing::SimulatedEngine;

fn start(engine: SimulatedEngine, config: &FsConfig) -> Box<dyn Filesystem> {
    start_filesystem(Box::new(engine), config).unwrap()
}

#[test]
fn listing_is_every_file_below_the_directory() {
    let (mut fs, _monitor) = fresh(FsFamily::FatFs);
    fs.mkdir("a").unwrap();
    fs.mkdir("a/b").unwrap();
    fs.write("a/b/deep.txt", b"deep").unwrap();
    fs.write("top.txt", b"t").unwrap();

    assert_eq!(
        snapshot(&fs.list("/").unwrap()),
        vec![
            ("/a/b/deep.txt".to_string(), 4, false),
            ("/top.txt".to_string(), 1, false),
        ]
    );
    assert_eq!(
        snapshot(&fs.list("a").unwrap()),
        vec![("/a/b/deep.txt".to_string(), 4, false)]
    );
    assert!(fs.list("a/b/deep").unwrap().is_empty());
}

#[test]
fn listing_asks_for_the_whole_volume_once() {
    let (mut fs, monitor) = fresh(FsFamily::FatFs);
    fs.mkdir("logs").unwrap();
    fs.write("logs/1.txt", b"one").unwrap();
    fs.write("other.txt", b"x").unwrap();

    let before = monitor.calls("fatfsjs_list");
    assert_eq!(fs.list("logs").unwrap(), vec![Entry::file("/logs/1.txt", 3)]);
    assert_eq!(monitor.calls("fatfsjs_list"), before + 1);
    assert_eq!(monitor.live_allocations(), 0);
}

#[test]
fn recursive_delete_removes_files_then_directories() {
    let (mut fs, monitor) = fresh(FsFamily::FatFs);
    fs.mkdir("a").unwrap();
    fs.mkdir("a/b").unwrap();
    fs.write("a/b/c.txt", b"c").unwrap();
    fs.write("a/d.txt", b"d").unwrap();
    fs.write("ab.txt", b"sibling").unwrap();

    fs.delete("a", DeleteOptions::recursive()).unwrap();
    // Two files, then a/b, then a itself.
    assert_eq!(monitor.calls("fatfsjs_delete_file"), 4);
    assert_eq!(fs.read("ab.txt").unwrap(), b"sibling");
    assert!(fs.read("a/d.txt").unwrap_err().is_not_found());
    fs.write("a", b"now a file").unwrap();
}

#[test]
fn listing_grows_from_tiny_buffer() {
    let tiny = config(FsFamily::FatFs).with_list_buffer_size(8);
    let (mut fs, monitor) = fresh_with(FsFamily::FatFs, &tiny);
    for i in 0..20 {
        fs.write(&format!("f{:02}", i), b"x").unwrap();
    }

    assert_eq!(fs.list("/").unwrap().len(), 20);
    let first = monitor.calls("fatfsjs_list");
    assert!(first > 1);

    assert_eq!(fs.list("/").unwrap().len(), 20);
    assert_eq!(monitor.calls("fatfsjs_list"), first + 1);
    assert_eq!(monitor.live_allocations(), 0);
}

#[test]
fn empty_directory_lists_nothing() {
    let (mut fs, _monitor) = fresh(FsFamily::FatFs);
    fs.mkdir("empty").unwrap();
    assert!(fs.list("empty").unwrap().is_empty());
}

#[test]
fn missing_parent_is_not_found() {
    let (mut fs, _monitor) = fresh(FsFamily::FatFs);
    let err = fs.write("no/such/dir.txt", b"x").unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.guest_code(), Some(fatfs::NO_PATH));
}

#[test]
fn rename_onto_existing_fails() {
    let (mut fs, _monitor) = fresh(FsFamily::FatFs);
    fs.write("a", b"a").unwrap();
    fs.write("b", b"b").unwrap();
    let err = fs.rename("a", "b").unwrap_err();
    assert_eq!(err.guest_code(), Some(fatfs::EXIST));
    assert_eq!(fs.read("b").unwrap(), b"b");
}

#[test]
fn engine_without_optional_exports() {
    let engine = SimulatedEngine::fatfs()
        .without_export("fatfsjs_mkdir")
        .without_export("fatfsjs_rename")
        .without_export("fatfsjs_fs_stat")
        .without_export("fatfsjs_mount")
        .without_export("fatfsjs_cleanup");
    let monitor = engine.monitor();
    let mut fs = start(engine, &config(FsFamily::FatFs));

    assert!(matches!(fs.mkdir("d"), Err(FsError::Unsupported { operation: "mkdir", .. })));
    let err = fs.rename("a", "b").unwrap_err();
    assert_eq!(err.code(), "E108");

    fs.write("still.txt", b"works").unwrap();
    let usage = fs.usage().unwrap();
    assert_eq!(usage.free_bytes, usage.capacity_bytes);

    fs.close().unwrap();
    assert_eq!(monitor.calls("fatfsjs_mount"), 0);
    assert_eq!(monitor.calls("fatfsjs_cleanup"), 0);
}

#[test]
fn disk_version_is_not_tracked() {
    let (mut fs, _monitor) = fresh(FsFamily::FatFs);
    assert_eq!(fs.disk_version().unwrap(), None);
}

#[test]
fn empty_write_passes_null_pointer() {
    let (mut fs, monitor) = fresh(FsFamily::FatFs);
    let before = monitor.calls("malloc");
    fs.write("empty.bin", b"").unwrap();
    // Only the path string is allocated.
    assert_eq!(monitor.calls("malloc"), before + 1);
    assert_eq!(fs.read("empty.bin").unwrap(), Vec::<u8>::new());
    let entries = fs.list("/").unwrap();
    assert_eq!(entries, vec![Entry::file("/empty.bin", 0)]);
}

#[test]
fn export_failure_is_reported() {
    let (mut fs, monitor) = fresh(FsFamily::FatFs);
    monitor.fail_next("fatfsjs_export_image", fatfs::DISK_ERR);
    let err = fs.to_image().unwrap_err();
    assert_eq!(err.guest_code(), Some(fatfs::DISK_ERR));
    assert!(err.to_string().contains("export image"));
    assert_eq!(monitor.live_allocations(), 0);
}
