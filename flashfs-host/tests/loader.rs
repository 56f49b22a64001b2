//! Async construction.

mod common;

use flashfs_host::guest::{GuestRuntime, GuestRuntimeConfig};
use flashfs_host::loader::{
    create_filesystem_from_image_with_runtime, create_filesystem_with_runtime,
};
use flashfs_host::prelude::*;
use std::sync::Arc;

/// A module exporting nothing an engine needs.
const EMPTY_WAT: &str = r#"(module (memory (export "memory") 1))"#;

fn runtime() -> Arc<GuestRuntime> {
    Arc::new(GuestRuntime::new(GuestRuntimeConfig::testing()).unwrap())
}

#[tokio::test]
async fn missing_module_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = FsConfig::littlefs().with_module_path(dir.path().join("absent.wasm"));
    let err = create_filesystem(&config).await.unwrap_err();
    assert!(matches!(err, FsError::ModuleLoad { .. }));
    assert!(err.to_string().contains("absent.wasm"));
}

#[tokio::test]
async fn invalid_module_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.wasm");
    std::fs::write(&path, b"\0asm garbage").unwrap();

    let config = FsConfig::fatfs().with_module_path(&path);
    let err = create_filesystem_with_runtime(runtime(), &config)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "E301");
}

#[tokio::test]
async fn module_without_engine_exports_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.wasm");
    std::fs::write(&path, wat::parse_str(EMPTY_WAT).unwrap()).unwrap();

    let config = FsConfig::littlefs().with_module_path(&path);
    let err = create_filesystem_with_runtime(runtime(), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::ModuleLoad { .. }));
    assert!(err.to_string().contains("not a littlefs engine"));
}

#[tokio::test]
async fn image_is_validated_before_module_is_read() {
    let config = FsConfig::fatfs()
        .with_block_size(512)
        .with_module_path("/definitely/not/here.wasm");
    let err = create_filesystem_from_image_with_runtime(runtime(), &[1, 2, 3], &config)
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::InvalidImage { .. }));
}

#[tokio::test]
async fn bad_configuration_is_rejected_first() {
    let config = FsConfig::littlefs()
        .with_lookahead_size(3)
        .with_module_path("/definitely/not/here.wasm");
    let err = create_filesystem(&config).await.unwrap_err();
    assert!(matches!(err, FsError::InvalidConfig { .. }));
}

#[test]
fn clients_can_be_shared_behind_a_mutex() {
    let (fs, _monitor) = common::fresh(FsFamily::FatFs);
    let shared = Arc::new(parking_lot::Mutex::new(fs));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || {
                shared
                    .lock()
                    .write(&format!("t{}.txt", i), format!("{}", i).as_bytes())
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(shared.lock().list("/").unwrap().len(), 4);
}
