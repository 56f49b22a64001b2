//! Path normalization rules and listing decoding, as seen by client code.

use flashfs_core::codes::{self, fatfs, lfs};
use flashfs_core::path::{check_segment_lengths, parent};
use flashfs_core::prelude::*;

#[test]
fn equivalent_spellings_normalize_identically() {
    let spellings = [
        "docs/readme.txt",
        "/docs/readme.txt",
        "\\docs\\readme.txt",
        "//docs///readme.txt",
        "  docs/readme.txt ",
        "docs\\/readme.txt",
    ];
    for spelling in spellings {
        assert_eq!(
            normalize_file_path(spelling).unwrap(),
            "docs/readme.txt",
            "{spelling:?}"
        );
    }
}

#[test]
fn normalization_is_idempotent() {
    for input in ["a", "/a/b/c", "x\\y", "./a", "a/./b"] {
        let once = normalize_file_path(input).unwrap();
        assert_eq!(normalize_file_path(&once).unwrap(), once);

        let dir = normalize_dir_path(input).unwrap();
        assert_eq!(normalize_dir_path(&dir).unwrap(), dir);
        assert!(dir.starts_with('/'));
    }
}

#[test]
fn rejected_paths_name_the_input() {
    for input in ["", "/", "  ", "\\\\", "../etc/passwd", "a/../b", "a\0b"] {
        let err = normalize_file_path(input).unwrap_err();
        assert!(err.is_host_validation(), "{input:?}");
        assert_eq!(err.code(), "E201");
    }

    assert!(normalize_dir_path("..").is_err());
    assert_eq!(normalize_dir_path("").unwrap(), "/");
    assert_eq!(normalize_dir_path("\\").unwrap(), "/");
}

#[test]
fn segment_limit_applies_per_segment() {
    let ok = format!("{}/{}", "a".repeat(64), "b".repeat(64));
    assert!(check_segment_lengths(&ok, lfs::NAME_MAX).is_ok());

    let too_long = format!("short/{}", "c".repeat(65));
    let err = check_segment_lengths(&too_long, lfs::NAME_MAX).unwrap_err();
    assert!(err.to_string().contains("65 bytes"));
}

#[test]
fn parents_walk_upwards() {
    assert_eq!(parent("a/b/c.txt"), Some("a/b"));
    assert_eq!(parent("a/b"), Some("a"));
    assert_eq!(parent("a"), None);
}

#[test]
fn flat_listing_payload_decodes_in_order() {
    let payload = "/logs\t0\td\n/logs/boot.txt\t120\tf\r\n\n/config.json\tbogus\n/readme\t7\n";
    let entries = parse_list_payload(payload);
    assert_eq!(
        entries,
        vec![
            Entry::dir("/logs"),
            Entry::file("/logs/boot.txt", 120),
            Entry::file("/config.json", 0),
            Entry::file("/readme", 7),
        ]
    );
    assert_eq!(entries[1].name(), "boot.txt");
    assert_eq!(entries[1].depth(), 2);
}

#[test]
fn entry_paths_join_under_directory() {
    assert_eq!(join_entry_path("/", "a"), "/a");
    assert_eq!(join_entry_path("/docs", "a"), "/docs/a");
    assert_eq!(join_entry_path("/docs/", "a"), "/docs/a");
}

#[test]
fn entries_serialize_for_tooling() {
    let json = serde_json::to_value(Entry::dir("/logs")).unwrap();
    assert_eq!(json["kind"], "dir");
    assert_eq!(json["path"], "/logs");

    let usage = Usage::from_blocks(3, 8, 512);
    let json = serde_json::to_value(usage).unwrap();
    assert_eq!(json["free_bytes"], 2560);
}

#[test]
fn error_domains_disagree_on_not_found() {
    assert!(codes::LITTLEFS.is_not_found(lfs::NOENT));
    assert!(!codes::LITTLEFS.is_not_found(fatfs::NO_FILE));
    assert!(codes::FATFS.is_not_found(fatfs::NO_FILE));
    assert!(codes::FATFS.is_not_found(fatfs::NO_PATH));

    let err = codes::FATFS
        .check_space(fatfs::DENIED, || "write file \"a\"".to_string())
        .unwrap_err();
    assert!(err.is_capacity_exhausted());

    let err = codes::FATFS
        .check(fatfs::DENIED, || "delete \"d\"".to_string())
        .unwrap_err();
    assert!(!err.is_capacity_exhausted());
    assert_eq!(err.guest_code(), Some(fatfs::DENIED));
    assert_eq!(codes::FATFS.describe(fatfs::DENIED), "access denied or directory full");
}
