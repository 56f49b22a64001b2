//! Listing wire format.
//!
//! Flat listings come back from the guest as UTF-8 text: one record per
//! line, fields separated by tabs. Two-field records (`path\tsize`) are
//! always files; three-field records carry a type column where the literal
//! `d` marks a directory.

use crate::types::{Entry, EntryKind};

/// Decode a flat listing payload into entries.
///
/// Empty lines are skipped, so an empty payload decodes to an empty
/// listing. A size column that does not parse counts as zero rather than
/// dropping the record.
pub fn parse_list_payload(payload: &str) -> Vec<Entry> {
    payload
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .map(parse_record)
        .collect()
}

fn parse_record(line: &str) -> Entry {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let mut fields = line.split('\t');
    let path = fields.next().unwrap_or_default().to_string();
    let size = fields
        .next()
        .and_then(|size| size.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let kind = match fields.next() {
        Some("d") => EntryKind::Directory,
        _ => EntryKind::File,
    };

    Entry { path, size, kind }
}

/// Join a normalized directory path (`/` or `/a/b`) with an entry name.
pub fn join_entry_path(dir: &str, name: &str) -> String {
    if dir.is_empty() || dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// Check whether a listed `path` lies below the normalized directory `dir`
/// (`/` or `/a/b`).
///
/// Listed paths may come with or without their leading slash. The root
/// contains everything; a directory does not contain itself.
pub fn within_dir(dir: &str, path: &str) -> bool {
    let dir = dir.trim_matches('/');
    let path = path.trim_start_matches('/');
    if dir.is_empty() {
        return !path.is_empty();
    }
    path.strip_prefix(dir)
        .is_some_and(|rest| rest.len() > 1 && rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_is_empty_listing() {
        assert!(parse_list_payload("").is_empty());
        assert!(parse_list_payload("\n\n").is_empty());
    }

    #[test]
    fn three_field_records() {
        let entries = parse_list_payload("/docs\t0\td\n/docs/a.txt\t12\tf\n");
        assert_eq!(entries, vec![Entry::dir("/docs"), Entry::file("/docs/a.txt", 12)]);
    }

    #[test]
    fn two_field_records_are_files() {
        let entries = parse_list_payload("/a.bin\t4096");
        assert_eq!(entries, vec![Entry::file("/a.bin", 4096)]);
    }

    #[test]
    fn bad_size_counts_as_zero() {
        let entries = parse_list_payload("/x\tlots\n");
        assert_eq!(entries[0].size, 0);
        let entries = parse_list_payload("/y\n");
        assert_eq!(entries[0], Entry::file("/y", 0));
    }

    #[test]
    fn subtree_membership() {
        assert!(within_dir("/", "/a.txt"));
        assert!(within_dir("/", "a/b.txt"));
        assert!(within_dir("/a", "/a/b.txt"));
        assert!(within_dir("/a", "a/b/c.txt"));
        assert!(!within_dir("/a", "/a"));
        assert!(!within_dir("/a", "/ab/c.txt"));
        assert!(!within_dir("/a/b", "/a/c.txt"));
    }

    #[test]
    fn join_paths() {
        assert_eq!(join_entry_path("/", "a"), "/a");
        assert_eq!(join_entry_path("/docs", "a.txt"), "/docs/a.txt");
        assert_eq!(join_entry_path("/docs/", "a.txt"), "/docs/a.txt");
    }
}
