//! Path normalization.
//!
//! Engines expect root-relative paths with forward slashes and no leading
//! slash (`docs/readme.txt`); directory listings take one leading slash with
//! the root spelled `/`. Every client operation funnels its path arguments
//! through this module before anything reaches the guest.

use crate::error::{FsError, Result};

/// Split a path into its non-empty segments after the shared rules:
/// trim, backslashes to slashes, drop leading/duplicate slashes, reject `..`
/// and NUL bytes.
fn segments(input: &str) -> Result<Vec<&str>> {
    if input.contains('\0') {
        return Err(FsError::invalid_path(input, "path must not contain NUL bytes"));
    }

    // Backslashes are rewritten by splitting on both separators, which also
    // collapses runs and strips leading slashes once empty segments go.
    let parts: Vec<&str> = input
        .trim()
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty())
        .collect();

    if parts.iter().any(|segment| *segment == "..") {
        return Err(FsError::invalid_path(input, "path must not contain '..'"));
    }

    Ok(parts)
}

/// Normalize a path naming a file (or any leaf) into engine form.
///
/// `"\\docs\\\\readme.txt"` and `"/docs/readme.txt"` both become
/// `"docs/readme.txt"`. Fails with [`FsError::InvalidPath`] on parent
/// traversal or when nothing remains to name a leaf.
pub fn normalize_file_path(input: &str) -> Result<String> {
    let parts = segments(input)?;
    if parts.is_empty() {
        return Err(FsError::invalid_path(
            input,
            "path must point to a file (e.g. \"docs/readme.txt\")",
        ));
    }
    Ok(parts.join("/"))
}

/// Normalize a directory path for listing: exactly one leading slash, the
/// root is `"/"`.
pub fn normalize_dir_path(input: &str) -> Result<String> {
    let parts = segments(input)?;
    if parts.is_empty() {
        return Ok("/".to_string());
    }
    Ok(format!("/{}", parts.join("/")))
}

/// Reject any segment longer than `max` bytes.
///
/// LittleFS fails such names inside the engine with a less specific code;
/// checking here keeps the failure host-side.
pub fn check_segment_lengths(path: &str, max: usize) -> Result<()> {
    match path
        .split('/')
        .find(|segment| segment.len() > max)
    {
        Some(segment) => Err(FsError::invalid_path(
            path,
            format!(
                "segment '{}' is {} bytes, longer than the {} byte limit",
                segment,
                segment.len(),
                max
            ),
        )),
        None => Ok(()),
    }
}

/// The parent of a normalized file path, if it has one.
///
/// `"a/b/c.txt"` yields `Some("a/b")`; `"c.txt"` yields `None`.
pub fn parent(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_paths_are_root_relative() {
        assert_eq!(normalize_file_path("/docs/readme.txt").unwrap(), "docs/readme.txt");
        assert_eq!(normalize_file_path("  docs/readme.txt  ").unwrap(), "docs/readme.txt");
        assert_eq!(normalize_file_path("///a").unwrap(), "a");
    }

    #[test]
    fn backslashes_match_forward_slashes() {
        assert_eq!(
            normalize_file_path("\\a\\b").unwrap(),
            normalize_file_path("a/b").unwrap()
        );
        assert_eq!(normalize_file_path("a\\\\b//c").unwrap(), "a/b/c");
    }

    #[test]
    fn duplicate_and_trailing_slashes_collapse() {
        assert_eq!(normalize_file_path("a//b///c/").unwrap(), "a/b/c");
    }

    #[test]
    fn parent_traversal_is_rejected() {
        let err = normalize_file_path("a//b/../c").unwrap_err();
        assert!(matches!(err, FsError::InvalidPath { .. }));
        assert!(normalize_file_path("..").is_err());
        assert!(normalize_dir_path("/x/..").is_err());
    }

    #[test]
    fn dots_inside_names_are_fine() {
        assert_eq!(normalize_file_path("a/..b/c..").unwrap(), "a/..b/c..");
    }

    #[test]
    fn empty_file_path_is_rejected() {
        assert!(normalize_file_path("").is_err());
        assert!(normalize_file_path("   ").is_err());
        assert!(normalize_file_path("/").is_err());
        assert!(normalize_file_path("\\\\").is_err());
    }

    #[test]
    fn nul_is_rejected() {
        let err = normalize_file_path("a\0b").unwrap_err();
        assert!(err.to_string().contains("NUL"));
    }

    #[test]
    fn directory_paths_keep_one_leading_slash() {
        assert_eq!(normalize_dir_path("").unwrap(), "/");
        assert_eq!(normalize_dir_path("/").unwrap(), "/");
        assert_eq!(normalize_dir_path("  // ").unwrap(), "/");
        assert_eq!(normalize_dir_path("docs").unwrap(), "/docs");
        assert_eq!(normalize_dir_path("\\docs\\img\\").unwrap(), "/docs/img");
    }

    #[test]
    fn segment_length_limit() {
        assert!(check_segment_lengths("a/bcd", 3).is_ok());
        let err = check_segment_lengths("a/bcde", 3).unwrap_err();
        assert!(err.to_string().contains("bcde"));
    }

    #[test]
    fn parent_of_path() {
        assert_eq!(parent("a/b/c.txt"), Some("a/b"));
        assert_eq!(parent("c.txt"), None);
    }
}
