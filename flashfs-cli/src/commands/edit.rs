//! Commands that modify an image in place: put, rm, mkdir, mv.
//!
//! Each opens the image, applies one change and writes the image back.

use super::image::{self, FsArgs};
use anyhow::{Context, Result};
use flashfs_core::path::{normalize_file_path, parent};
use flashfs_host::prelude::*;
use std::path::Path;

/// Copy a host file into the image, creating missing parent directories.
pub async fn put(args: &FsArgs, image_path: &Path, path: &str, source: &Path) -> Result<()> {
    let data = tokio::fs::read(source)
        .await
        .with_context(|| format!("Failed to read {}", source.display()))?;
    tracing::info!(image = %image_path.display(), path = %path, bytes = data.len(), "Writing file");

    let mut fs = image::open(args, image_path).await?;
    write_with_parents(fs.as_mut(), path, &data)?;
    image::save(fs, image_path).await?;

    println!("Wrote {} bytes to {}", data.len(), path);
    Ok(())
}

/// Delete a file or directory.
pub async fn remove(args: &FsArgs, image_path: &Path, path: &str, recursive: bool) -> Result<()> {
    tracing::info!(image = %image_path.display(), path = %path, recursive, "Deleting");

    let mut fs = image::open(args, image_path).await?;
    fs.delete(path, DeleteOptions { recursive })
        .with_context(|| format!("Failed to delete {}", path))?;
    image::save(fs, image_path).await?;

    println!("Deleted {}", path);
    Ok(())
}

/// Create a directory and any missing parents.
pub async fn mkdir(args: &FsArgs, image_path: &Path, path: &str) -> Result<()> {
    tracing::info!(image = %image_path.display(), path = %path, "Creating directory");

    let mut fs = image::open(args, image_path).await?;
    mkdir_all(fs.as_mut(), path)?;
    image::save(fs, image_path).await?;

    println!("Created {}", path);
    Ok(())
}

/// Rename or move an entry.
pub async fn rename(args: &FsArgs, image_path: &Path, from: &str, to: &str) -> Result<()> {
    tracing::info!(image = %image_path.display(), from = %from, to = %to, "Renaming");

    let mut fs = image::open(args, image_path).await?;
    fs.rename(from, to)
        .with_context(|| format!("Failed to rename {} to {}", from, to))?;
    image::save(fs, image_path).await?;

    println!("Renamed {} -> {}", from, to);
    Ok(())
}

/// Create `path` and every missing ancestor.
pub fn mkdir_all(fs: &mut dyn Filesystem, path: &str) -> Result<()> {
    let path = normalize_file_path(path)?;
    let mut ancestors = vec![path.as_str()];
    let mut current = path.as_str();
    while let Some(up) = parent(current) {
        ancestors.push(up);
        current = up;
    }

    for dir in ancestors.into_iter().rev() {
        fs.mkdir(dir)
            .with_context(|| format!("Failed to create directory {}", dir))?;
    }
    Ok(())
}

/// Write `data` to `path`, creating missing parent directories first.
pub fn write_with_parents(fs: &mut dyn Filesystem, path: &str, data: &[u8]) -> Result<()> {
    let path = normalize_file_path(path)?;
    if let Some(dir) = parent(&path) {
        mkdir_all(fs, dir)?;
    }
    fs.write(&path, data)
        .with_context(|| format!("Failed to write {}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::image::test_support::sim;

    #[test]
    fn put_creates_parents() {
        for family in FsFamily::ALL {
            let mut fs = sim(family);
            write_with_parents(fs.as_mut(), "/a/b/c/file.txt", b"nested").unwrap();
            assert_eq!(fs.read("a/b/c/file.txt").unwrap(), b"nested");

            // Existing parents are fine.
            write_with_parents(fs.as_mut(), "a/b/other.txt", b"x").unwrap();
            assert_eq!(fs.read("a/b/other.txt").unwrap(), b"x");
        }
    }

    #[test]
    fn top_level_put_needs_no_mkdir() {
        let mut fs = sim(FsFamily::LittleFs);
        write_with_parents(fs.as_mut(), "root.txt", b"r").unwrap();
        assert_eq!(fs.list("/").unwrap(), vec![Entry::file("/root.txt", 1)]);
    }

    #[test]
    fn mkdir_all_is_idempotent() {
        let mut fs = sim(FsFamily::FatFs);
        mkdir_all(fs.as_mut(), "x/y/z").unwrap();
        mkdir_all(fs.as_mut(), "x/y/z").unwrap();
        assert!(fs.list("x/y/z").unwrap().is_empty());
    }

    #[test]
    fn parent_that_is_a_file_fails() {
        let mut fs = sim(FsFamily::LittleFs);
        fs.write("blocker", b"b").unwrap();
        let err = write_with_parents(fs.as_mut(), "blocker/inner.txt", b"x").unwrap_err();
        assert!(format!("{:#}", err).contains("blocker"));
    }

    #[test]
    fn invalid_path_is_rejected() {
        let mut fs = sim(FsFamily::FatFs);
        let err = write_with_parents(fs.as_mut(), "../escape", b"x").unwrap_err();
        let fs_err = err.downcast_ref::<FsError>().unwrap();
        assert_eq!(fs_err.code(), "E201");
    }
}
