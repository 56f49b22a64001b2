//! Create command - build a fresh image, optionally packed from a host
//! directory.

use super::edit::mkdir_all;
use super::image::{self, FsArgs};
use anyhow::{Context, Result};
use flashfs_host::prelude::*;
use std::path::Path;

/// Run the create command.
pub async fn run(args: &FsArgs, image_path: &Path, from_dir: Option<&Path>, force: bool) -> Result<()> {
    if image_path.exists() && !force {
        anyhow::bail!(
            "Image already exists: {} (use --force to overwrite)",
            image_path.display()
        );
    }
    if let Some(dir) = from_dir {
        if !dir.is_dir() {
            anyhow::bail!("Source directory not found: {}", dir.display());
        }
    }

    let mut fs = image::create(args).await?;
    let summary = match from_dir {
        Some(dir) => pack_dir(fs.as_mut(), dir)?,
        None => PackSummary::default(),
    };
    let geometry = fs.geometry();
    image::save(fs, image_path).await?;

    println!(
        "Created {} ({} x {} bytes)",
        image_path.display(),
        geometry.block_count,
        geometry.block_size
    );
    if from_dir.is_some() {
        println!(
            "Packed {} files ({} bytes) in {} directories",
            summary.files, summary.bytes, summary.dirs
        );
    }
    Ok(())
}

/// What [`pack_dir`] copied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackSummary {
    /// Directories created.
    pub dirs: usize,
    /// Files written.
    pub files: usize,
    /// Total file bytes.
    pub bytes: u64,
}

/// Copy the contents of a host directory into the filesystem root.
///
/// Entries are visited in name order so the same tree always produces
/// the same image. Symlinks and other special files are skipped.
pub fn pack_dir(fs: &mut dyn Filesystem, source: &Path) -> Result<PackSummary> {
    let mut summary = PackSummary::default();
    pack_into(fs, source, "", &mut summary)?;
    Ok(summary)
}

fn pack_into(
    fs: &mut dyn Filesystem,
    dir: &Path,
    prefix: &str,
    summary: &mut PackSummary,
) -> Result<()> {
    let mut children = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let name = child.file_name();
        let Some(name) = name.to_str() else {
            tracing::warn!(path = %child.path().display(), "Skipping non UTF-8 file name");
            continue;
        };
        let target = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        };

        let file_type = child.file_type()?;
        if file_type.is_dir() {
            mkdir_all(fs, &target)?;
            summary.dirs += 1;
            pack_into(fs, &child.path(), &target, summary)?;
        } else if file_type.is_file() {
            let data = std::fs::read(child.path())
                .with_context(|| format!("Failed to read {}", child.path().display()))?;
            tracing::debug!(path = %target, bytes = data.len(), "Packing file");
            fs.write(&target, &data)
                .with_context(|| format!("Failed to write {}", target))?;
            summary.files += 1;
            summary.bytes += data.len() as u64;
        } else {
            tracing::warn!(path = %child.path().display(), "Skipping special file");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::image::test_support::sim;

    fn source_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("www/css")).unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        std::fs::write(dir.path().join("config.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("www/index.html"), b"<html></html>").unwrap();
        std::fs::write(dir.path().join("www/css/site.css"), b"body{}").unwrap();
        dir
    }

    #[test]
    fn packs_tree_on_every_family() {
        let source = source_tree();
        for family in FsFamily::ALL {
            let mut fs = sim(family);
            let summary = pack_dir(fs.as_mut(), source.path()).unwrap();
            assert_eq!(
                summary,
                PackSummary {
                    dirs: 3,
                    files: 3,
                    bytes: 2 + 13 + 6
                }
            );
            assert_eq!(fs.read("config.json").unwrap(), b"{}");
            assert_eq!(fs.read("www/css/site.css").unwrap(), b"body{}");
            assert!(fs.list("empty").unwrap().is_empty());
        }
    }

    #[test]
    fn full_device_stops_packing() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("huge.bin"), vec![7u8; 512 * 600]).unwrap();

        let mut fs = sim(FsFamily::FatFs);
        let err = pack_dir(fs.as_mut(), source.path()).unwrap_err();
        let fs_err = err.downcast_ref::<FsError>().unwrap();
        assert!(fs_err.is_capacity_exhausted());
    }

    #[tokio::test]
    async fn refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        std::fs::write(&image, b"existing").unwrap();

        let err = run(&FsArgs::default(), &image, None, false).await.unwrap_err();
        assert!(err.to_string().contains("--force"));
        assert_eq!(std::fs::read(&image).unwrap(), b"existing");
    }

    #[tokio::test]
    async fn missing_source_directory() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        let err = run(&FsArgs::default(), &image, Some(&dir.path().join("nope")), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Source directory not found"));
        assert!(!image.exists());
    }
}
