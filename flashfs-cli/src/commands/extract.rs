//! Extract command - copy every file out of an image into a host directory.

use super::image::{self, FsArgs};
use anyhow::{Context, Result};
use flashfs_host::prelude::*;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

/// Run the extract command.
pub async fn run(args: &FsArgs, image_path: &Path, dest: &Path) -> Result<()> {
    tracing::info!(image = %image_path.display(), dest = %dest.display(), "Extracting image");

    let mut fs = image::open(args, image_path).await?;
    let entries = walk(fs.as_mut())?;

    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut files = 0usize;
    let mut bytes = 0u64;
    for entry in &entries {
        let Some(target) = host_path(dest, &entry.path) else {
            tracing::warn!(path = %entry.path, "Skipping entry with unsafe path");
            continue;
        };
        if entry.is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else {
            let data = fs
                .read(&entry.path)
                .with_context(|| format!("Failed to read {}", entry.path))?;
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, &data)
                .with_context(|| format!("Failed to write {}", target.display()))?;
            files += 1;
            bytes += data.len() as u64;
        }
    }
    fs.close()?;

    println!("Extracted {} files ({} bytes) to {}", files, bytes, dest.display());
    Ok(())
}

/// Every entry in the filesystem, parents before children.
///
/// One-level listings are followed into each directory; subtree listings
/// already hold everything below and repeat nothing new. FatFs lists files
/// only, so its walk has no directory entries and extraction creates the
/// parents of each file instead.
pub fn walk(fs: &mut dyn Filesystem) -> Result<Vec<Entry>> {
    let mut seen: BTreeMap<String, Entry> = BTreeMap::new();
    let mut pending = VecDeque::from(["/".to_string()]);

    while let Some(dir) = pending.pop_front() {
        for entry in fs.list(&dir)? {
            if seen.contains_key(&entry.path) {
                continue;
            }
            if entry.is_dir() {
                pending.push_back(entry.path.clone());
            }
            seen.insert(entry.path.clone(), entry);
        }
    }

    let mut entries: Vec<Entry> = seen.into_values().collect();
    entries.sort_by(|a, b| a.depth().cmp(&b.depth()).then_with(|| a.path.cmp(&b.path)));
    Ok(entries)
}

/// Map an image path onto `dest`, refusing anything that would escape it.
fn host_path(dest: &Path, image_path: &str) -> Option<PathBuf> {
    let mut out = dest.to_path_buf();
    let mut pushed = false;
    for segment in image_path.split('/').filter(|s| !s.is_empty() && *s != ".") {
        if segment == ".." || segment.contains('\\') || segment.contains(':') {
            return None;
        }
        out.push(segment);
        pushed = true;
    }
    pushed.then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::create::pack_dir;
    use crate::commands::image::test_support::sim;

    fn populate(fs: &mut dyn Filesystem) {
        fs.mkdir("a").unwrap();
        fs.mkdir("a/b").unwrap();
        fs.write("a/b/deep.txt", b"deep").unwrap();
        fs.write("a/mid.txt", b"mid").unwrap();
        fs.write("top.txt", b"top").unwrap();
    }

    #[test]
    fn walk_agrees_across_listing_styles() {
        let expected = vec![
            Entry::dir("/a"),
            Entry::file("/top.txt", 3),
            Entry::dir("/a/b"),
            Entry::file("/a/mid.txt", 3),
            Entry::file("/a/b/deep.txt", 4),
        ];
        for family in FsFamily::ALL {
            let mut fs = sim(family);
            populate(fs.as_mut());
            let walked = walk(fs.as_mut()).unwrap();
            if family == FsFamily::FatFs {
                let files: Vec<Entry> =
                    expected.iter().filter(|e| !e.is_dir()).cloned().collect();
                assert_eq!(walked, files);
            } else {
                assert_eq!(walked, expected, "{}", family);
            }
        }
    }

    #[test]
    fn flat_listing_still_maps_into_nested_host_paths() {
        let mut fs = sim(FsFamily::FatFs);
        populate(fs.as_mut());
        let dest = Path::new("/out");
        let targets: Vec<PathBuf> = walk(fs.as_mut())
            .unwrap()
            .iter()
            .filter_map(|e| host_path(dest, &e.path))
            .collect();
        assert_eq!(
            targets,
            vec![
                PathBuf::from("/out/top.txt"),
                PathBuf::from("/out/a/mid.txt"),
                PathBuf::from("/out/a/b/deep.txt"),
            ]
        );
    }

    #[test]
    fn unsafe_paths_are_refused() {
        let dest = Path::new("/out");
        assert_eq!(host_path(dest, "/a/b.txt"), Some(PathBuf::from("/out/a/b.txt")));
        assert_eq!(host_path(dest, "/./a"), Some(PathBuf::from("/out/a")));
        assert_eq!(host_path(dest, "/../etc/passwd"), None);
        assert_eq!(host_path(dest, "/c:\\windows"), None);
        assert_eq!(host_path(dest, "/"), None);
    }

    #[test]
    fn pack_then_walk_recovers_tree() {
        let source = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(source.path().join("x/y")).unwrap();
        std::fs::write(source.path().join("x/y/z.bin"), [1u8, 2, 3]).unwrap();

        let mut fs = sim(FsFamily::LittleFs);
        pack_dir(fs.as_mut(), source.path()).unwrap();
        let paths: Vec<_> = walk(fs.as_mut())
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(paths, vec!["/x", "/x/y", "/x/y/z.bin"]);
    }
}
