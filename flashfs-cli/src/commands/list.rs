//! List command - show directory contents of an image.

use super::image::{self, FsArgs};
use anyhow::Result;
use flashfs_host::prelude::*;
use std::path::Path;

/// Run the list command.
pub async fn run(args: &FsArgs, image_path: &Path, path: &str, json: bool) -> Result<()> {
    tracing::info!(image = %image_path.display(), path = %path, "Listing directory");

    let mut fs = image::open(args, image_path).await?;
    let mut entries = fs.list(path)?;
    fs.close()?;
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        print!("{}", render(&entries));
    }
    Ok(())
}

/// Render entries as a table, directories marked with a trailing slash.
pub fn render(entries: &[Entry]) -> String {
    if entries.is_empty() {
        return "(empty)\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!("{:<6} {:>10}  {}\n", "TYPE", "SIZE", "PATH"));
    for entry in entries {
        let (kind, size, suffix) = if entry.is_dir() {
            ("dir", "-".to_string(), "/")
        } else {
            ("file", entry.size.to_string(), "")
        };
        out.push_str(&format!(
            "{:<6} {:>10}  {}{}\n",
            kind, size, entry.path, suffix
        ));
    }

    let files = entries.iter().filter(|e| !e.is_dir()).count();
    let bytes: u64 = entries.iter().map(|e| e.size).sum();
    out.push_str(&format!(
        "\n{} entries, {} files, {} bytes\n",
        entries.len(),
        files,
        bytes
    ));
    out
}
