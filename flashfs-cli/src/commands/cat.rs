//! Cat command - print a file from an image.

use super::image::{self, FsArgs};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

/// Run the cat command.
pub async fn run(args: &FsArgs, image_path: &Path, path: &str) -> Result<()> {
    tracing::info!(image = %image_path.display(), path = %path, "Reading file");

    let mut fs = image::open(args, image_path).await?;
    let data = fs
        .read(path)
        .with_context(|| format!("Failed to read {}", path))?;
    fs.close()?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&data)?;
    stdout.flush()?;
    Ok(())
}
