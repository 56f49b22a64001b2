//! Shared plumbing for commands that work on an image file.

use anyhow::{Context, Result};
use clap::Args;
use flashfs_host::prelude::*;
use std::path::{Path, PathBuf};

/// Filesystem options shared by every image command.
#[derive(Args, Debug, Clone, Default)]
pub struct FsArgs {
    /// Engine family (littlefs, lfsjs or fatfs)
    #[arg(short, long, global = true)]
    pub family: Option<FsFamily>,

    /// Path to the compiled engine module (.wasm)
    #[arg(short, long, global = true)]
    pub module: Option<PathBuf>,

    /// YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Block size in bytes
    #[arg(long, global = true)]
    pub block_size: Option<u32>,

    /// Number of blocks (inferred from the image when omitted)
    #[arg(long, global = true)]
    pub block_count: Option<u32>,
}

impl FsArgs {
    /// Build the filesystem configuration: the YAML file first, then
    /// command-line overrides.
    pub fn to_config(&self) -> Result<FsConfig> {
        let mut config = match &self.config {
            Some(path) => FsConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => FsConfig::default(),
        };

        if let Some(family) = self.family {
            config.family = family;
        }
        if let Some(module) = &self.module {
            config.module_path = Some(module.clone());
        }
        if let Some(block_size) = self.block_size {
            config.block_size = Some(block_size);
        }
        if let Some(block_count) = self.block_count {
            config.block_count = Some(block_count);
        }
        Ok(config)
    }
}

/// Open an existing image file.
pub async fn open(args: &FsArgs, image: &Path) -> Result<Box<dyn Filesystem>> {
    let config = args.to_config()?;
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("Failed to read image: {}", image.display()))?;

    tracing::info!(
        image = %image.display(),
        family = %config.family,
        bytes = bytes.len(),
        "Opening image"
    );

    let fs = create_filesystem_from_image(&bytes, &config)
        .await
        .with_context(|| format!("Failed to open image: {}", image.display()))?;
    Ok(fs)
}

/// Create a fresh, formatted filesystem.
pub async fn create(args: &FsArgs) -> Result<Box<dyn Filesystem>> {
    let config = args.to_config()?.with_format_on_init(true);
    tracing::info!(family = %config.family, "Creating filesystem");
    let fs = create_filesystem(&config)
        .await
        .context("Failed to create filesystem")?;
    Ok(fs)
}

/// Write the filesystem's image to `image`, then close it.
///
/// The image goes to a sibling temporary file first so a failed write
/// never leaves a truncated image behind.
pub async fn save(mut fs: Box<dyn Filesystem>, image: &Path) -> Result<()> {
    let bytes = fs.to_image().context("Failed to export image")?;
    fs.close().context("Failed to close filesystem")?;

    let staging = staging_path(image);
    tokio::fs::write(&staging, &bytes)
        .await
        .with_context(|| format!("Failed to write image: {}", staging.display()))?;
    tokio::fs::rename(&staging, image)
        .await
        .with_context(|| format!("Failed to replace image: {}", image.display()))?;

    tracing::info!(image = %image.display(), bytes = bytes.len(), "Image saved");
    Ok(())
}

fn staging_path(image: &Path) -> PathBuf {
    let mut name = image
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    image.with_file_name(name)
}
