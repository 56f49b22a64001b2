//! Usage command - show capacity and free space of an image.

use super::image::{self, FsArgs};
use anyhow::Result;
use flashfs_host::prelude::*;
use std::path::Path;

/// Run the usage command.
pub async fn run(args: &FsArgs, image_path: &Path, json: bool) -> Result<()> {
    tracing::info!(image = %image_path.display(), "Reading usage");

    let mut fs = image::open(args, image_path).await?;
    let report = Report::collect(fs.as_mut())?;
    fs.close()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    } else {
        print!("{}", report.render());
    }
    Ok(())
}

/// Usage figures plus what the volume looks like.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    family: FsFamily,
    geometry: Geometry,
    usage: Usage,
    disk_version: Option<DiskVersion>,
}

impl Report {
    /// Gather usage from an open filesystem.
    pub fn collect(fs: &mut dyn Filesystem) -> Result<Self> {
        Ok(Self {
            family: fs.family(),
            geometry: fs.geometry(),
            usage: fs.usage()?,
            disk_version: fs.disk_version()?,
        })
    }

    fn percent_used(&self) -> f64 {
        if self.usage.capacity_bytes == 0 {
            return 0.0;
        }
        self.usage.used_bytes as f64 * 100.0 / self.usage.capacity_bytes as f64
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "family": self.family,
            "block_size": self.geometry.block_size,
            "block_count": self.geometry.block_count,
            "capacity_bytes": self.usage.capacity_bytes,
            "used_bytes": self.usage.used_bytes,
            "free_bytes": self.usage.free_bytes,
            "disk_version": self.disk_version.map(|v| v.to_string()),
        })
    }

    fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("Filesystem Usage\n");
        out.push_str("================\n");
        out.push_str(&format!("Family:       {}\n", self.family));
        if let Some(version) = self.disk_version {
            out.push_str(&format!("Disk version: {}\n", version));
        }
        out.push_str(&format!(
            "Geometry:     {} x {} bytes\n",
            self.geometry.block_count, self.geometry.block_size
        ));
        out.push_str(&format!("Capacity:     {} bytes\n", self.usage.capacity_bytes));
        out.push_str(&format!(
            "Used:         {} bytes ({:.1}%)\n",
            self.usage.used_bytes,
            self.percent_used()
        ));
        out.push_str(&format!("Free:         {} bytes\n", self.usage.free_bytes));
        out
    }
}
