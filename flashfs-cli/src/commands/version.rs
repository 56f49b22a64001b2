//! Version command - show version information.

use anyhow::Result;

/// Version information.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the version command.
pub fn run() -> Result<()> {
    println!("FlashFS - Host tools for sandboxed flash filesystem engines");
    println!();
    println!("Version:     {}", VERSION);
    println!(
        "Platform:    {} / {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    println!();
    println!("Engines:");
    println!("  littlefs   module from --module, $FLASHFS_LITTLEFS_WASM or ./littlefs.wasm");
    println!("  lfsjs      module from --module, $FLASHFS_LFSJS_WASM or ./littlefs.wasm");
    println!("  fatfs      module from --module, $FLASHFS_FATFS_WASM or ./fatfs.wasm");
    println!();
    println!("Components:");
    println!("  flashfs-core   Errors, configuration, paths, listings");
    println!("  flashfs-host   Guest runtime, memory arena, filesystem clients");
    println!("  flashfs-cli    Command-line interface");

    Ok(())
}
