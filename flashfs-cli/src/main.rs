//! FlashFS CLI - create, inspect and edit LittleFS/FatFS images.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::image::FsArgs;
use flashfs_host::observability::{TracingConfig, TracingGuard, init_tracing};
use std::path::PathBuf;

/// FlashFS - flash filesystem images through sandboxed engines.
#[derive(Parser)]
#[command(name = "flashfs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    fs: FsArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a fresh, formatted image
    Create {
        /// Image file to create
        image: PathBuf,

        /// Pack the contents of this host directory into the image
        #[arg(long)]
        from_dir: Option<PathBuf>,

        /// Overwrite an existing image
        #[arg(long)]
        force: bool,
    },

    /// List a directory inside an image
    Ls {
        /// Image file
        image: PathBuf,

        /// Directory to list
        #[arg(default_value = "/")]
        path: String,

        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a file from an image
    Cat {
        /// Image file
        image: PathBuf,

        /// File inside the image
        path: String,
    },

    /// Copy a host file into an image
    Put {
        /// Image file
        image: PathBuf,

        /// Destination path inside the image
        path: String,

        /// Host file to copy
        file: PathBuf,
    },

    /// Delete a file or directory from an image
    Rm {
        /// Image file
        image: PathBuf,

        /// Path inside the image
        path: String,

        /// Delete directories and their contents
        #[arg(short, long)]
        recursive: bool,
    },

    /// Create a directory (and missing parents) inside an image
    Mkdir {
        /// Image file
        image: PathBuf,

        /// Directory path inside the image
        path: String,
    },

    /// Rename or move an entry inside an image
    Mv {
        /// Image file
        image: PathBuf,

        /// Current path
        from: String,

        /// New path
        to: String,
    },

    /// Show capacity and free space
    Usage {
        /// Image file
        image: PathBuf,

        /// Print usage as JSON
        #[arg(long)]
        json: bool,
    },

    /// Copy every file out of an image into a host directory
    Extract {
        /// Image file
        image: PathBuf,

        /// Destination directory
        dest: PathBuf,
    },

    /// Show version information
    Version,
}

fn setup_logging(verbosity: u8) -> Result<TracingGuard> {
    let mut builder = TracingConfig::builder();
    if verbosity > 0 {
        builder = builder.verbosity(verbosity);
    }
    init_tracing(builder.from_env().build())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing_guard = setup_logging(cli.verbose)?;
    let fs = &cli.fs;

    match cli.command {
        Commands::Create {
            image,
            from_dir,
            force,
        } => commands::create::run(fs, &image, from_dir.as_deref(), force).await,
        Commands::Ls { image, path, json } => commands::list::run(fs, &image, &path, json).await,
        Commands::Cat { image, path } => commands::cat::run(fs, &image, &path).await,
        Commands::Put { image, path, file } => {
            commands::edit::put(fs, &image, &path, &file).await
        }
        Commands::Rm {
            image,
            path,
            recursive,
        } => commands::edit::remove(fs, &image, &path, recursive).await,
        Commands::Mkdir { image, path } => commands::edit::mkdir(fs, &image, &path).await,
        Commands::Mv { image, from, to } => commands::edit::rename(fs, &image, &from, &to).await,
        Commands::Usage { image, json } => commands::usage::run(fs, &image, json).await,
        Commands::Extract { image, dest } => commands::extract::run(fs, &image, &dest).await,
        Commands::Version => commands::version::run(),
    }
}
